//! Audio sources and mixer construction
//!
//! An [`AudioSource`] is the immutable description of a playable asset,
//! shared behind an `Arc` by the source cache and every channel playing
//! it. It knows where its samples live and builds the matching
//! [`AudioMixer`] when a channel starts.
//!
//! ## Name prefixes
//!
//! Leading characters of a sound name select playback behavior and are
//! stripped before the file is looked up:
//!
//! | Prefix | Meaning |
//! |--------|---------|
//! | `*` | stream from disk |
//! | `#` | dry: bypass spatial buses |
//! | `(` | doppler: left = approach, right = recede |
//! | `@` | omni: full volume everywhere |

pub mod cache;
pub mod mixer;
pub mod resample;
pub mod voice;
pub mod wave;

pub use cache::{CachedInfo, CachedInfoHandle, MetadataCache};
pub use mixer::{AudioMixer, SavedPosition, WaveData};
pub use voice::VoiceMixer;
pub use wave::{CompressedMixer, MemoryWaveData, StreamWaveData, WaveMixer};

use serde::Serialize;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::audio_file::WaveFormat;
use crate::config::{InterpolationMethod, MixConfig, StreamConfig};
use crate::engine::gc::WaveBytes;
use crate::error::{SoundError, SoundResult};
use crate::wavecache::{AsyncWaveCache, StreamFlags, StreamParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SourceKind {
    Wave,
    Compressed,
    Voice,
}

impl SourceKind {
    /// Kind of a file source, by extension
    pub fn from_name(name: &str) -> Self {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match extension.as_deref() {
            Some("mp3" | "flac" | "ogg") => SourceKind::Compressed,
            _ => SourceKind::Wave,
        }
    }
}

/// Behavior selected by name prefixes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceFlags {
    pub stream: bool,
    pub dry: bool,
    pub doppler: bool,
    pub omni: bool,
}

impl SourceFlags {
    /// Split leading prefix characters off `name`
    pub fn parse(name: &str) -> (Self, &str) {
        let mut flags = Self::default();
        let mut rest = name;
        loop {
            let mut chars = rest.chars();
            match chars.next() {
                Some('*') => flags.stream = true,
                Some('#') => flags.dry = true,
                Some('(') => flags.doppler = true,
                Some('@') => flags.omni = true,
                _ => break,
            }
            rest = chars.as_str();
        }
        (flags, rest)
    }
}

enum SourceData {
    /// PCM owned by the source (precached or decoded)
    Resident(WaveBytes),
    /// Loaded whole through the wave cache on first play
    Whole { data_start: u64, data_size: u32 },
    Streamed { data_start: u64, data_size: u32 },
    /// Live feed; the consumer goes to the first mixer
    Voice(Mutex<Option<rtrb::Consumer<i16>>>),
}

pub struct AudioSource {
    name: String,
    kind: SourceKind,
    format: WaveFormat,
    sample_count: u32,
    loop_start: Option<u32>,
    flags: SourceFlags,
    data: SourceData,
    mixer_refs: AtomicU32,
    /// Metadata flush the source was built under
    flush_count: u32,
}

impl AudioSource {
    /// Source described by cached metadata
    pub fn from_info(name: &str, flags: SourceFlags, info: &CachedInfo, stream_threshold: usize) -> Self {
        let data = match &info.cached_data {
            Some(bytes) => SourceData::Resident(bytes.clone()),
            None if flags.stream || info.data_size as usize > stream_threshold => SourceData::Streamed {
                data_start: info.data_start,
                data_size: info.data_size,
            },
            None => SourceData::Whole {
                data_start: info.data_start,
                data_size: info.data_size,
            },
        };
        Self {
            name: name.to_string(),
            kind: info.kind,
            format: info.format,
            sample_count: info.sample_count,
            loop_start: info.loop_start,
            flags,
            data,
            mixer_refs: AtomicU32::new(0),
            flush_count: info.flush_count(),
        }
    }

    /// Live mono source fed through `consumer`
    pub fn voice(name: &str, format: WaveFormat, consumer: rtrb::Consumer<i16>) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Voice,
            format,
            sample_count: u32::MAX,
            loop_start: None,
            flags: SourceFlags::default(),
            data: SourceData::Voice(Mutex::new(Some(consumer))),
            mixer_refs: AtomicU32::new(0),
            flush_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn format(&self) -> WaveFormat {
        self.format
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn loop_start(&self) -> Option<u32> {
        self.loop_start
    }

    pub fn is_looped(&self) -> bool {
        self.loop_start.is_some()
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.data, SourceData::Streamed { .. })
    }

    pub fn flags(&self) -> SourceFlags {
        self.flags
    }

    pub fn reference_add(&self) {
        self.mixer_refs.fetch_add(1, Ordering::AcqRel);
    }

    pub fn reference_remove(&self) {
        let prev = self.mixer_refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "mixer reference underflow on {}", self.name);
    }

    pub fn mixer_refs(&self) -> u32 {
        self.mixer_refs.load(Ordering::Acquire)
    }

    /// No mixer is playing this source
    pub fn can_delete(&self) -> bool {
        self.mixer_refs() == 0
    }

    /// Hand out the voice feed; `None` once taken or for file sources
    pub fn take_voice_consumer(&self) -> Option<rtrb::Consumer<i16>> {
        match &self.data {
            SourceData::Voice(consumer) => consumer.lock().unwrap_or_else(PoisonError::into_inner).take(),
            _ => None,
        }
    }

    /// Build the mixer that plays this source
    pub fn create_mixer(self: &Arc<Self>, ctx: &MixerContext) -> SoundResult<Box<dyn AudioMixer>> {
        let method = ctx.interpolation;
        let mixer: Box<dyn AudioMixer> = match (&self.data, self.kind) {
            (SourceData::Voice(_), _) => {
                let consumer = self.take_voice_consumer().ok_or(SoundError::CannotCreateMixer)?;
                Box::new(VoiceMixer::new(SourceRef::new(self.clone()), consumer, method))
            }
            (SourceData::Resident(bytes), SourceKind::Compressed) => {
                Box::new(CompressedMixer::new(SourceRef::new(self.clone()), bytes.clone(), method))
            }
            (SourceData::Resident(bytes), _) => {
                let data = MemoryWaveData::resident(self.format, bytes.clone());
                Box::new(WaveMixer::new(SourceRef::new(self.clone()), Box::new(data), method))
            }
            (SourceData::Whole { data_start, data_size }, _) => {
                let handle = ctx.cache.async_load_cache(self.name_on_disk(), *data_size, *data_start);
                let data = MemoryWaveData::loading(self.format, ctx.cache.clone(), handle);
                Box::new(WaveMixer::new(SourceRef::new(self.clone()), Box::new(data), method))
            }
            (SourceData::Streamed { data_start, data_size }, _) => {
                let single_play = self.loop_start.is_none();
                let handle = ctx.cache.open_streamed_load(StreamParams {
                    name: self.name_on_disk().to_string(),
                    data_size: *data_size,
                    data_start: *data_start,
                    start_pos: 0,
                    loop_pos: self.loop_start.map(|s| s * self.format.sample_size() as u32),
                    buffer_size: ctx.stream_buffer_size,
                    num_buffers: ctx.stream_buffers,
                    flags: StreamFlags {
                        single_play,
                        transient: single_play,
                        queued_load: false,
                    },
                })?;
                let data = StreamWaveData::new(self.format, ctx.cache.clone(), handle);
                Box::new(WaveMixer::new(SourceRef::new(self.clone()), Box::new(data), method))
            }
        };
        Ok(mixer)
    }

    fn name_on_disk(&self) -> &str {
        SourceFlags::parse(&self.name).1
    }
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("sample_count", &self.sample_count)
            .field("loop_start", &self.loop_start)
            .field("streaming", &self.is_streaming())
            .field("mixer_refs", &self.mixer_refs())
            .finish()
    }
}

/// Counts one mixer against its source for as long as it lives
pub struct SourceRef(Arc<AudioSource>);

impl SourceRef {
    pub fn new(source: Arc<AudioSource>) -> Self {
        source.reference_add();
        Self(source)
    }
}

impl Deref for SourceRef {
    type Target = Arc<AudioSource>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for SourceRef {
    fn drop(&mut self) {
        self.0.reference_remove();
    }
}

/// What a source needs to build a mixer
#[derive(Clone)]
pub struct MixerContext {
    pub cache: Arc<AsyncWaveCache>,
    pub interpolation: InterpolationMethod,
    pub stream_buffer_size: usize,
    pub stream_buffers: usize,
}

impl MixerContext {
    pub fn new(cache: Arc<AsyncWaveCache>, config: &MixConfig) -> Self {
        Self {
            cache,
            interpolation: config.interpolation,
            stream_buffer_size: config.stream.buffer_size,
            stream_buffers: config.stream.buffers_per_stream,
        }
    }
}

/// Name-keyed registry of sources
pub struct SourceCache {
    metadata: Arc<MetadataCache>,
    sources: Mutex<HashMap<String, Arc<AudioSource>>>,
    stream_threshold: usize,
}

impl SourceCache {
    pub fn new(metadata: Arc<MetadataCache>, config: &StreamConfig) -> Self {
        Self {
            metadata,
            sources: Mutex::new(HashMap::new()),
            stream_threshold: config.stream_threshold,
        }
    }

    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// Source for a (possibly prefixed) name, built on first use
    ///
    /// Sources built before the last metadata invalidation are rebuilt.
    pub fn find_or_create(&self, name: &str) -> SoundResult<Arc<AudioSource>> {
        let current = self.metadata.flush_count();
        if let Some(source) = self.lock().get(name) {
            if source.kind == SourceKind::Voice || source.flush_count == current {
                return Ok(source.clone());
            }
        }

        let (flags, file) = SourceFlags::parse(name);
        if file.is_empty() {
            return Err(SoundError::CannotResolveName);
        }
        let kind = SourceKind::from_name(file);
        let info = self.metadata.get_info(kind, !flags.stream, file)?;
        let source = Arc::new(AudioSource::from_info(name, flags, &info, self.stream_threshold));
        log::debug!("[SOURCE] created {:?}", source);
        self.lock().insert(name.to_string(), source.clone());
        Ok(source)
    }

    /// Register a live voice feed under `name`
    pub fn register_voice(&self, name: &str, format: WaveFormat, consumer: rtrb::Consumer<i16>) -> Arc<AudioSource> {
        let source = Arc::new(AudioSource::voice(name, format, consumer));
        self.lock().insert(name.to_string(), source.clone());
        source
    }

    /// Forget sources no mixer is playing; returns how many went
    pub fn purge_unreferenced(&self) -> usize {
        let mut sources = self.lock();
        let before = sources.len();
        sources.retain(|_, source| !source.can_delete());
        let purged = before - sources.len();
        if purged > 0 {
            log::debug!("[SOURCE] purged {} unreferenced sources", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AudioSource>>> {
        self.sources.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
