//! Source metadata cache
//!
//! Parsing a header means a loader round trip, so the result is kept per
//! name: format, data location, sample count, loop start and, for small or
//! compressed sources, the resident PCM itself. A global flush counter
//! invalidates every entry at once; entries and handles compare their
//! stamp against it and rebuild lazily.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use super::SourceKind;
use crate::audio_file::{decode_compressed, parse_wave_header, WaveFormat};
use crate::engine::gc::{share_bytes, WaveBytes};
use crate::error::{SoundError, SoundResult};
use crate::wavecache::{LoaderReader, WaveLoader};

/// Parsed facts about one source
pub struct CachedInfo {
    pub name: String,
    pub kind: SourceKind,
    pub format: WaveFormat,
    /// File offset of the PCM data (0 for decoded compressed data)
    pub data_start: u64,
    pub data_size: u32,
    pub sample_count: u32,
    pub loop_start: Option<u32>,
    /// Resident PCM, when small enough to precache or decoded
    pub cached_data: Option<WaveBytes>,
    precached: bool,
    flush_count: u32,
}

impl CachedInfo {
    pub fn flush_count(&self) -> u32 {
        self.flush_count
    }
}

impl std::fmt::Debug for CachedInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedInfo")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("sample_count", &self.sample_count)
            .field("loop_start", &self.loop_start)
            .field("resident", &self.cached_data.as_ref().map(|d| d.len()))
            .field("flush_count", &self.flush_count)
            .finish()
    }
}

pub struct MetadataCache {
    loader: Arc<dyn WaveLoader>,
    entries: RwLock<HashMap<String, Arc<CachedInfo>>>,
    flush_count: AtomicU32,
    precache_max_bytes: usize,
}

impl MetadataCache {
    pub fn new(loader: Arc<dyn WaveLoader>, precache_max_bytes: usize) -> Self {
        Self {
            loader,
            entries: RwLock::new(HashMap::new()),
            flush_count: AtomicU32::new(0),
            precache_max_bytes,
        }
    }

    pub fn flush_count(&self) -> u32 {
        self.flush_count.load(Ordering::Acquire)
    }

    /// Mark every entry stale
    pub fn invalidate_cache(&self) {
        let count = self.flush_count.fetch_add(1, Ordering::AcqRel) + 1;
        log::info!("[SOURCE] metadata cache invalidated (flush {})", count);
    }

    /// Cached info for `name`, rebuilt if missing or stale
    pub fn get_info(&self, kind: SourceKind, is_precached: bool, name: &str) -> SoundResult<Arc<CachedInfo>> {
        let current = self.flush_count();
        if let Ok(entries) = self.entries.read() {
            if let Some(info) = entries.get(name) {
                let fresh = info.flush_count == current && info.kind == kind;
                if fresh && (info.precached || !is_precached) {
                    return Ok(info.clone());
                }
            }
        }
        self.rebuild_cache_entry(kind, is_precached, name)
    }

    pub fn rebuild_cache_entry(&self, kind: SourceKind, is_precached: bool, name: &str) -> SoundResult<Arc<CachedInfo>> {
        let flush_count = self.flush_count();
        let info = match kind {
            SourceKind::Wave => self.build_wave(name, is_precached, flush_count)?,
            SourceKind::Compressed => self.build_compressed(name, flush_count)?,
            SourceKind::Voice => return Err(SoundError::SourceNotSetUp),
        };
        let info = Arc::new(info);
        log::debug!("[SOURCE] cached {:?}", info);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(name.to_string(), info.clone());
        }
        Ok(info)
    }

    fn build_wave(&self, name: &str, is_precached: bool, flush_count: u32) -> SoundResult<CachedInfo> {
        let mut reader = LoaderReader::new(self.loader.as_ref(), name)?;
        let header = parse_wave_header(&mut reader).map_err(|e| {
            log::warn!("[SOURCE] bad wave header in {}: {}", name, e);
            SoundError::SourceNotSetUp
        })?;

        let cached_data = if is_precached && header.data_size as usize <= self.precache_max_bytes {
            let bytes = self
                .loader
                .read(name, header.data_offset, header.data_size as usize)?;
            Some(share_bytes(bytes))
        } else {
            None
        };

        Ok(CachedInfo {
            name: name.to_string(),
            kind: SourceKind::Wave,
            format: header.format,
            data_start: header.data_offset,
            data_size: header.data_size,
            sample_count: header.sample_count(),
            loop_start: header.loop_start,
            cached_data,
            precached: is_precached,
            flush_count,
        })
    }

    fn build_compressed(&self, name: &str, flush_count: u32) -> SoundResult<CachedInfo> {
        let size = self.loader.size(name)?;
        let bytes = self.loader.read(name, 0, size as usize)?;
        let extension = Path::new(name).extension().and_then(|e| e.to_str());
        let decoded = decode_compressed(bytes, extension).map_err(|e| {
            log::warn!("[SOURCE] cannot decode {}: {}", name, e);
            SoundError::SourceNotSetUp
        })?;

        let sample_count = decoded.sample_count();
        Ok(CachedInfo {
            name: name.to_string(),
            kind: SourceKind::Compressed,
            format: decoded.format,
            data_start: 0,
            data_size: decoded.pcm.len() as u32,
            sample_count,
            loop_start: None,
            cached_data: Some(share_bytes(decoded.pcm)),
            precached: true,
            flush_count,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held reference to one cache entry that notices invalidation
pub struct CachedInfoHandle {
    cache: Arc<MetadataCache>,
    kind: SourceKind,
    is_precached: bool,
    name: String,
    info: Option<Arc<CachedInfo>>,
}

impl CachedInfoHandle {
    pub fn new(cache: Arc<MetadataCache>, kind: SourceKind, is_precached: bool, name: &str) -> Self {
        Self {
            cache,
            kind,
            is_precached,
            name: name.to_string(),
            info: None,
        }
    }

    /// Current info, reacquiring it through the cache when stale
    pub fn get(&mut self) -> SoundResult<Arc<CachedInfo>> {
        if let Some(info) = self.fast_get() {
            return Ok(info.clone());
        }
        let info = self.cache.get_info(self.kind, self.is_precached, &self.name)?;
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Held info if still valid; never touches the loader
    pub fn fast_get(&self) -> Option<&Arc<CachedInfo>> {
        self.info
            .as_ref()
            .filter(|info| info.flush_count == self.cache.flush_count())
    }

    pub fn is_valid(&self) -> bool {
        self.fast_get().is_some()
    }
}
