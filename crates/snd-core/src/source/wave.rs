//! Mixers over in-memory and streamed PCM

use std::sync::Arc;

use super::mixer::{AudioMixer, SavedPosition, WaveData};
use super::resample::Resampler;
use super::{AudioSource, SourceRef};
use crate::audio_file::{decode_pcm, WaveFormat};
use crate::config::InterpolationMethod;
use crate::engine::gc::WaveBytes;
use crate::types::{SamplePair, COPY_BUFFER_GUARD, COPY_BUFFER_SAMPLES, MAX_SAMPLE_SIZE};
use crate::wavecache::{AsyncWaveCache, WaveHandle};

/// Read `out.len()` frames at sample `pos` from a resident blob
fn read_resident(bytes: &[u8], format: &WaveFormat, pos: u32, out: &mut [SamplePair]) -> usize {
    let offset = pos as usize * format.sample_size();
    if offset >= bytes.len() {
        return 0;
    }
    decode_pcm(&bytes[offset..], format, out)
}

enum Residency {
    Resident(WaveBytes),
    Loading,
    Failed,
}

/// Whole-file data, either resident from the start or loaded once
pub struct MemoryWaveData {
    format: WaveFormat,
    residency: Residency,
    load: Option<(Arc<AsyncWaveCache>, WaveHandle)>,
}

impl MemoryWaveData {
    pub fn resident(format: WaveFormat, bytes: WaveBytes) -> Self {
        Self {
            format,
            residency: Residency::Resident(bytes),
            load: None,
        }
    }

    /// Data arriving through a whole-file cache load
    pub fn loading(format: WaveFormat, cache: Arc<AsyncWaveCache>, handle: WaveHandle) -> Self {
        Self {
            format,
            residency: Residency::Loading,
            load: Some((cache, handle)),
        }
    }

    fn poll(&mut self) {
        if !matches!(self.residency, Residency::Loading) {
            return;
        }
        let Some((cache, handle)) = &self.load else {
            return;
        };
        let status = cache.is_data_load_completed(*handle);
        if !status.completed {
            return;
        }
        self.residency = match cache.get_data_pointer(*handle) {
            Some(bytes) if status.valid => Residency::Resident(bytes),
            _ => {
                log::warn!("[SOURCE] load failed (missing: {})", status.missing);
                Residency::Failed
            }
        };
    }
}

impl WaveData for MemoryWaveData {
    fn read_samples(&mut self, pos: u32, out: &mut [SamplePair]) -> usize {
        match &self.residency {
            Residency::Resident(bytes) => read_resident(bytes, &self.format, pos, out),
            _ => 0,
        }
    }

    fn is_ready_to_mix(&mut self) -> bool {
        self.poll();
        matches!(self.residency, Residency::Resident(_))
    }

    fn is_finished(&mut self) -> bool {
        self.poll();
        matches!(self.residency, Residency::Failed)
    }

    fn known_length(&self) -> Option<u32> {
        match &self.residency {
            Residency::Resident(bytes) => Some((bytes.len() / self.format.sample_size().max(1)) as u32),
            _ => None,
        }
    }
}

impl Drop for MemoryWaveData {
    fn drop(&mut self) {
        if let Some((cache, handle)) = self.load.take() {
            cache.unload(handle);
        }
    }
}

/// Data pulled a window at a time from a streaming session
pub struct StreamWaveData {
    format: WaveFormat,
    cache: Arc<AsyncWaveCache>,
    handle: WaveHandle,
    scratch: Vec<u8>,
}

impl StreamWaveData {
    pub fn new(format: WaveFormat, cache: Arc<AsyncWaveCache>, handle: WaveHandle) -> Self {
        Self {
            format,
            cache,
            handle,
            scratch: vec![0; (COPY_BUFFER_SAMPLES + COPY_BUFFER_GUARD) * MAX_SAMPLE_SIZE],
        }
    }
}

impl WaveData for StreamWaveData {
    fn read_samples(&mut self, pos: u32, out: &mut [SamplePair]) -> usize {
        let frame = self.format.sample_size();
        let want = (out.len() * frame).min(self.scratch.len());
        let start = pos.saturating_mul(frame as u32);
        let got = self
            .cache
            .copy_streamed_data_into_memory(self.handle, &mut self.scratch[..want], start);
        decode_pcm(&self.scratch[..got], &self.format, out)
    }

    fn is_ready_to_mix(&mut self) -> bool {
        self.cache.is_streamed_data_ready(self.handle)
    }

    fn release_before(&mut self, pos: u32) {
        let start = pos.saturating_mul(self.format.sample_size() as u32);
        self.cache.release_streamed_data_before(self.handle, start);
    }

    fn is_finished(&mut self) -> bool {
        self.cache.stream_error(self.handle).is_some()
    }
}

impl Drop for StreamWaveData {
    fn drop(&mut self) {
        self.cache.close_streamed_load(self.handle);
    }
}

/// Plays PCM through a [`WaveData`] supplier
pub struct WaveMixer {
    source: SourceRef,
    data: Box<dyn WaveData>,
    resampler: Resampler,
    source_rate: f64,
}

impl WaveMixer {
    pub fn new(source: SourceRef, data: Box<dyn WaveData>, method: InterpolationMethod) -> Self {
        let resampler = Resampler::new(source.sample_count(), source.loop_start(), method);
        let source_rate = source.format().sample_rate as f64;
        Self {
            source,
            data,
            resampler,
            source_rate,
        }
    }

    fn rate(&self, pitch: f32, output_rate: u32) -> f64 {
        pitch.max(0.0) as f64 * self.source_rate / output_rate.max(1) as f64
    }

    fn sync_length(&mut self) {
        if let Some(len) = self.data.known_length() {
            self.resampler.clamp_end(len);
        }
    }
}

impl AudioMixer for WaveMixer {
    fn mix_data_to_device(
        &mut self,
        pitch: f32,
        sample_count: usize,
        output_rate: u32,
        out: &mut [SamplePair],
    ) -> usize {
        self.sync_length();
        let rate = self.rate(pitch, output_rate);
        let count = sample_count.min(out.len());
        self.resampler.process(&mut *self.data, rate, count, Some(out))
    }

    fn skip_samples(&mut self, pitch: f32, sample_count: usize, output_rate: u32) -> usize {
        self.sync_length();
        let rate = self.rate(pitch, output_rate);
        self.resampler.process(&mut *self.data, rate, sample_count, None)
    }

    fn should_continue_mixing(&mut self) -> bool {
        !self.resampler.is_finished() && !self.data.is_finished()
    }

    fn is_ready_to_mix(&mut self) -> bool {
        self.data.is_ready_to_mix()
    }

    fn set_sample_start(&mut self, position: u32) {
        debug_assert!(
            position >= self.resampler.position(),
            "sample start {} behind position {}",
            position,
            self.resampler.position()
        );
        self.resampler.seek(position, 0, self.resampler.loops());
    }

    fn set_sample_end(&mut self, position: u32) {
        self.resampler.set_end(position);
    }

    fn position_for_save(&self) -> SavedPosition {
        let sample = self.resampler.position();
        SavedPosition {
            sample,
            fraction: self.resampler.fraction(),
            byte_offset: sample as u64 * self.source.format().sample_size() as u64,
            loops: self.resampler.loops(),
        }
    }

    fn set_position_from_saved(&mut self, saved: &SavedPosition) {
        self.resampler.seek(saved.sample, saved.fraction, saved.loops);
    }

    fn sample_position(&self) -> u32 {
        self.resampler.position()
    }

    fn source(&self) -> &Arc<AudioSource> {
        &self.source
    }
}

/// Plays a compressed file decoded up front to resident PCM
pub struct CompressedMixer {
    inner: WaveMixer,
}

impl CompressedMixer {
    pub fn new(source: SourceRef, pcm: WaveBytes, method: InterpolationMethod) -> Self {
        let data = MemoryWaveData::resident(source.format(), pcm);
        Self {
            inner: WaveMixer::new(source, Box::new(data), method),
        }
    }
}

impl AudioMixer for CompressedMixer {
    fn mix_data_to_device(
        &mut self,
        pitch: f32,
        sample_count: usize,
        output_rate: u32,
        out: &mut [SamplePair],
    ) -> usize {
        self.inner.mix_data_to_device(pitch, sample_count, output_rate, out)
    }

    fn skip_samples(&mut self, pitch: f32, sample_count: usize, output_rate: u32) -> usize {
        self.inner.skip_samples(pitch, sample_count, output_rate)
    }

    fn should_continue_mixing(&mut self) -> bool {
        self.inner.should_continue_mixing()
    }

    fn is_ready_to_mix(&mut self) -> bool {
        self.inner.is_ready_to_mix()
    }

    fn set_sample_start(&mut self, position: u32) {
        self.inner.set_sample_start(position)
    }

    fn set_sample_end(&mut self, position: u32) {
        self.inner.set_sample_end(position)
    }

    fn position_for_save(&self) -> SavedPosition {
        self.inner.position_for_save()
    }

    fn set_position_from_saved(&mut self, saved: &SavedPosition) {
        self.inner.set_position_from_saved(saved)
    }

    fn sample_position(&self) -> u32 {
        self.inner.sample_position()
    }

    fn source(&self) -> &Arc<AudioSource> {
        self.inner.source()
    }
}
