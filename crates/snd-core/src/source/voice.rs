//! Live voice playback
//!
//! Voice sources have no file behind them: a producer thread pushes mono
//! 16-bit samples into an rtrb ring and the mixer consumes them through a
//! small sliding window. The stream ends once the producer is dropped and
//! everything it pushed has been played.

use std::collections::VecDeque;
use std::sync::Arc;

use super::mixer::{AudioMixer, SavedPosition, WaveData};
use super::resample::Resampler;
use super::{AudioSource, SourceRef};
use crate::config::InterpolationMethod;
use crate::types::{SamplePair, COPY_BUFFER_GUARD, COPY_BUFFER_SAMPLES};

const WINDOW_SAMPLES: usize = COPY_BUFFER_SAMPLES + COPY_BUFFER_GUARD;

pub struct VoiceData {
    consumer: rtrb::Consumer<i16>,
    window: VecDeque<i16>,
    /// Sample index of `window[0]`
    base: u32,
}

impl VoiceData {
    pub fn new(consumer: rtrb::Consumer<i16>) -> Self {
        Self {
            consumer,
            window: VecDeque::with_capacity(WINDOW_SAMPLES),
            base: 0,
        }
    }

    fn refill(&mut self) {
        while self.window.len() < WINDOW_SAMPLES {
            match self.consumer.pop() {
                Ok(sample) => self.window.push_back(sample),
                Err(_) => break,
            }
        }
    }

    /// Drop everything before `pos`
    fn slide_to(&mut self, pos: u32) {
        let mut skip = pos.saturating_sub(self.base) as usize;
        let from_window = skip.min(self.window.len());
        self.window.drain(..from_window);
        skip -= from_window;
        while skip > 0 && self.consumer.pop().is_ok() {
            skip -= 1;
        }
        self.base = pos;
    }
}

impl WaveData for VoiceData {
    fn read_samples(&mut self, pos: u32, out: &mut [SamplePair]) -> usize {
        self.slide_to(pos);
        self.refill();
        let n = out.len().min(self.window.len());
        for (dst, &s) in out.iter_mut().zip(self.window.iter().take(n)) {
            *dst = SamplePair::mono(s as i32);
        }
        n
    }

    fn is_ready_to_mix(&mut self) -> bool {
        !self.window.is_empty() || !self.consumer.is_empty() || self.consumer.is_abandoned()
    }

    fn known_length(&self) -> Option<u32> {
        (self.consumer.is_abandoned() && self.consumer.is_empty())
            .then(|| self.base + self.window.len() as u32)
    }
}

/// Mixer over a [`VoiceData`] feed
pub struct VoiceMixer {
    source: SourceRef,
    data: VoiceData,
    resampler: Resampler,
}

impl VoiceMixer {
    pub fn new(source: SourceRef, consumer: rtrb::Consumer<i16>, method: InterpolationMethod) -> Self {
        Self {
            source,
            data: VoiceData::new(consumer),
            resampler: Resampler::new(u32::MAX, None, method),
        }
    }

    fn rate(&self, pitch: f32, output_rate: u32) -> f64 {
        pitch.max(0.0) as f64 * self.source.format().sample_rate as f64 / output_rate.max(1) as f64
    }

    fn sync_length(&mut self) {
        if let Some(len) = self.data.known_length() {
            self.resampler.clamp_end(len);
        }
    }
}

impl AudioMixer for VoiceMixer {
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
        self.resampler.process(&mut self.data, rate, count, Some(out))
    }

    fn skip_samples(&mut self, pitch: f32, sample_count: usize, output_rate: u32) -> usize {
        self.sync_length();
        let rate = self.rate(pitch, output_rate);
        self.resampler.process(&mut self.data, rate, sample_count, None)
    }

    fn should_continue_mixing(&mut self) -> bool {
        self.sync_length();
        !self.resampler.is_finished()
    }

    fn is_ready_to_mix(&mut self) -> bool {
        self.data.is_ready_to_mix()
    }

    fn set_sample_start(&mut self, position: u32) {
        debug_assert!(position >= self.resampler.position());
        self.resampler.seek(position, 0, 0);
    }

    fn set_sample_end(&mut self, position: u32) {
        self.resampler.set_end(position);
    }

    fn position_for_save(&self) -> SavedPosition {
        let sample = self.resampler.position();
        SavedPosition {
            sample,
            fraction: self.resampler.fraction(),
            byte_offset: sample as u64 * 2,
            loops: 0,
        }
    }

    /// A live feed cannot rewind; only forward positions take effect
    fn set_position_from_saved(&mut self, saved: &SavedPosition) {
        if saved.sample >= self.resampler.position() {
            self.resampler.seek(saved.sample, saved.fraction, 0);
        }
    }

    fn sample_position(&self) -> u32 {
        self.resampler.position()
    }

    fn source(&self) -> &Arc<AudioSource> {
        &self.source
    }
}
