//! Mixer and wave data traits
//!
//! An [`AudioMixer`] is the playback cursor of one channel. It pulls
//! samples from a [`WaveData`] supplier, resamples them to the output rate
//! and hands them to the engine, which applies volumes and routing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AudioSource;
use crate::types::SamplePair;

/// Mixer position detached from the sample cursor
///
/// Carries enough to resume exactly where playback stopped, including
/// the byte offset a streamed source needs to restart its reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPosition {
    pub sample: u32,
    /// Sub-sample phase in 28-bit fixed point
    pub fraction: u32,
    /// Byte offset of `sample` within the data chunk
    pub byte_offset: u64,
    /// Times playback has wrapped to the loop start
    pub loops: u32,
}

/// Per-channel playback cursor
pub trait AudioMixer: Send {
    /// Resample up to `sample_count` output samples into `out`
    ///
    /// Returns how many were produced; fewer than requested only at the end
    /// of the data or when a stream has not caught up yet.
    fn mix_data_to_device(
        &mut self,
        pitch: f32,
        sample_count: usize,
        output_rate: u32,
        out: &mut [SamplePair],
    ) -> usize;

    /// Advance exactly as [`mix_data_to_device`](Self::mix_data_to_device)
    /// would, without producing output
    fn skip_samples(&mut self, pitch: f32, sample_count: usize, output_rate: u32) -> usize;

    /// `false` once the channel should be freed
    fn should_continue_mixing(&mut self) -> bool;

    /// `false` while data is still loading; not an error
    fn is_ready_to_mix(&mut self) -> bool;

    /// Jump ahead. Must not be behind the current position.
    fn set_sample_start(&mut self, position: u32);

    /// Stop playback at `position` instead of the end of the source
    fn set_sample_end(&mut self, position: u32);

    fn position_for_save(&self) -> SavedPosition;

    /// Restore a saved position; may move backwards
    fn set_position_from_saved(&mut self, saved: &SavedPosition);

    fn sample_position(&self) -> u32;

    fn source(&self) -> &Arc<AudioSource>;
}

/// Random-access sample supplier behind a mixer
pub trait WaveData: Send {
    /// Decode samples starting at `pos` into `out`
    ///
    /// Returns the count available now, which can be short while data is
    /// loading.
    fn read_samples(&mut self, pos: u32, out: &mut [SamplePair]) -> usize;

    fn is_ready_to_mix(&mut self) -> bool;

    /// The playback cursor is at `pos`; data before it will not be read
    /// again until the loop comes back around
    fn release_before(&mut self, _pos: u32) {}

    /// No further data will ever arrive (load failure)
    fn is_finished(&mut self) -> bool {
        false
    }

    /// Actual length once known, if it can be shorter than the header says
    fn known_length(&self) -> Option<u32> {
        None
    }
}
