//! Mixer configuration
//!
//! [`MixConfig`] is persisted as YAML next to the other user settings.
//! Every field has a default, so a partial file still loads.

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_OUTPUT_RATE;

/// Resampling filter used when a channel plays off-pitch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Linear interpolation (2-point) - fast, acceptable quality
    #[default]
    Linear,
    /// Cubic Catmull-Rom interpolation (4-point) - better quality
    Cubic,
}

impl InterpolationMethod {
    /// Source samples needed past the last output position
    pub fn lookahead(&self) -> usize {
        match self {
            Self::Linear => 1,
            Self::Cubic => 2,
        }
    }
}

/// Speaker layout of the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurroundMode {
    #[default]
    Stereo,
    Quad,
    #[serde(rename = "5.1")]
    FiveOne,
}

impl SurroundMode {
    /// Interleaved channels per device frame
    pub fn device_channels(&self) -> usize {
        match self {
            Self::Stereo => 2,
            Self::Quad => 4,
            Self::FiveOne => 6,
        }
    }

    pub fn has_rear(&self) -> bool {
        !matches!(self, Self::Stereo)
    }

    pub fn has_center(&self) -> bool {
        matches!(self, Self::FiveOne)
    }
}

/// Streaming and caching limits for the wave cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes per stream buffer
    pub buffer_size: usize,
    /// Buffers per streaming session
    pub buffers_per_stream: usize,
    /// Transient buffers shared by all single-play streams
    pub transient_pool_buffers: usize,
    /// Data chunks at or above this size are streamed instead of loaded whole
    pub stream_threshold: usize,
    /// Files at or below this size keep their bytes in the metadata cache
    pub precache_max_bytes: usize,
    /// Background loader threads
    pub loader_threads: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
            buffers_per_stream: 4,
            transient_pool_buffers: 64,
            stream_threshold: 1024 * 1024,
            precache_max_bytes: 32 * 1024,
            loader_threads: 2,
        }
    }
}

/// Mixer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    /// Output sample rate in Hz
    pub output_rate: u32,
    /// Device ring capacity in sample frames
    pub device_frames: usize,
    pub surround: SurroundMode,
    /// Slots for entity-driven sounds
    pub dynamic_channels: usize,
    /// Slots for ambient and static sounds
    pub static_channels: usize,
    /// Channels playing the same source that mix at once; the rest are quashed
    pub max_same_sounds: usize,
    pub interpolation: InterpolationMethod,
    /// Skip accumulation for channels whose volume truncates to zero
    pub skip_low_volume: bool,
    /// Run optimized and reference paths side by side and compare
    pub verify_mix: bool,
    /// Master volume, 0.0 - 1.0
    pub master_volume: f32,
    /// Distance at which a sound is entirely in the room bus
    pub dsp_mix_distance: f32,
    pub stream: StreamConfig,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            output_rate: DEFAULT_OUTPUT_RATE,
            device_frames: 16 * 1024,
            surround: SurroundMode::default(),
            dynamic_channels: 64,
            static_channels: 64,
            max_same_sounds: 4,
            interpolation: InterpolationMethod::default(),
            skip_low_volume: true,
            verify_mix: false,
            master_volume: 1.0,
            dsp_mix_distance: 2000.0,
            stream: StreamConfig::default(),
        }
    }
}
