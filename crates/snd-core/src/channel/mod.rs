//! Playing sound instances
//!
//! A [`Channel`] is one sound in flight: its source, its mixer cursor,
//! volume ramps, spatial placement and flags. Channels live in the
//! fixed-size [`ChannelRegistry`] and refer to each other only by index.

mod flags;
mod registry;
mod volume;

pub use flags::ChannelFlags;
pub use registry::{ActiveChannels, ChannelList, ChannelRegistry};
pub(crate) use registry::next_guid;
pub use volume::{SpeakerVolumes, VolumeRamp, VOLUME_MAX};

use serde::Serialize;
use std::sync::Arc;

use crate::source::{AudioMixer, AudioSource};
use crate::types::{Vec3, SPEAKER_COUNT};

/// Head-related spatialization state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HrtfState {
    /// Direction to the sound in listener space
    pub direction: Vec3,
    /// 0.0 = plain panning, 1.0 = fully directional
    pub blend: f32,
    /// Keep `direction` fixed instead of tracking the sound
    pub position_locked: bool,
}

/// One playing sound
#[derive(Default)]
pub struct Channel {
    /// Identity, 0 while the slot is free
    pub guid: u32,
    pub source: Option<Arc<AudioSource>>,
    pub mixer: Option<Box<dyn AudioMixer>>,
    pub volumes: SpeakerVolumes,
    /// Requested loudness before spatialization, 0 - 255
    pub master_vol: f32,
    pub pitch: f32,
    pub origin: Vec3,
    /// Facing of the emitter, zero for non-directional sounds
    pub direction: Vec3,
    /// Attenuation per unit of distance
    pub dist_mult: f32,
    /// Computed level in dB after attenuation
    pub sound_level: f32,
    /// Share of the signal sent to the room bus, 0.0 - 1.0
    pub dsp_mix: f32,
    /// Share of the direct signal sent to the facing-away bus, 0.0 - 1.0
    pub dsp_face: f32,
    pub flags: ChannelFlags,
    pub hrtf: HrtfState,
    /// Output samples this channel has produced, mixed or skipped
    pub samples_emitted: u64,
    /// 1-based slot in the active set, 0 when inactive
    pub(crate) active_index: usize,
}

impl Channel {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.guid == 0
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active_index != 0
    }

    /// Present but not mixing this frame
    #[inline]
    pub fn is_dormant(&self) -> bool {
        self.mixer.is_none() || self.flags.paused
    }

    /// Read-only snapshot for diagnostics
    pub fn info(&self, index: usize) -> ChannelInfo {
        ChannelInfo {
            index,
            guid: self.guid,
            source: self
                .source
                .as_ref()
                .map(|s| s.name().to_string())
                .unwrap_or_default(),
            position: self.mixer.as_ref().map(|m| m.sample_position()).unwrap_or(0),
            samples_emitted: self.samples_emitted,
            pitch: self.pitch,
            volumes: self.volumes.current(),
            sound_level: self.sound_level,
            dry: self.flags.dry,
            speaker: self.flags.speaker,
            paused: self.flags.paused,
        }
    }
}

/// Diagnostics row for one channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub index: usize,
    pub guid: u32,
    pub source: String,
    pub position: u32,
    pub samples_emitted: u64,
    pub pitch: f32,
    pub volumes: [f32; SPEAKER_COUNT],
    pub sound_level: f32,
    pub dry: bool,
    pub speaker: bool,
    pub paused: bool,
}
