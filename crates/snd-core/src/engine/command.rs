//! Lock-free control of the mixing thread
//!
//! Game or tool code runs on a control thread and talks to the engine only
//! through an `rtrb` ring of [`MixCommand`]s. The engine drains the ring at
//! the start of every frame, so state never changes mid-frame and neither
//! side ever blocks.
//!
//! Guids are reserved on the control side from the counter the registry
//! shares, which lets callers address a sound before the engine has
//! picked it up.

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use super::stats::MixerStats;
use crate::channel::next_guid;
use crate::error::{SoundError, SoundResult};
use crate::source::{AudioSource, SourceCache};
use crate::spatial::Listener;
use crate::types::Vec3;

/// Queue depth between control and mixing threads
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// How a sound should start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartParams {
    /// 0 - 255
    pub volume: f32,
    pub pitch: f32,
    pub origin: Vec3,
    /// Emitter facing; zero for non-directional sounds
    pub direction: Vec3,
    /// Attenuation per unit of distance
    pub dist_mult: f32,
    /// Played through an in-world speaker
    pub speaker: bool,
    /// Take a slot from the static pool instead of the dynamic one
    pub static_slot: bool,
    pub start_paused: bool,
    /// First sample to play
    pub start_sample: u32,
    /// Cut playback short here; also stops looping
    pub end_sample: Option<u32>,
}

impl Default for StartParams {
    fn default() -> Self {
        Self {
            volume: 255.0,
            pitch: 1.0,
            origin: [0.0; 3],
            direction: [0.0; 3],
            dist_mult: 0.0,
            speaker: false,
            static_slot: false,
            start_paused: false,
            start_sample: 0,
            end_sample: None,
        }
    }
}

/// Commands sent from the control thread to the mixing thread
pub enum MixCommand {
    // ─────────────────────────────────────────────────────────────
    // Channel lifetime
    // ─────────────────────────────────────────────────────────────
    /// Start `source` on a new channel identified by `guid`
    StartSound {
        guid: u32,
        source: Arc<AudioSource>,
        params: StartParams,
    },
    StopSound { guid: u32 },
    StopAll,

    // ─────────────────────────────────────────────────────────────
    // Channel parameters
    // ─────────────────────────────────────────────────────────────
    SetVolume { guid: u32, volume: f32 },
    SetPitch { guid: u32, pitch: f32 },
    SetPaused { guid: u32, paused: bool },
    SetOrigin { guid: u32, origin: Vec3 },

    // ─────────────────────────────────────────────────────────────
    // Global
    // ─────────────────────────────────────────────────────────────
    SetListener(Listener),
    SetMasterVolume(f32),
}

/// Create the command ring
pub fn command_channel() -> (rtrb::Producer<MixCommand>, rtrb::Consumer<MixCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Control-thread side of the engine
pub struct MixController {
    producer: rtrb::Producer<MixCommand>,
    guids: Arc<AtomicU32>,
    stats: Arc<MixerStats>,
    sources: Arc<SourceCache>,
}

impl MixController {
    pub(crate) fn new(
        producer: rtrb::Producer<MixCommand>,
        guids: Arc<AtomicU32>,
        stats: Arc<MixerStats>,
        sources: Arc<SourceCache>,
    ) -> Self {
        Self {
            producer,
            guids,
            stats,
            sources,
        }
    }

    /// Queue a command (non-blocking)
    ///
    /// Returns `Err(cmd)` if the queue is full.
    pub fn send(&mut self, cmd: MixCommand) -> Result<(), MixCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(value) => value,
        })
    }

    pub fn has_space(&self) -> bool {
        self.producer.slots() > 0
    }

    /// Look up `name` and queue it to start; returns the new guid
    ///
    /// Fails with [`SoundError::Skipped`] when the queue is full.
    pub fn start_sound(&mut self, name: &str, params: StartParams) -> SoundResult<u32> {
        let source = self.sources.find_or_create(name)?;
        self.start_source(source, params)
    }

    pub fn start_source(&mut self, source: Arc<AudioSource>, params: StartParams) -> SoundResult<u32> {
        let guid = next_guid(&self.guids);
        self.send(MixCommand::StartSound { guid, source, params })
            .map_err(|_| SoundError::Skipped)?;
        Ok(guid)
    }

    pub fn stop_sound(&mut self, guid: u32) -> bool {
        self.send(MixCommand::StopSound { guid }).is_ok()
    }

    pub fn stop_all(&mut self) -> bool {
        self.send(MixCommand::StopAll).is_ok()
    }

    pub fn set_volume(&mut self, guid: u32, volume: f32) -> bool {
        self.send(MixCommand::SetVolume { guid, volume }).is_ok()
    }

    pub fn set_pitch(&mut self, guid: u32, pitch: f32) -> bool {
        self.send(MixCommand::SetPitch { guid, pitch }).is_ok()
    }

    pub fn set_paused(&mut self, guid: u32, paused: bool) -> bool {
        self.send(MixCommand::SetPaused { guid, paused }).is_ok()
    }

    pub fn set_origin(&mut self, guid: u32, origin: Vec3) -> bool {
        self.send(MixCommand::SetOrigin { guid, origin }).is_ok()
    }

    pub fn set_listener(&mut self, listener: Listener) -> bool {
        self.send(MixCommand::SetListener(listener)).is_ok()
    }

    pub fn set_master_volume(&mut self, volume: f32) -> bool {
        self.send(MixCommand::SetMasterVolume(volume)).is_ok()
    }

    pub fn stats(&self) -> &Arc<MixerStats> {
        &self.stats
    }

    pub fn sources(&self) -> &Arc<SourceCache> {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_roundtrip() {
        let (mut tx, mut rx) = command_channel();
        tx.push(MixCommand::StopSound { guid: 7 }).unwrap();
        assert!(matches!(rx.pop().unwrap(), MixCommand::StopSound { guid: 7 }));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_size() {
        // Stays within two cache lines for the ring
        let size = std::mem::size_of::<MixCommand>();
        assert!(size <= 128, "MixCommand is {} bytes, expected <= 128", size);
    }
}
