//! Mixer counters readable from any thread
//!
//! The mixing thread stores these once per frame; readers poll them
//! without locking. All operations use `Ordering::Relaxed`: they are
//! diagnostics, not synchronization.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct MixerStats {
    /// Channels in the active set during the last frame
    pub active_channels: AtomicU32,
    /// Channels that contributed to the buses in the last frame
    pub mixed_channels: AtomicU32,
    /// Channels advanced without output by duplicate culling
    pub quashed_channels: AtomicU32,
    /// Channels waiting on data in the last frame
    pub not_ready_channels: AtomicU32,
    /// Channels skipped because every speaker volume was 0
    pub silent_channels: AtomicU32,
    pub painted_time: AtomicU64,
    pub frames: AtomicU64,
    /// Fast/generic mismatches seen in verify mode
    pub verify_failures: AtomicU64,
    /// Sounds that never got a channel
    pub start_failures: AtomicU64,
    /// Channels freed after finishing or falling silent
    pub finished_channels: AtomicU64,
}

/// Plain copy of [`MixerStats`] for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub active_channels: u32,
    pub mixed_channels: u32,
    pub quashed_channels: u32,
    pub not_ready_channels: u32,
    pub silent_channels: u32,
    pub painted_time: u64,
    pub frames: u64,
    pub verify_failures: u64,
    pub start_failures: u64,
    pub finished_channels: u64,
}

/// Per-frame tallies the engine publishes in one go
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FrameCounts {
    pub active: u32,
    pub mixed: u32,
    pub quashed: u32,
    pub not_ready: u32,
    pub silent: u32,
}

impl MixerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish_frame(&self, counts: FrameCounts, painted_time: u64) {
        self.active_channels.store(counts.active, Ordering::Relaxed);
        self.mixed_channels.store(counts.mixed, Ordering::Relaxed);
        self.quashed_channels.store(counts.quashed, Ordering::Relaxed);
        self.not_ready_channels.store(counts.not_ready, Ordering::Relaxed);
        self.silent_channels.store(counts.silent, Ordering::Relaxed);
        self.painted_time.store(painted_time, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verify_failures(&self) -> u64 {
        self.verify_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_channels: self.active_channels.load(Ordering::Relaxed),
            mixed_channels: self.mixed_channels.load(Ordering::Relaxed),
            quashed_channels: self.quashed_channels.load(Ordering::Relaxed),
            not_ready_channels: self.not_ready_channels.load(Ordering::Relaxed),
            silent_channels: self.silent_channels.load(Ordering::Relaxed),
            painted_time: self.painted_time.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            verify_failures: self.verify_failures.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            finished_channels: self.finished_channels.load(Ordering::Relaxed),
        }
    }
}
