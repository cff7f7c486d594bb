//! Output device ring
//!
//! Stands in for the DMA buffer of a sound card: a fixed ring of
//! interleaved 16-bit frames addressed by painted time modulo capacity.
//! Main-bus samples are clipped through the master scale on the way in,
//! and a consumer (the render tool, a backend callback) reads frames out
//! in order.

use super::paint::PaintBuffer;
use super::scale::MasterScale;
use crate::config::SurroundMode;

pub struct OutputDevice {
    surround: SurroundMode,
    channels: usize,
    capacity: usize,
    samples: Vec<i16>,
    master: MasterScale,
    /// Frames handed to the consumer so far
    read_time: u64,
}

impl OutputDevice {
    /// Ring of `capacity` frames in `surround` layout
    pub fn new(surround: SurroundMode, capacity: usize, master_volume: f32) -> Self {
        let channels = surround.device_channels();
        let capacity = capacity.max(1);
        Self {
            surround,
            channels,
            capacity,
            samples: vec![0; capacity * channels],
            master: MasterScale::new(master_volume),
            read_time: 0,
        }
    }

    /// Capacity in frames
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn surround(&self) -> SurroundMode {
        self.surround
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master = MasterScale::new(volume);
    }

    pub fn master(&self) -> MasterScale {
        self.master
    }

    pub fn read_time(&self) -> u64 {
        self.read_time
    }

    /// Frames painted but not yet read
    pub fn queued(&self, painted_time: u64) -> usize {
        painted_time.saturating_sub(self.read_time) as usize
    }

    /// Raw interleaved ring contents
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Write `count` frames of `main` at `painted_time`
    ///
    /// At most two contiguous slices: up to the end of the ring, then from
    /// its start. Never writes more than one ring's worth.
    pub fn transfer_paintbuffer(&mut self, main: &PaintBuffer, painted_time: u64, count: usize) {
        let count = count.min(self.capacity);
        let start = (painted_time % self.capacity as u64) as usize;
        let first = count.min(self.capacity - start);
        self.write_frames(main, 0, start, first);
        if first < count {
            self.write_frames(main, first, 0, count - first);
        }
    }

    fn write_frames(&mut self, main: &PaintBuffer, src: usize, dst: usize, n: usize) {
        let master = self.master;
        let channels = self.channels;
        let out = &mut self.samples[dst * channels..(dst + n) * channels];
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            let front = main.front[src + i];
            frame[0] = master.apply(front.left);
            frame[1] = master.apply(front.right);
            if channels == 2 {
                continue;
            }
            let rear = main.rear.as_ref().map(|r| r[src + i]).unwrap_or_default();
            let center = main.center.as_ref().map(|c| c[src + i]).unwrap_or(0);
            if channels == 4 {
                frame[2] = master.apply(rear.left);
                frame[3] = master.apply(rear.right);
            } else {
                frame[2] = master.apply(center);
                // No LFE feed
                frame[3] = 0;
                frame[4] = master.apply(rear.left);
                frame[5] = master.apply(rear.right);
            }
        }
    }

    /// Copy up to `frames` unread frames into `out` (interleaved)
    ///
    /// Reads never pass `painted_time`. Returns the frames copied.
    pub fn read_frames(&mut self, painted_time: u64, frames: usize, out: &mut Vec<i16>) -> usize {
        let n = frames.min(self.queued(painted_time)).min(self.capacity);
        let start = (self.read_time % self.capacity as u64) as usize;
        let first = n.min(self.capacity - start);
        out.extend_from_slice(&self.samples[start * self.channels..(start + first) * self.channels]);
        out.extend_from_slice(&self.samples[..(n - first) * self.channels]);
        self.read_time += n as u64;
        n
    }
}
