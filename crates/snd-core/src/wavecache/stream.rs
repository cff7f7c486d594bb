//! Multi-buffer streaming sessions
//!
//! A session owns a small ring of fixed-size buffers. Buffers are filled in
//! stream order starting at `front`; when the reader moves past a buffer it
//! is discarded and refilled with the next window, wrapping to the loop
//! position at the end of the data. Memory per session is therefore
//! `num_buffers * buffer_size` regardless of the sound's length.

use crate::error::{SoundError, SoundResult};
use crate::engine::gc::WaveBytes;

use super::buffer::{BufferState, StreamBuffer};
use super::{StreamFlags, StreamParams};

/// A buffer fill the cache must schedule
pub(crate) struct LoadJob {
    pub name: String,
    pub slot: usize,
    pub generation: u32,
    /// Absolute file offset
    pub offset: u64,
    pub len: usize,
}

pub(crate) struct StreamEntry {
    pub name: String,
    data_start: u64,
    data_size: u32,
    buffer_size: u32,
    loop_pos: Option<u32>,
    pub flags: StreamFlags,
    buffers: Vec<StreamBuffer>,
    front: usize,
    /// Next data offset to load, `None` once the stream has no more
    next_start: Option<u32>,
    /// Loads scheduled but not yet completed, including stale ones
    pub pending: usize,
    pub closed: bool,
    pub error: Option<SoundError>,
    /// Queued sessions do not load until first polled
    pub started: bool,
}

impl StreamEntry {
    pub fn new(params: &StreamParams) -> Self {
        let mut buffers = Vec::with_capacity(params.num_buffers);
        buffers.resize_with(params.num_buffers, StreamBuffer::default);
        let mut entry = Self {
            name: params.name.clone(),
            data_start: params.data_start,
            data_size: params.data_size,
            buffer_size: params.buffer_size as u32,
            loop_pos: params.loop_pos,
            flags: params.flags,
            buffers,
            front: 0,
            next_start: None,
            pending: 0,
            closed: false,
            error: None,
            started: !params.flags.queued_load,
        };
        entry.next_start = entry.wrap(params.start_pos);
        entry
    }

    /// Where reading continues from `pos`, following the loop at the end
    fn wrap(&self, pos: u32) -> Option<u32> {
        if pos < self.data_size {
            return Some(pos);
        }
        if self.flags.single_play {
            return None;
        }
        self.loop_pos.filter(|&p| p < self.data_size)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Assign every empty slot the next window of the stream
    pub fn prefetch(&mut self, jobs: &mut dyn FnMut(LoadJob)) {
        if self.closed || self.error.is_some() || !self.started {
            return;
        }
        let n = self.buffers.len();
        for k in 0..n {
            let slot = (self.front + k) % n;
            if !self.buffers[slot].is_empty() {
                continue;
            }
            let Some(start) = self.next_start else {
                break;
            };
            let len = self.buffer_size.min(self.data_size - start);
            let buffer = &mut self.buffers[slot];
            buffer.start = start;
            buffer.len = len;
            buffer.state = BufferState::Loading;
            self.pending += 1;
            jobs(LoadJob {
                name: self.name.clone(),
                slot,
                generation: buffer.generation,
                offset: self.data_start + start as u64,
                len: len as usize,
            });
            self.next_start = self.wrap(start + len);
        }
    }

    /// Store a finished load; stale or closed results are dropped
    pub fn install(&mut self, slot: usize, generation: u32, result: SoundResult<WaveBytes>) {
        self.pending = self.pending.saturating_sub(1);
        if self.closed {
            return;
        }
        let Some(buffer) = self.buffers.get_mut(slot) else {
            return;
        };
        if buffer.generation != generation || !matches!(buffer.state, BufferState::Loading) {
            return;
        }
        match result {
            Ok(bytes) if bytes.is_empty() => {
                buffer.state = BufferState::Failed;
                self.error = Some(SoundError::SourceNotSetUp);
            }
            Ok(bytes) => {
                // Short read: the file is smaller than its header claims
                buffer.len = buffer.len.min(bytes.len() as u32);
                buffer.state = BufferState::Ready(bytes);
            }
            Err(e) => {
                buffer.state = BufferState::Failed;
                self.error = Some(e);
            }
        }
    }

    pub fn start(&mut self, jobs: &mut dyn FnMut(LoadJob)) {
        if !self.started {
            self.started = true;
            self.prefetch(jobs);
        }
    }

    /// Ring position of the buffer holding `pos`
    fn find(&self, pos: u32) -> Option<usize> {
        let n = self.buffers.len();
        (0..n).find(|&k| self.buffers[(self.front + k) % n].contains(pos))
    }

    fn discard_before(&mut self, k: usize) {
        let n = self.buffers.len();
        for _ in 0..k {
            self.buffers[self.front].reset();
            self.front = (self.front + 1) % n;
        }
    }

    /// Ring buffers ahead of slot `k` that end at or before `pos`
    ///
    /// Stops at the first buffer past `pos` in data order, so a read that
    /// wrapped to the loop start never releases the tail of the data.
    fn passed_before(&self, k: usize, pos: u32) -> usize {
        let n = self.buffers.len();
        (0..k)
            .take_while(|&i| {
                let buffer = &self.buffers[(self.front + i) % n];
                buffer.start + buffer.len <= pos
            })
            .count()
    }

    /// The reader's cursor has reached `pos`; release every buffer ahead
    /// of the one holding it, across the loop wrap included
    pub fn release_before(&mut self, pos: u32, jobs: &mut dyn FnMut(LoadJob)) {
        if self.closed || self.error.is_some() {
            return;
        }
        if let Some(k) = self.find(pos).filter(|&k| k > 0) {
            self.discard_before(k);
            self.prefetch(jobs);
        }
    }

    /// Drop everything and stream again from `pos`
    fn restart_at(&mut self, pos: u32) {
        for buffer in &mut self.buffers {
            buffer.reset();
        }
        self.front = 0;
        self.next_start = self.wrap(pos);
    }

    /// Copy whatever is resident starting at `pos`; never waits
    ///
    /// Buffers wholly before `pos` are released and refilled; buffers on
    /// the far side of the loop wrap wait for [`release_before`]. A
    /// position outside every buffer restarts the stream there and
    /// returns 0.
    ///
    /// [`release_before`]: StreamEntry::release_before
    pub fn copy(&mut self, dst: &mut [u8], pos: u32, jobs: &mut dyn FnMut(LoadJob)) -> usize {
        if self.closed || self.error.is_some() || dst.is_empty() {
            return 0;
        }
        if !self.started {
            self.started = true;
        }

        let Some(k) = self.find(pos) else {
            log::debug!("[WAVECACHE] {} restarting stream at byte {}", self.name, pos);
            self.restart_at(pos);
            self.prefetch(jobs);
            return 0;
        };
        let n = self.buffers.len();
        let mut slot = (self.front + k) % n;
        let passed = self.passed_before(k, pos);
        if passed > 0 {
            self.discard_before(passed);
        }
        self.prefetch(jobs);

        let mut cursor = pos;
        let mut copied = 0;
        loop {
            let buffer = &self.buffers[slot];
            let BufferState::Ready(bytes) = &buffer.state else {
                break;
            };
            if !buffer.contains(cursor) {
                break;
            }
            let offset = (cursor - buffer.start) as usize;
            let available = (buffer.len as usize).min(bytes.len()) - offset;
            let take = available.min(dst.len() - copied);
            dst[copied..copied + take].copy_from_slice(&bytes[offset..offset + take]);
            copied += take;
            cursor += take as u32;

            if copied == dst.len() {
                break;
            }
            slot = (slot + 1) % n;
            if slot == self.front {
                break;
            }
        }
        copied
    }

    pub fn is_ready(&self) -> bool {
        self.error.is_none() && self.buffers.get(self.front).is_some_and(StreamBuffer::is_ready)
    }

    pub fn front_data(&self) -> Option<WaveBytes> {
        match &self.buffers.get(self.front)?.state {
            BufferState::Ready(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Release the front buffer if it has been filled
    pub fn discard_front(&mut self, jobs: &mut dyn FnMut(LoadJob)) {
        if self.buffers.get(self.front).is_some_and(StreamBuffer::is_ready) {
            self.discard_before(1);
            self.prefetch(jobs);
        }
    }

    /// Patch the loop point into a live session
    pub fn update_loop_position(&mut self, loop_pos: u32, jobs: &mut dyn FnMut(LoadJob)) {
        self.loop_pos = Some(loop_pos);
        if self.next_start.is_none() {
            self.next_start = self.wrap(self.data_size);
        }
        self.prefetch(jobs);
    }

    pub fn close(&mut self) {
        self.closed = true;
        for buffer in &mut self.buffers {
            buffer.reset();
        }
    }

    pub fn resident_bytes(&self) -> usize {
        self.buffers.iter().map(StreamBuffer::resident_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gc::share_bytes;

    fn params(data_size: u32, buffer_size: usize, num_buffers: usize, loop_pos: Option<u32>) -> StreamParams {
        StreamParams {
            name: "s".into(),
            data_size,
            data_start: 100,
            start_pos: 0,
            loop_pos,
            buffer_size,
            num_buffers,
            flags: StreamFlags::default(),
        }
    }

    /// Serve every job immediately with bytes equal to the low offset byte
    fn run_jobs(entry: &mut StreamEntry, jobs: Vec<LoadJob>) {
        for job in jobs {
            let bytes = (0..job.len).map(|i| ((job.offset - 100) as usize + i) as u8).collect();
            entry.install(job.slot, job.generation, Ok(share_bytes(bytes)));
        }
    }

    fn collect(entry: &mut StreamEntry, f: impl FnOnce(&mut StreamEntry, &mut dyn FnMut(LoadJob))) -> Vec<LoadJob> {
        let mut jobs = Vec::new();
        f(entry, &mut |job| jobs.push(job));
        jobs
    }

    #[test]
    fn test_prefetch_fills_ring_in_order() {
        let mut entry = StreamEntry::new(&params(100, 16, 3, None));
        let jobs = collect(&mut entry, |e, j| e.prefetch(j));
        let offsets: Vec<u64> = jobs.iter().map(|j| j.offset).collect();
        assert_eq!(offsets, vec![100, 116, 132]);
        assert_eq!(entry.pending, 3);
    }

    #[test]
    fn test_reading_past_buffer_refills_and_wraps_to_loop() {
        let mut entry = StreamEntry::new(&params(40, 16, 2, Some(8)));
        let jobs = collect(&mut entry, |e, j| e.prefetch(j));
        run_jobs(&mut entry, jobs);

        // Move into the second buffer; the first is refilled from 32
        let mut dst = [0u8; 4];
        let jobs = collect(&mut entry, |e, j| {
            assert_eq!(e.copy(&mut dst, 20, j), 4);
        });
        assert_eq!(dst, [20, 21, 22, 23]);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].offset, 132);
        assert_eq!(jobs[0].len, 8);
        run_jobs(&mut entry, jobs);

        // The tail buffer ends the data, the next window starts at the loop
        let jobs = collect(&mut entry, |e, j| {
            assert_eq!(e.copy(&mut dst, 36, j), 4);
        });
        assert_eq!(dst, [36, 37, 38, 39]);
        assert_eq!(jobs[0].offset, 108);
    }

    #[test]
    fn test_lookahead_past_loop_keeps_tail_buffer() {
        let mut entry = StreamEntry::new(&params(40, 16, 3, Some(8)));
        let jobs = collect(&mut entry, |e, j| e.prefetch(j));
        run_jobs(&mut entry, jobs);
        let mut dst = [0u8; 4];
        for pos in [20, 36] {
            let jobs = collect(&mut entry, |e, j| {
                e.copy(&mut dst, pos, j);
            });
            run_jobs(&mut entry, jobs);
        }
        // Ring is now [32, 40) [8, 24) [24, 40)

        // A filter reading ahead of the cursor wraps to the loop start
        let jobs = collect(&mut entry, |e, j| {
            assert_eq!(e.copy(&mut dst, 8, j), 4);
        });
        assert!(jobs.is_empty());
        assert_eq!(dst, [8, 9, 10, 11]);

        // The cursor itself is still in the tail
        let jobs = collect(&mut entry, |e, j| {
            assert_eq!(e.copy(&mut dst, 38, j), 2);
        });
        assert!(jobs.is_empty());
        assert_eq!(dst[..2], [38, 39]);

        // Once the cursor wraps the tail is released and refilled
        let jobs = collect(&mut entry, |e, j| e.release_before(10, j));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].offset, 108);
        assert_eq!(jobs[0].len, 16);
    }

    #[test]
    fn test_single_play_ignores_loop() {
        let mut p = params(32, 16, 4, Some(0));
        p.flags.single_play = true;
        let mut entry = StreamEntry::new(&p);
        let jobs = collect(&mut entry, |e, j| e.prefetch(j));
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let mut entry = StreamEntry::new(&params(64, 16, 2, None));
        let jobs = collect(&mut entry, |e, j| e.prefetch(j));

        // Seek far away before the loads finish
        let mut dst = [0u8; 4];
        let restart = collect(&mut entry, |e, j| {
            assert_eq!(e.copy(&mut dst, 48, j), 0);
        });
        run_jobs(&mut entry, jobs);
        assert!(!entry.is_ready());
        assert_eq!(entry.pending, 1);

        run_jobs(&mut entry, restart);
        assert!(entry.is_ready());
        assert_eq!(entry.pending, 0);
    }

    #[test]
    fn test_load_error_sticks() {
        let mut entry = StreamEntry::new(&params(64, 16, 2, None));
        let jobs = collect(&mut entry, |e, j| e.prefetch(j));
        entry.install(jobs[0].slot, jobs[0].generation, Err(SoundError::FileNotFound));
        assert_eq!(entry.error, Some(SoundError::FileNotFound));
        let mut dst = [0u8; 4];
        let more = collect(&mut entry, |e, j| {
            assert_eq!(e.copy(&mut dst, 0, j), 0);
        });
        assert!(more.is_empty());
    }

    #[test]
    fn test_late_loop_position_resumes_prefetch() {
        let mut entry = StreamEntry::new(&params(16, 16, 2, None));
        let jobs = collect(&mut entry, |e, j| e.prefetch(j));
        assert_eq!(jobs.len(), 1);
        let jobs = collect(&mut entry, |e, j| e.update_loop_position(4, j));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].offset, 104);
    }
}
