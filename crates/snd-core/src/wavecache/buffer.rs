//! Stream buffer slots and the transient pool

use crate::engine::gc::WaveBytes;

#[derive(Default)]
pub(crate) enum BufferState {
    #[default]
    Empty,
    Loading,
    Ready(WaveBytes),
    Failed,
}

/// One fixed-size window of a stream
#[derive(Default)]
pub(crate) struct StreamBuffer {
    /// Byte offset within the data chunk
    pub start: u32,
    pub len: u32,
    pub state: BufferState,
    /// Bumped on every reset so late completions can be recognized
    pub generation: u32,
}

impl StreamBuffer {
    pub fn is_empty(&self) -> bool {
        matches!(self.state, BufferState::Empty)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, BufferState::Ready(_))
    }

    pub fn contains(&self, pos: u32) -> bool {
        !self.is_empty() && pos >= self.start && pos < self.start + self.len
    }

    pub fn resident_bytes(&self) -> usize {
        match &self.state {
            BufferState::Ready(bytes) => bytes.len(),
            _ => 0,
        }
    }

    /// Return the slot to empty, dropping any data
    pub fn reset(&mut self) {
        self.state = BufferState::Empty;
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Counting pool of transient stream buffers
///
/// Single-play streams draw their buffers from here so a burst of one-shot
/// sounds cannot grow stream memory without bound.
#[derive(Debug)]
pub(crate) struct TransientPool {
    capacity: usize,
    free: usize,
}

impl TransientPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: capacity,
        }
    }

    pub fn try_take(&mut self, buffers: usize) -> bool {
        if buffers > self.free {
            return false;
        }
        self.free -= buffers;
        true
    }

    pub fn give_back(&mut self, buffers: usize) {
        self.free = (self.free + buffers).min(self.capacity);
    }

    pub fn free(&self) -> usize {
        self.free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = TransientPool::new(4);
        assert!(pool.try_take(3));
        assert!(!pool.try_take(2));
        pool.give_back(3);
        assert!(pool.try_take(4));
        pool.give_back(10);
        assert_eq!(pool.free(), 4);
    }

    #[test]
    fn test_reset_bumps_generation() {
        let mut buffer = StreamBuffer {
            start: 10,
            len: 5,
            state: BufferState::Loading,
            generation: 7,
        };
        assert!(buffer.contains(14));
        assert!(!buffer.contains(15));
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(!buffer.contains(12));
        assert_eq!(buffer.generation, 8);
    }
}
