//! Async wave data cache
//!
//! Supplies sample bytes to mixers without ever blocking the mixing pass.
//! Two load models share one cache:
//!
//! - **Whole**: the data chunk is loaded as one blob. Callers get a handle
//!   immediately and poll [`AsyncWaveCache::is_data_load_completed`].
//! - **Streamed**: a ring of fixed-size buffers is kept filled ahead of
//!   the reader ([`AsyncWaveCache::open_streamed_load`]). Reads copy only
//!   what is resident and report the byte count.
//!
//! ## Threading
//!
//! Loads run on a small rayon pool through the [`WaveLoader`]. Finished
//! loads are posted on a crossbeam channel and installed by whichever
//! thread polls next, so loader threads never take the cache lock. The lock
//! itself only guards bookkeeping; no I/O happens while it is held.

mod buffer;
mod loader;
mod stream;

pub use loader::{FsLoader, LoaderReader, MemoryLoader, WaveLoader};

#[cfg(test)]
pub(crate) use loader::test_support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::StreamConfig;
use crate::engine::gc::{share_bytes, WaveBytes};
use crate::error::{SoundError, SoundResult};

use buffer::TransientPool;
use stream::{LoadJob, StreamEntry};

/// Longest a synchronous stream read waits for its buffer
const SYNC_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque reference to a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveHandle(u32);

/// Streaming behavior switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFlags {
    /// Play through once; never wrap to the loop position
    pub single_play: bool,
    /// Buffers come from the shared transient pool
    pub transient: bool,
    /// Defer the first loads until the session is first polled
    pub queued_load: bool,
}

/// Arguments to [`AsyncWaveCache::open_streamed_load`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub name: String,
    /// Bytes in the data chunk
    pub data_size: u32,
    /// File offset of the data chunk
    pub data_start: u64,
    /// First data byte to stream
    pub start_pos: u32,
    /// Data byte to continue from after the end
    pub loop_pos: Option<u32>,
    pub buffer_size: usize,
    pub num_buffers: usize,
    pub flags: StreamFlags,
}

/// Result of polling a whole load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStatus {
    pub completed: bool,
    /// Data is resident and usable
    pub valid: bool,
    /// The file does not exist
    pub missing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WholeKey {
    name: String,
    start: u64,
    size: u32,
}

enum WholeState {
    Pending,
    Ready(WaveBytes),
    Failed(SoundError),
    Discarded,
}

struct WholeEntry {
    key: WholeKey,
    state: WholeState,
    refs: u32,
}

enum Entry {
    Whole(WholeEntry),
    Stream(StreamEntry),
}

enum LoadTarget {
    Whole,
    Buffer { slot: usize, generation: u32 },
}

struct LoadDone {
    handle: WaveHandle,
    target: LoadTarget,
    result: SoundResult<WaveBytes>,
}

struct CacheState {
    next_handle: u32,
    entries: HashMap<WaveHandle, Entry>,
    whole_by_key: HashMap<WholeKey, WaveHandle>,
    transient: TransientPool,
}

impl CacheState {
    fn alloc_handle(&mut self) -> WaveHandle {
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        WaveHandle(self.next_handle)
    }

    fn install(&mut self, done: LoadDone) {
        match (self.entries.get_mut(&done.handle), done.target) {
            (Some(Entry::Whole(entry)), LoadTarget::Whole) => {
                if matches!(entry.state, WholeState::Pending) {
                    entry.state = match done.result {
                        Ok(bytes) => WholeState::Ready(bytes),
                        Err(e) => {
                            log::warn!("[WAVECACHE] load of {} failed: {}", entry.key.name, e);
                            WholeState::Failed(e)
                        }
                    };
                }
            }
            (Some(Entry::Stream(entry)), LoadTarget::Buffer { slot, generation }) => {
                entry.install(slot, generation, done.result);
                if entry.closed && entry.pending == 0 {
                    // Last in-flight buffer of a closed session has drained
                    if entry.flags.transient {
                        self.transient.give_back(entry.buffer_count());
                    }
                    self.entries.remove(&done.handle);
                }
            }
            // Entry already gone; the bytes drop on the collector thread
            _ => {}
        }
    }
}

pub struct AsyncWaveCache {
    loader: Arc<dyn WaveLoader>,
    state: Mutex<CacheState>,
    done_tx: Sender<LoadDone>,
    done_rx: Receiver<LoadDone>,
    pool: Option<rayon::ThreadPool>,
}

impl AsyncWaveCache {
    pub fn new(loader: Arc<dyn WaveLoader>, config: &StreamConfig) -> Self {
        let (done_tx, done_rx) = channel::unbounded();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.loader_threads.max(1))
            .thread_name(|i| format!("wave-loader-{}", i))
            .build()
            .map_err(|e| log::warn!("[WAVECACHE] loader pool unavailable ({}), using global pool", e))
            .ok();

        Self {
            loader,
            state: Mutex::new(CacheState {
                next_handle: 0,
                entries: HashMap::new(),
                whole_by_key: HashMap::new(),
                transient: TransientPool::new(config.transient_pool_buffers),
            }),
            done_tx,
            done_rx,
            pool,
        }
    }

    pub fn loader(&self) -> &Arc<dyn WaveLoader> {
        &self.loader
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock and install every finished load
    fn pumped(&self) -> MutexGuard<'_, CacheState> {
        let mut state = self.state();
        while let Ok(done) = self.done_rx.try_recv() {
            state.install(done);
        }
        state
    }

    fn spawn(&self, handle: WaveHandle, target: LoadTarget, name: String, offset: u64, len: usize) {
        let loader = Arc::clone(&self.loader);
        let tx = self.done_tx.clone();
        let job = move || {
            let result = loader.read(&name, offset, len).map(share_bytes);
            // Receiver gone means the cache was dropped
            let _ = tx.send(LoadDone {
                handle,
                target,
                result,
            });
        };
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }

    fn spawn_stream_job(&self, handle: WaveHandle, job: LoadJob) {
        self.spawn(
            handle,
            LoadTarget::Buffer {
                slot: job.slot,
                generation: job.generation,
            },
            job.name,
            job.offset,
            job.len,
        );
    }

    fn with_stream<R>(
        &self,
        handle: WaveHandle,
        default: R,
        f: impl FnOnce(&mut StreamEntry, &mut dyn FnMut(LoadJob)) -> R,
    ) -> R {
        let mut state = self.pumped();
        let Some(Entry::Stream(entry)) = state.entries.get_mut(&handle) else {
            return default;
        };
        f(entry, &mut |job| self.spawn_stream_job(handle, job))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Whole loads
    // ────────────────────────────────────────────────────────────────────────

    fn load_whole(&self, name: &str, size: u32, start: u64, take_ref: bool) -> WaveHandle {
        let key = WholeKey {
            name: name.to_string(),
            start,
            size,
        };
        let mut state = self.pumped();
        if let Some(&handle) = state.whole_by_key.get(&key) {
            if let Some(Entry::Whole(entry)) = state.entries.get_mut(&handle) {
                if take_ref {
                    entry.refs += 1;
                }
                return handle;
            }
        }

        let handle = state.alloc_handle();
        state.whole_by_key.insert(key.clone(), handle);
        state.entries.insert(
            handle,
            Entry::Whole(WholeEntry {
                key,
                state: WholeState::Pending,
                refs: u32::from(take_ref),
            }),
        );
        drop(state);

        log::debug!("[WAVECACHE] loading {} ({} bytes at {})", name, size, start);
        self.spawn(handle, LoadTarget::Whole, name.to_string(), start, size as usize);
        handle
    }

    /// Start loading `size` bytes at `start`; returns at once
    ///
    /// Repeated requests for the same range share one entry.
    pub fn async_load_cache(&self, name: &str, size: u32, start: u64) -> WaveHandle {
        self.load_whole(name, size, start, true)
    }

    /// Warm the cache without holding a reference
    pub fn prefetch(&self, name: &str, size: u32, start: u64) {
        self.load_whole(name, size, start, false);
    }

    pub fn is_data_load_completed(&self, handle: WaveHandle) -> LoadStatus {
        let state = self.pumped();
        match state.entries.get(&handle) {
            Some(Entry::Whole(entry)) => match &entry.state {
                WholeState::Pending | WholeState::Discarded => LoadStatus::default(),
                WholeState::Ready(_) => LoadStatus {
                    completed: true,
                    valid: true,
                    missing: false,
                },
                WholeState::Failed(e) => LoadStatus {
                    completed: true,
                    valid: false,
                    missing: *e == SoundError::FileNotFound,
                },
            },
            _ => LoadStatus {
                completed: true,
                valid: false,
                missing: false,
            },
        }
    }

    pub fn is_data_load_in_progress(&self, handle: WaveHandle) -> bool {
        let state = self.pumped();
        matches!(
            state.entries.get(&handle),
            Some(Entry::Whole(WholeEntry {
                state: WholeState::Pending,
                ..
            }))
        )
    }

    /// Loaded bytes, once the load has completed
    pub fn get_data_pointer(&self, handle: WaveHandle) -> Option<WaveBytes> {
        let state = self.pumped();
        match state.entries.get(&handle) {
            Some(Entry::Whole(WholeEntry {
                state: WholeState::Ready(bytes),
                ..
            })) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Copy loaded bytes from `offset`; 0 until the load completes
    pub fn copy_data_into_memory(&self, handle: WaveHandle, dst: &mut [u8], offset: usize) -> usize {
        let Some(bytes) = self.get_data_pointer(handle) else {
            return 0;
        };
        if offset >= bytes.len() {
            return 0;
        }
        let take = dst.len().min(bytes.len() - offset);
        dst[..take].copy_from_slice(&bytes[offset..offset + take]);
        take
    }

    /// Load again after a failure or discard
    pub fn restart_data_load(&self, handle: WaveHandle) {
        let mut state = self.pumped();
        let Some(Entry::Whole(entry)) = state.entries.get_mut(&handle) else {
            return;
        };
        if !matches!(entry.state, WholeState::Failed(_) | WholeState::Discarded) {
            return;
        }
        entry.state = WholeState::Pending;
        let key = entry.key.clone();
        drop(state);
        self.spawn(handle, LoadTarget::Whole, key.name, key.start, key.size as usize);
    }

    /// Drop one reference; the entry goes away with the last
    pub fn unload(&self, handle: WaveHandle) {
        let mut state = self.pumped();
        let remove = match state.entries.get_mut(&handle) {
            Some(Entry::Whole(entry)) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            _ => false,
        };
        if remove {
            if let Some(Entry::Whole(entry)) = state.entries.remove(&handle) {
                state.whole_by_key.remove(&entry.key);
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Streaming
    // ────────────────────────────────────────────────────────────────────────

    pub fn open_streamed_load(&self, params: StreamParams) -> SoundResult<WaveHandle> {
        if params.name.is_empty() {
            return Err(SoundError::CannotResolveName);
        }
        if params.num_buffers == 0 || params.buffer_size == 0 {
            return Err(SoundError::SourceNotSetUp);
        }

        let mut state = self.pumped();
        if params.flags.transient && !state.transient.try_take(params.num_buffers) {
            log::warn!(
                "[WAVECACHE] no transient buffers for {} ({} free)",
                params.name,
                state.transient.free()
            );
            return Err(SoundError::NoStreamBuffer);
        }

        let handle = state.alloc_handle();
        let mut entry = StreamEntry::new(&params);
        entry.prefetch(&mut |job| self.spawn_stream_job(handle, job));
        state.entries.insert(handle, Entry::Stream(entry));
        Ok(handle)
    }

    /// End a session; in-flight loads drain in the background
    pub fn close_streamed_load(&self, handle: WaveHandle) {
        let mut state = self.pumped();
        let Some(Entry::Stream(entry)) = state.entries.get_mut(&handle) else {
            return;
        };
        entry.close();
        if entry.pending == 0 {
            let transient = entry.flags.transient.then(|| entry.buffer_count());
            state.entries.remove(&handle);
            if let Some(buffers) = transient {
                state.transient.give_back(buffers);
            }
        }
    }

    pub fn is_streamed_data_ready(&self, handle: WaveHandle) -> bool {
        self.with_stream(handle, false, |entry, jobs| {
            entry.start(jobs);
            entry.is_ready()
        })
    }

    /// Load failure of a session, if any
    pub fn stream_error(&self, handle: WaveHandle) -> Option<SoundError> {
        let state = self.pumped();
        match state.entries.get(&handle) {
            Some(Entry::Stream(entry)) => entry.error,
            _ => Some(SoundError::SourceNotSetUp),
        }
    }

    /// Front buffer of a session; `sync` waits for it (tools only)
    pub fn get_streamed_data_pointer(&self, handle: WaveHandle, sync: bool) -> Option<WaveBytes> {
        let deadline = Instant::now() + SYNC_LOAD_TIMEOUT;
        loop {
            let (data, waiting) = self.with_stream(handle, (None, false), |entry, jobs| {
                entry.start(jobs);
                (entry.front_data(), entry.error.is_none() && entry.pending > 0)
            });
            if data.is_some() || !sync || !waiting {
                return data;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!("[WAVECACHE] timed out waiting for stream data");
                return None;
            }
            match self.done_rx.recv_timeout(deadline - now) {
                Ok(done) => self.state().install(done),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Copy resident bytes starting at data offset `start_pos`
    ///
    /// Never waits for I/O. Returns how many bytes were copied, which may
    /// be fewer than requested (or 0) while buffers are still loading.
    pub fn copy_streamed_data_into_memory(&self, handle: WaveHandle, dst: &mut [u8], start_pos: u32) -> usize {
        self.with_stream(handle, 0, |entry, jobs| entry.copy(dst, start_pos, jobs))
    }

    /// Tell a session its reader has moved to data offset `pos`
    ///
    /// Buffers ahead of the one holding `pos` are released and refilled,
    /// including the tail of the data once playback has looped.
    pub fn release_streamed_data_before(&self, handle: WaveHandle, pos: u32) {
        self.with_stream(handle, (), |entry, jobs| entry.release_before(pos, jobs));
    }

    /// Release a consumed buffer (stream front) or a whole blob
    pub fn mark_buffer_discarded(&self, handle: WaveHandle) {
        let mut state = self.pumped();
        match state.entries.get_mut(&handle) {
            Some(Entry::Stream(entry)) => {
                entry.discard_front(&mut |job| self.spawn_stream_job(handle, job));
            }
            Some(Entry::Whole(entry)) => {
                if matches!(entry.state, WholeState::Ready(_)) {
                    entry.state = WholeState::Discarded;
                }
            }
            None => {}
        }
    }

    pub fn update_loop_position(&self, handle: WaveHandle, loop_pos: u32) {
        self.with_stream(handle, (), |entry, jobs| entry.update_loop_position(loop_pos, jobs));
    }

    // ────────────────────────────────────────────────────────────────────────
    // Maintenance
    // ────────────────────────────────────────────────────────────────────────

    /// Drop unreferenced whole entries and drained closed sessions
    pub fn flush(&self) {
        let mut state = self.pumped();
        let mut returned = 0;
        let CacheState {
            entries,
            whole_by_key,
            ..
        } = &mut *state;
        entries.retain(|_, entry| match entry {
            Entry::Whole(whole) => {
                let keep = whole.refs > 0;
                if !keep {
                    whole_by_key.remove(&whole.key);
                }
                keep
            }
            Entry::Stream(stream) => {
                let keep = !(stream.closed && stream.pending == 0);
                if !keep && stream.flags.transient {
                    returned += stream.buffer_count();
                }
                keep
            }
        });
        state.transient.give_back(returned);
    }

    pub fn memory_usage(&self) -> usize {
        let state = self.pumped();
        state
            .entries
            .values()
            .map(|entry| match entry {
                Entry::Whole(WholeEntry {
                    state: WholeState::Ready(bytes),
                    ..
                }) => bytes.len(),
                Entry::Whole(_) => 0,
                Entry::Stream(stream) => stream.resident_bytes(),
            })
            .sum()
    }

    pub fn entry_count(&self) -> usize {
        self.pumped().entries.len()
    }

    /// Log a summary of what the cache holds
    pub fn spew_memory_usage(&self) {
        let state = self.pumped();
        let mut whole = (0usize, 0usize);
        let mut streams = (0usize, 0usize);
        for entry in state.entries.values() {
            match entry {
                Entry::Whole(e) => {
                    whole.0 += 1;
                    if let WholeState::Ready(bytes) = &e.state {
                        whole.1 += bytes.len();
                    }
                }
                Entry::Stream(s) => {
                    streams.0 += 1;
                    streams.1 += s.resident_bytes();
                }
            }
        }
        log::info!(
            "[WAVECACHE] {} whole entries ({} KB), {} streams ({} KB), {} transient buffers free",
            whole.0,
            whole.1 / 1024,
            streams.0,
            streams.1 / 1024,
            state.transient.free()
        );
    }
}

#[cfg(test)]
pub(crate) fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
