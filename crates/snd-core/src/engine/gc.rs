//! Deferred deallocation for wave buffers
//!
//! Loaded sample data is wrapped in `basedrop::Shared`. When the mixing
//! thread drops the last reference (a stream buffer is discarded, a
//! channel stops), the free is queued and performed here on the
//! `audio-gc` thread instead of inside the mixing pass.

use basedrop::{Collector, Handle, Shared};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Wave payload bytes shared between the cache and mixers
pub type WaveBytes = Shared<Vec<u8>>;

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(Duration::from_millis(100));
            }
        })
        .expect("Failed to spawn audio GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Get a handle for creating `Shared<T>` allocations
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

/// Move loaded bytes under collector ownership
pub fn share_bytes(bytes: Vec<u8>) -> WaveBytes {
    Shared::new(&gc_handle(), bytes)
}
