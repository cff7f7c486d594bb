//! snd-core - Real-time sound mixing with an async streaming wave cache

pub mod types;
pub mod error;
pub mod config;
pub mod audio_file;
pub mod channel;
pub mod source;
pub mod spatial;
pub mod wavecache;
pub mod engine;

pub use types::*;
pub use error::{SoundError, SoundResult};
pub use config::{InterpolationMethod, MixConfig, StreamConfig, SurroundMode};
pub use engine::{MixController, MixEngine, StartParams};
pub use spatial::Listener;
pub use wavecache::{AsyncWaveCache, FsLoader, MemoryLoader, WaveLoader};
