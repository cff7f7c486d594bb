//! Sound error types
//!
//! The closed set of failures the mixer and wave cache report. They are
//! returned by value; nothing on the mixing path panics on a bad asset.

use thiserror::Error;

/// Errors that can occur while starting or feeding a sound
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundError {
    /// The loader has no file with this name
    #[error("file not found")]
    FileNotFound,

    /// The transient stream buffer pool is exhausted
    #[error("no stream buffer available")]
    NoStreamBuffer,

    /// The name could not be mapped to a loadable resource
    #[error("cannot resolve name")]
    CannotResolveName,

    /// The request was deliberately not serviced (no free channel, queue full)
    #[error("skipped")]
    Skipped,

    /// The source exists but its data is unusable
    #[error("source not set up")]
    SourceNotSetUp,

    /// The source could not produce a mixer
    #[error("cannot create mixer")]
    CannotCreateMixer,
}

/// Result type for sound operations
pub type SoundResult<T> = Result<T, SoundError>;
