//! Channel state flags
//!
//! Named booleans instead of a packed bitfield. The all-false default is
//! the valid state of a freshly zeroed slot.

use crate::source::SourceFlags;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFlags {
    /// Bypass spatial buses, route to the dry bus
    pub dry: bool,
    /// Played through an in-world speaker entity
    pub speaker: bool,
    /// Volumes not yet spatialized; the next pass sets them without a ramp
    pub first_pass: bool,
    pub paused: bool,
    /// Source carries approach/recede channels
    pub doppler: bool,
    /// Ignore position, play at full volume on every speaker
    pub omni: bool,
    /// Data arrives through a streaming session
    pub stream: bool,
}

impl ChannelFlags {
    /// Initial flags for a channel playing a source with `source` flags
    pub fn for_source(source: &SourceFlags) -> Self {
        Self {
            dry: source.dry,
            doppler: source.doppler,
            omni: source.omni,
            stream: source.stream,
            first_pass: true,
            ..Self::default()
        }
    }
}
