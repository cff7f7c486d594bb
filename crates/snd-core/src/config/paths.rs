//! Standard locations for mixer settings

use std::path::PathBuf;

/// Get the settings directory
///
/// Returns: `~/.config/snd-core` (platform config dir), or `./snd-core`
/// when no home is available.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snd-core")
}

/// Get the path of a named config file inside [`default_config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
