//! Engine configuration
//!
//! Tunable parameters for the playback engine, loadable from a TOML file
//! with sensible defaults for every field.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Ring buffer capacity in samples. Power of two, roughly 1.5 seconds of
/// stereo audio at 44.1kHz.
pub const DEFAULT_RING_CAPACITY: usize = 131072;

/// Playback engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample ring buffer capacity (samples, must be a power of two)
    pub ring_capacity: usize,

    /// Fade-in/fade-out envelope length for pause/resume/start/stop (ms)
    pub fade_ms: u64,

    /// Crossfade window at gapless track boundaries (ms)
    pub crossfade_ms: u64,

    /// Command queue depth
    pub command_queue_depth: usize,

    /// Preferred output device name (None = system default)
    pub preferred_device: Option<String>,

    /// Directory for persisted device profiles (None = no persistence)
    pub profile_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            fade_ms: 50,
            crossfade_ms: 2000,
            command_queue_depth: 64,
            preferred_device: None,
            profile_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: EngineConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.ring_capacity.is_power_of_two() {
            return Err(Error::Config(format!(
                "ring_capacity must be a power of two (got {})",
                self.ring_capacity
            )));
        }
        if self.command_queue_depth == 0 {
            return Err(Error::Config("command_queue_depth must be non-zero".into()));
        }
        Ok(())
    }
}
