//! ReplayGain loudness normalization
//!
//! Applies a per-track or per-album linear scalar resolved from
//! collaborator-provided metadata. When the mode is Off (or no tags were
//! found) the signal path is 100% untouched, preserving bit-perfect
//! playback. Clipping prevention caps the gain so `gain * peak <= 1.0`.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// ReplayGain operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
}

/// Per-track ReplayGain values handed in by the metadata collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayGainInfo {
    /// Track gain in dB (e.g. -7.5)
    pub track_gain_db: Option<f32>,

    /// Track peak as a linear value (e.g. 0.98)
    pub track_peak: Option<f32>,

    /// Album gain in dB
    pub album_gain_db: Option<f32>,

    /// Album peak as a linear value
    pub album_peak: Option<f32>,
}

/// Convert decibels to a linear amplitude factor.
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Resolved ReplayGain state for the active track.
pub struct ReplayGainState {
    mode: ReplayGainMode,
    clipping_prevention: bool,
    info: ReplayGainInfo,
    /// Cached linear gain; recalculated when mode/info changes
    gain_linear: f32,
}

impl ReplayGainState {
    pub fn new() -> Self {
        Self {
            mode: ReplayGainMode::Off,
            clipping_prevention: true,
            info: ReplayGainInfo::default(),
            gain_linear: 1.0,
        }
    }

    pub fn set_mode(&mut self, mode: ReplayGainMode) {
        self.mode = mode;
        self.recalculate();
        debug!("ReplayGain mode {:?}, linear gain {:.4}", mode, self.gain_linear);
    }

    pub fn mode(&self) -> ReplayGainMode {
        self.mode
    }

    pub fn set_clipping_prevention(&mut self, on: bool) {
        self.clipping_prevention = on;
        self.recalculate();
    }

    pub fn clipping_prevention(&self) -> bool {
        self.clipping_prevention
    }

    /// Install the active track's metadata values.
    pub fn set_track_info(&mut self, info: ReplayGainInfo) {
        self.info = info;
        self.recalculate();
    }

    /// The linear gain currently applied (1.0 = passthrough).
    pub fn gain_linear(&self) -> f32 {
        self.gain_linear
    }

    /// True when this stage cannot alter the signal.
    pub fn is_unity(&self) -> bool {
        (self.gain_linear - 1.0).abs() < f32::EPSILON
    }

    fn recalculate(&mut self) {
        let gain_db = match self.mode {
            ReplayGainMode::Off => {
                self.gain_linear = 1.0;
                return;
            }
            ReplayGainMode::Track => self.info.track_gain_db,
            // Fall back to track gain when album gain is missing
            ReplayGainMode::Album => self.info.album_gain_db.or(self.info.track_gain_db),
        };

        let Some(db) = gain_db else {
            // No tags found: passthrough
            self.gain_linear = 1.0;
            return;
        };

        let mut gain = db_to_linear(db);

        // Cap the gain so the boosted peak never exceeds full scale
        if self.clipping_prevention {
            let peak = match self.mode {
                ReplayGainMode::Track => self.info.track_peak,
                ReplayGainMode::Album => self.info.album_peak.or(self.info.track_peak),
                ReplayGainMode::Off => None,
            };

            if let Some(peak) = peak {
                if peak > 0.0 {
                    gain = gain.min(1.0 / peak);
                }
            }
        }

        self.gain_linear = gain;
    }

    /// Apply the gain to interleaved samples in place.
    ///
    /// Skips the buffer entirely when the gain is exactly 1.0 so the Off
    /// (or tagless) path stays bit-identical.
    #[inline]
    pub fn apply(&self, samples: &mut [f32]) {
        if self.is_unity() {
            return;
        }

        let g = self.gain_linear;
        for s in samples.iter_mut() {
            *s *= g;
        }
    }
}

impl Default for ReplayGainState {
    fn default() -> Self {
        Self::new()
    }
}
