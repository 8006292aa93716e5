//! Control-plane commands
//!
//! Tagged union consumed exactly once by the engine loop's single-threaded
//! dispatcher. Fire-and-forget by design: failures inside a handler are
//! reflected in the next state/diagnostics snapshot, never thrown back at
//! the caller. Request/response operations (null test, device profiles,
//! device enumeration) live on the [`AudioEngine`](super::engine::AudioEngine)
//! handle instead.

use crate::audio::types::TrackInfo;
use crate::dsp::{EqPreset, ReplayGainMode};
use std::path::PathBuf;

/// Commands accepted by the engine loop.
///
/// `Play` and `QueueNext` carry the synchronously probed [`TrackInfo`] so
/// the loop never blocks on I/O it could have rejected up front.
#[derive(Debug)]
pub enum PlaybackCommand {
    /// Start playing a file, tearing down any current playback
    Play { path: PathBuf, info: TrackInfo },

    /// Queue the next track for gapless continuation
    QueueNext { path: PathBuf, info: TrackInfo },

    /// Halt feeding and silence the device, preserving position and buffer
    Pause,

    /// Resume from the preserved position
    Resume,

    /// Flush everything and return to idle
    Stop,

    /// Jump to a position in seconds
    Seek(f64),

    /// Master volume, clamped into [0, 1] before being applied
    SetVolume(f32),

    /// Equalizer enable/bypass
    SetEqEnabled(bool),

    /// One equalizer band gain in dB
    SetEqBand { band: usize, gain_db: f32 },

    /// Apply a named equalizer preset
    SetEqPreset(EqPreset),

    /// ReplayGain operating mode
    SetReplayGainMode(ReplayGainMode),

    /// ReplayGain clipping prevention (peak-based gain cap) on/off
    SetClippingPrevention(bool),

    /// Orderly engine shutdown
    Shutdown,
}
