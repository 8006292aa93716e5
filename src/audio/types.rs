//! Core audio data types
//!
//! Source stream descriptions, collaborator-provided track metadata, and
//! the device capability / negotiation types shared between the engine and
//! the output backend.

use crate::dsp::replaygain::ReplayGainInfo;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Format of a decoded PCM stream as probed from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Native sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Source bit depth. None for formats without a fixed depth
    /// (e.g. lossy codecs).
    pub bits_per_sample: Option<u32>,
}

/// The few metadata fields the engine consumes. Produced by a
/// [`MetadataSource`] collaborator; the engine never parses tags itself.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track duration in seconds (0.0 if the container does not report it)
    pub duration_secs: f64,

    /// Native PCM format of the source
    pub spec: StreamSpec,

    /// ReplayGain values, if the collaborator found any
    pub replaygain: ReplayGainInfo,
}

/// Collaborator seam for track metadata.
///
/// The default implementation probes container/codec parameters via
/// symphonia. An outer application with a tag library can substitute its
/// own source, including real ReplayGain tag values.
pub trait MetadataSource: Send + Sync {
    /// Probe a file, returning the fields the engine needs.
    ///
    /// Must fail with [`crate::Error::UnsupportedFormat`] for files the
    /// decode capability cannot handle, so `Play` can reject them
    /// synchronously.
    fn probe(&self, path: &Path) -> Result<TrackInfo>;
}

/// An enumerable output device, as reported to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Capability description of one output device, used by negotiation.
///
/// Kept as plain data so negotiation is a pure function testable without
/// hardware.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// Device name (unique key, as reported by the backend)
    pub name: String,

    /// Whether this is the system default device
    pub is_default: bool,

    /// Sample rates the device can be opened at directly
    pub sample_rates: Vec<u32>,

    /// Maximum channel count
    pub max_channels: u16,

    /// Sample rate the shared mixer runs at
    pub default_sample_rate: u32,
}

impl DeviceCapabilities {
    /// Whether the device can be opened format-exact for the given source.
    pub fn supports_exact(&self, spec: &StreamSpec) -> bool {
        self.sample_rates.contains(&spec.sample_rate) && spec.channels <= self.max_channels
    }
}

/// The reproduction path chosen by negotiation for one track.
///
/// Derived once per `Play`, immutable while the stream is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPlan {
    /// Device the stream was opened on
    pub device_name: String,

    /// Rate the device is running at
    pub sample_rate: u32,

    /// Channel count presented to the device
    pub channels: u16,

    /// True when the device was opened hardware-direct at the source format
    pub exclusive: bool,

    /// True when routed through the system mixer
    pub shared_mode: bool,

    /// True when the path is not bit-exact to the source (rate conversion
    /// or channel remapping in effect)
    pub resampled: bool,

    /// Requested buffer size in frames (None = device default)
    pub buffer_size: Option<u32>,
}
