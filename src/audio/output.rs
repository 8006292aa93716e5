//! Output device abstraction and negotiation
//!
//! The engine talks to hardware through the [`OutputBackend`] trait: a
//! capability-query contract (supported rates/channels), open/pause/resume/
//! close, and a pull callback invoked from the device's realtime context.
//! [`CpalBackend`] is the production implementation; tests substitute an
//! in-memory backend to exercise negotiation and fallback without hardware.
//!
//! Negotiation itself is a pure function over [`DeviceCapabilities`]:
//! attempt a hardware-direct open at the source's exact format, and degrade
//! to the shared mixer rate (with decode-side resampling) when the device
//! refuses. Degradation is never a playback-stopping error.

use crate::audio::types::{AudioDeviceInfo, DeviceCapabilities, OutputPlan, StreamSpec};
use crate::error::{Error, Result};
use crate::profiles::DeviceProfile;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{debug, info, warn};

/// Fill callback handed to the backend. Receives an interleaved f32 buffer
/// to fill completely; invoked from the realtime context, so it must not
/// block or allocate.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Sample rates probed when building a device capability description.
const STANDARD_RATES: [u32; 8] = [
    22050, 44100, 48000, 88200, 96000, 176400, 192000, 352800,
];

/// Polymorphic output backend.
///
/// Implementations live on the engine thread for their whole life; the
/// realtime callback they spawn is the only thing that escapes it.
pub trait OutputBackend {
    /// Enumerate devices and their capabilities.
    fn devices(&self) -> Result<Vec<DeviceCapabilities>>;

    /// Open a stream per the negotiated plan. The callback starts being
    /// invoked before this returns.
    fn open(&mut self, plan: &OutputPlan, callback: OutputCallback) -> Result<()>;

    /// Suspend the stream (callback stops firing; buffer contents keep).
    fn pause(&mut self) -> Result<()>;

    /// Resume a suspended stream.
    fn resume(&mut self) -> Result<()>;

    /// Tear down the stream.
    fn close(&mut self);

    /// Whether a stream is currently open.
    fn is_open(&self) -> bool;
}

/// Pick the device negotiation targets.
///
/// Prefers `preferred` by name, then the system default, then the first
/// enumerated device.
pub fn select_device<'a>(
    devices: &'a [DeviceCapabilities],
    preferred: Option<&str>,
) -> Result<&'a DeviceCapabilities> {
    if let Some(name) = preferred {
        if let Some(caps) = devices.iter().find(|d| d.name == name) {
            return Ok(caps);
        }
        warn!("Preferred device '{}' not found, using default", name);
    }

    devices
        .iter()
        .find(|d| d.is_default)
        .or_else(|| devices.first())
        .ok_or_else(|| Error::Negotiation("no output devices available".into()))
}

/// Build the most faithful plan the device claims to support.
///
/// When the profile allows exclusive mode and the device advertises the
/// source's exact format, the plan is hardware-direct and bit-exact
/// (subject to DSP state). Otherwise it is the shared fallback.
pub fn negotiate(
    caps: &DeviceCapabilities,
    source: &StreamSpec,
    profile: &DeviceProfile,
) -> OutputPlan {
    let buffer_size = (profile.buffer_size != 0).then_some(profile.buffer_size);

    if profile.exclusive_mode && caps.supports_exact(source) {
        debug!(
            "Negotiated exclusive path on '{}': {} Hz / {} ch",
            caps.name, source.sample_rate, source.channels
        );
        return OutputPlan {
            device_name: caps.name.clone(),
            sample_rate: source.sample_rate,
            channels: source.channels,
            exclusive: true,
            shared_mode: false,
            resampled: false,
            buffer_size,
        };
    }

    shared_fallback(caps, source, profile)
}

/// The degraded path: shared mixer rate, decode-side resampling when the
/// source rate differs.
pub fn shared_fallback(
    caps: &DeviceCapabilities,
    source: &StreamSpec,
    profile: &DeviceProfile,
) -> OutputPlan {
    let channels = source.channels.clamp(1, caps.max_channels.max(1));
    let resampled =
        caps.default_sample_rate != source.sample_rate || channels != source.channels;

    debug!(
        "Negotiated shared path on '{}': {} Hz / {} ch (resampled: {})",
        caps.name, caps.default_sample_rate, channels, resampled
    );

    OutputPlan {
        device_name: caps.name.clone(),
        sample_rate: caps.default_sample_rate,
        channels,
        exclusive: false,
        shared_mode: true,
        resampled,
        buffer_size: (profile.buffer_size != 0).then_some(profile.buffer_size),
    }
}

/// List output devices for the control plane.
pub fn list_output_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDeviceInfo {
            is_default: Some(&name) == default_name.as_ref(),
            name,
        })
        .collect();

    Ok(devices)
}

/// Production backend built on cpal.
pub struct CpalBackend {
    host: cpal::Host,
    stream: Option<Stream>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            stream: None,
        }
    }

    fn find_device(&self, name: &str) -> Result<Device> {
        let mut devices = self
            .host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

        devices
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or_else(|| Error::AudioOutput(format!("Device '{}' not found", name)))
    }

    /// Describe one cpal device as plain capability data.
    fn describe(device: &Device, is_default: bool) -> Option<DeviceCapabilities> {
        let name = device.name().ok()?;

        let configs: Vec<_> = device.supported_output_configs().ok()?.collect();
        if configs.is_empty() {
            return None;
        }

        let mut sample_rates: Vec<u32> = STANDARD_RATES
            .iter()
            .copied()
            .filter(|&rate| {
                configs
                    .iter()
                    .any(|c| c.min_sample_rate().0 <= rate && rate <= c.max_sample_rate().0)
            })
            .collect();
        sample_rates.dedup();

        let max_channels = configs.iter().map(|c| c.channels()).max().unwrap_or(2);

        let default_sample_rate = device
            .default_output_config()
            .map(|c| c.sample_rate().0)
            .unwrap_or(44100);

        Some(DeviceCapabilities {
            name,
            is_default,
            sample_rates,
            max_channels,
            default_sample_rate,
        })
    }

    fn build_stream(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        mut callback: OutputCallback,
    ) -> Result<Stream> {
        let err_fn = |err| warn!("Audio stream error: {}", err);

        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_output_stream(
                    config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        callback(data);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?,
            SampleFormat::I16 => {
                // Scratch buffer sized once; the callback path must not
                // allocate, so resizing only happens if the device asks for
                // more than this on the first cycle.
                let mut scratch = vec![0.0f32; 16384];
                device
                    .build_output_stream(
                        config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            if scratch.len() < data.len() {
                                scratch.resize(data.len(), 0.0);
                            }
                            let scratch = &mut scratch[..data.len()];
                            callback(scratch);
                            for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                                *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?
            }
            other => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };

        Ok(stream)
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for CpalBackend {
    fn devices(&self) -> Result<Vec<DeviceCapabilities>> {
        let default_name = self
            .host
            .default_output_device()
            .and_then(|d| d.name().ok());

        let devices = self
            .host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| {
                let is_default = device.name().ok() == default_name;
                Self::describe(&device, is_default)
            })
            .collect();

        Ok(devices)
    }

    fn open(&mut self, plan: &OutputPlan, callback: OutputCallback) -> Result<()> {
        self.close();

        let device = self.find_device(&plan.device_name)?;

        let mut config = StreamConfig {
            channels: plan.channels,
            sample_rate: cpal::SampleRate(plan.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        if let Some(size) = plan.buffer_size {
            config.buffer_size = cpal::BufferSize::Fixed(size);
        }

        // Prefer f32 output; fall back to i16 with conversion in the
        // callback shim.
        let sample_format = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to query configs: {}", e)))?
            .find(|c| {
                c.channels() == plan.channels
                    && c.min_sample_rate().0 <= plan.sample_rate
                    && plan.sample_rate <= c.max_sample_rate().0
            })
            .map(|c| c.sample_format())
            .ok_or_else(|| {
                Error::AudioOutput(format!(
                    "Device '{}' rejected {} Hz / {} ch",
                    plan.device_name, plan.sample_rate, plan.channels
                ))
            })?;

        let stream = Self::build_stream(&device, &config, sample_format, callback)?;
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;

        info!(
            "Opened '{}' at {} Hz / {} ch ({})",
            plan.device_name,
            plan.sample_rate,
            plan.channels,
            if plan.exclusive { "exclusive" } else { "shared" }
        );

        self.stream = Some(stream);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to resume stream: {}", e)))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!("Audio stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_48k_only() -> DeviceCapabilities {
        DeviceCapabilities {
            name: "USB DAC".into(),
            is_default: true,
            sample_rates: vec![48000],
            max_channels: 2,
            default_sample_rate: 48000,
        }
    }

    fn caps_multirate() -> DeviceCapabilities {
        DeviceCapabilities {
            name: "HiFi DAC".into(),
            is_default: false,
            sample_rates: vec![44100, 48000, 96000, 192000],
            max_channels: 8,
            default_sample_rate: 48000,
        }
    }

    fn source_cd() -> StreamSpec {
        StreamSpec {
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: Some(16),
        }
    }

    fn exclusive_profile(name: &str) -> DeviceProfile {
        DeviceProfile {
            device_name: name.to_string(),
            exclusive_mode: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_exclusive_negotiation_when_supported() {
        let caps = caps_multirate();
        let plan = negotiate(&caps, &source_cd(), &exclusive_profile("HiFi DAC"));

        assert!(plan.exclusive);
        assert!(!plan.shared_mode);
        assert!(!plan.resampled);
        assert_eq!(plan.sample_rate, 44100);
        assert_eq!(plan.channels, 2);
    }

    #[test]
    fn test_fallback_when_rate_unsupported() {
        // 44.1kHz source on a device that only does 48kHz: shared mode with
        // resampling, never an error.
        let caps = caps_48k_only();
        let plan = negotiate(&caps, &source_cd(), &exclusive_profile("USB DAC"));

        assert!(!plan.exclusive);
        assert!(plan.shared_mode);
        assert!(plan.resampled);
        assert_eq!(plan.sample_rate, 48000);
    }

    #[test]
    fn test_shared_when_profile_disallows_exclusive() {
        let caps = caps_multirate();
        let profile = DeviceProfile {
            device_name: "HiFi DAC".into(),
            exclusive_mode: false,
            ..Default::default()
        };
        let plan = negotiate(&caps, &source_cd(), &profile);

        assert!(!plan.exclusive);
        assert!(plan.shared_mode);
        // Source rate differs from the mixer rate, so the path resamples
        assert!(plan.resampled);
    }

    #[test]
    fn test_shared_fallback_same_rate_not_resampled() {
        let caps = caps_48k_only();
        let source = StreamSpec {
            sample_rate: 48000,
            channels: 2,
            bits_per_sample: Some(24),
        };
        let plan = shared_fallback(&caps, &source, &DeviceProfile::default());

        assert!(plan.shared_mode);
        assert!(!plan.resampled);
    }

    #[test]
    fn test_buffer_size_from_profile() {
        let caps = caps_multirate();
        let profile = DeviceProfile {
            device_name: "HiFi DAC".into(),
            exclusive_mode: true,
            buffer_size: 512,
            ..Default::default()
        };
        let plan = negotiate(&caps, &source_cd(), &profile);
        assert_eq!(plan.buffer_size, Some(512));

        let plan = negotiate(&caps, &source_cd(), &exclusive_profile("HiFi DAC"));
        assert_eq!(plan.buffer_size, None);
    }

    #[test]
    fn test_select_device_prefers_named_then_default() {
        let devices = vec![caps_multirate(), caps_48k_only()];

        let chosen = select_device(&devices, Some("HiFi DAC")).unwrap();
        assert_eq!(chosen.name, "HiFi DAC");

        let chosen = select_device(&devices, None).unwrap();
        assert_eq!(chosen.name, "USB DAC");

        let chosen = select_device(&devices, Some("Missing")).unwrap();
        assert_eq!(chosen.name, "USB DAC");

        assert!(select_device(&[], None).is_err());
    }
}
