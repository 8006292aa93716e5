//! Shared fixtures: WAV generation and a hardware-free output backend.
#![allow(dead_code)]

use parking_lot::Mutex;
use purist::audio::{DeviceCapabilities, OutputBackend, OutputCallback, OutputPlan};
use purist::error::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Write a 16-bit PCM WAV containing a pure sine tone.
pub fn write_sine_wav(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    duration_secs: f64,
    freq_hz: f64,
) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let frames = (duration_secs * sample_rate as f64) as usize;
    for i in 0..frames {
        let t = i as f64 / sample_rate as f64;
        let sample = (0.4 * (2.0 * std::f64::consts::PI * freq_hz * t).sin() * 32767.0) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
    path
}

/// Observable state shared between a [`MockBackend`] (owned by the engine
/// thread) and the test body.
pub struct MockOutput {
    open: AtomicBool,
    playing: AtomicBool,
    plan: Mutex<Option<OutputPlan>>,
    callback: Mutex<Option<OutputCallback>>,
    captured: Mutex<Vec<f32>>,
}

impl MockOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            plan: Mutex::new(None),
            callback: Mutex::new(None),
            captured: Mutex::new(Vec::new()),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn plan(&self) -> Option<OutputPlan> {
        self.plan.lock().clone()
    }

    pub fn captured_len(&self) -> usize {
        self.captured.lock().len()
    }

    pub fn captured(&self) -> Vec<f32> {
        self.captured.lock().clone()
    }

    /// Stand-in for the device's realtime pull: invoke the callback for
    /// `samples` samples if a stream is open and playing, appending the
    /// output to the capture log.
    pub fn pump(&self, samples: usize) {
        if !self.is_open() || !self.is_playing() {
            return;
        }
        let mut callback = self.callback.lock();
        if let Some(cb) = callback.as_mut() {
            let mut buf = vec![0.0f32; samples];
            cb(&mut buf);
            self.captured.lock().extend_from_slice(&buf);
        }
    }
}

/// Output backend over fixed, synthetic device capabilities.
pub struct MockBackend {
    devices: Vec<DeviceCapabilities>,
    state: Arc<MockOutput>,
}

impl MockBackend {
    pub fn new(devices: Vec<DeviceCapabilities>, state: Arc<MockOutput>) -> Self {
        Self { devices, state }
    }
}

impl OutputBackend for MockBackend {
    fn devices(&self) -> Result<Vec<DeviceCapabilities>> {
        Ok(self.devices.clone())
    }

    fn open(&mut self, plan: &OutputPlan, callback: OutputCallback) -> Result<()> {
        *self.state.plan.lock() = Some(plan.clone());
        *self.state.callback.lock() = Some(callback);
        self.state.open.store(true, Ordering::Release);
        self.state.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.state.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.state.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        self.state.open.store(false, Ordering::Release);
        self.state.playing.store(false, Ordering::Release);
        *self.state.callback.lock() = None;
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }
}

/// A device that supports the common rates exactly.
pub fn hifi_device() -> DeviceCapabilities {
    DeviceCapabilities {
        name: "Mock HiFi DAC".into(),
        is_default: true,
        sample_rates: vec![44100, 48000, 88200, 96000, 176400, 192000],
        max_channels: 8,
        default_sample_rate: 48000,
    }
}

/// A device locked to 48kHz shared mode.
pub fn consumer_device() -> DeviceCapabilities {
    DeviceCapabilities {
        name: "Mock Onboard Audio".into(),
        is_default: true,
        sample_rates: vec![48000],
        max_channels: 2,
        default_sample_rate: 48000,
    }
}
