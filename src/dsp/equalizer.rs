//! 10-band graphic equalizer
//!
//! Ten peaking biquad filters at octave-ish spacing (31 Hz – 16 kHz), run
//! in series per channel with f64 state persistent across blocks. The
//! disabled state is a true bypass: `process` returns before reading a
//! single sample, so the output is bit-identical to the input.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of equalizer bands
pub const NUM_BANDS: usize = 10;

/// Band center frequencies in Hz
pub const BAND_FREQUENCIES: [f32; NUM_BANDS] = [
    31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

/// Allowed band gain range in dB
pub const GAIN_RANGE_DB: (f32, f32) = (-12.0, 12.0);

/// Q factor shared by all bands (moderate bandwidth)
const BAND_Q: f64 = 1.414;

/// Named equalizer presets with the corresponding band gain tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EqPreset {
    Flat,
    Rock,
    Pop,
    Jazz,
    Classical,
    BassBoost,
    Vocal,
    Electronic,
    Custom,
}

impl EqPreset {
    /// Band gains for this preset. `Custom` has no table of its own.
    pub fn gains(&self) -> Option<[f32; NUM_BANDS]> {
        match self {
            EqPreset::Flat => Some([0.0; NUM_BANDS]),
            EqPreset::Rock => Some([5.0, 4.0, 2.0, 0.0, -1.0, 1.0, 3.0, 4.0, 5.0, 5.0]),
            EqPreset::Pop => Some([-1.0, 2.0, 4.0, 5.0, 4.0, 2.0, 0.0, -1.0, -1.0, -1.0]),
            EqPreset::Jazz => Some([3.0, 2.0, 0.0, 2.0, -2.0, -2.0, 0.0, 2.0, 3.0, 4.0]),
            EqPreset::Classical => Some([4.0, 3.0, 2.0, 1.0, -1.0, -1.0, 0.0, 2.0, 3.0, 4.0]),
            EqPreset::BassBoost => Some([8.0, 6.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            EqPreset::Vocal => Some([-2.0, -1.0, 0.0, 3.0, 5.0, 5.0, 3.0, 1.0, 0.0, -1.0]),
            EqPreset::Electronic => Some([5.0, 4.0, 1.0, 0.0, -2.0, 2.0, 1.0, 3.0, 5.0, 4.0]),
            EqPreset::Custom => None,
        }
    }
}

/// Two-pole recursive peaking filter (RBJ cookbook form).
#[derive(Clone)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    // Delay lines, one slot per channel
    x1: Vec<f64>,
    x2: Vec<f64>,
    y1: Vec<f64>,
    y2: Vec<f64>,
}

impl Biquad {
    fn new(channels: usize) -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: vec![0.0; channels],
            x2: vec![0.0; channels],
            y1: vec![0.0; channels],
            y2: vec![0.0; channels],
        }
    }

    /// Design a peaking EQ section for the given gain.
    fn set_peaking(&mut self, sample_rate: f64, freq: f64, gain_db: f64, q: f64) {
        let a = 10.0_f64.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f64::consts::PI * freq / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let a0 = 1.0 + alpha / a;
        self.b0 = (1.0 + alpha * a) / a0;
        self.b1 = (-2.0 * cos_w0) / a0;
        self.b2 = (1.0 - alpha * a) / a0;
        self.a1 = (-2.0 * cos_w0) / a0;
        self.a2 = (1.0 - alpha / a) / a0;
    }

    #[inline]
    fn process_sample(&mut self, input: f32, ch: usize) -> f32 {
        let x = input as f64;
        let y = self.b0 * x + self.b1 * self.x1[ch] + self.b2 * self.x2[ch]
            - self.a1 * self.y1[ch]
            - self.a2 * self.y2[ch];

        self.x2[ch] = self.x1[ch];
        self.x1[ch] = x;
        self.y2[ch] = self.y1[ch];
        self.y1[ch] = y;

        y as f32
    }

    fn reset(&mut self) {
        self.x1.fill(0.0);
        self.x2.fill(0.0);
        self.y1.fill(0.0);
        self.y2.fill(0.0);
    }

    fn set_channels(&mut self, channels: usize) {
        self.x1 = vec![0.0; channels];
        self.x2 = vec![0.0; channels];
        self.y1 = vec![0.0; channels];
        self.y2 = vec![0.0; channels];
    }
}

/// Ten-band graphic equalizer with optional true bypass.
pub struct Equalizer {
    filters: Vec<Biquad>,
    gains: [f32; NUM_BANDS],
    preset: EqPreset,
    enabled: bool,
    sample_rate: u32,
    channels: usize,
}

impl Equalizer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let mut eq = Self {
            filters: (0..NUM_BANDS).map(|_| Biquad::new(channels)).collect(),
            gains: [0.0; NUM_BANDS],
            preset: EqPreset::Flat,
            enabled: false,
            sample_rate,
            channels,
        };
        eq.update_filters();
        eq
    }

    /// Adapt to a new stream format, resetting filter state.
    pub fn set_stream(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate;
        self.channels = channels.max(1) as usize;
        for filter in &mut self.filters {
            filter.set_channels(self.channels);
        }
        self.update_filters();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && !self.enabled {
            // Fresh state on engage so stale history never colors the signal
            for filter in &mut self.filters {
                filter.reset();
            }
        }
        self.enabled = enabled;
        debug!("Equalizer {}", if enabled { "enabled" } else { "bypassed" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set one band gain in dB, clamped into [`GAIN_RANGE_DB`]. Marks the
    /// preset as custom.
    pub fn set_band(&mut self, band: usize, gain_db: f32) {
        if band >= NUM_BANDS {
            return;
        }
        self.gains[band] = gain_db.clamp(GAIN_RANGE_DB.0, GAIN_RANGE_DB.1);
        self.preset = EqPreset::Custom;
        self.update_filters();
    }

    /// Apply a named preset's gain table.
    pub fn set_preset(&mut self, preset: EqPreset) {
        if let Some(gains) = preset.gains() {
            self.gains = gains;
            self.update_filters();
        }
        self.preset = preset;
    }

    pub fn preset(&self) -> EqPreset {
        self.preset
    }

    pub fn gains(&self) -> [f32; NUM_BANDS] {
        self.gains
    }

    fn update_filters(&mut self) {
        for (i, filter) in self.filters.iter_mut().enumerate() {
            filter.reset();
            filter.set_peaking(
                self.sample_rate as f64,
                BAND_FREQUENCIES[i] as f64,
                self.gains[i] as f64,
                BAND_Q,
            );
        }
    }

    /// Process interleaved samples in place. Bands run in series per
    /// channel. When disabled this is a literal passthrough.
    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }

        let channels = self.channels;
        for frame in samples.chunks_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut s = *sample;
                for filter in self.filters.iter_mut() {
                    s = filter.process_sample(s, ch);
                }
                *sample = s;
            }
        }
    }
}
