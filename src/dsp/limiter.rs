//! Clip-safe limiter
//!
//! Final safety stage of the DSP chain. Samples at or inside full scale
//! pass through bit-identically; only samples that would clip the
//! converter are brought back to the ceiling. Because the in-range path is
//! strictly untouched, the stage is provably inactive (engaged count 0)
//! whenever the upstream chain never produces an over-range sample.

/// Full-scale ceiling
const CEILING: f32 = 1.0;

/// Clip-safe limiter with an engagement counter.
pub struct Limiter {
    enabled: bool,
    /// Samples limited since the last reset
    engaged_samples: u64,
}

impl Limiter {
    pub fn new() -> Self {
        Self {
            enabled: true,
            engaged_samples: 0,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Samples limited since the last [`reset`](Self::reset).
    pub fn engaged_samples(&self) -> u64 {
        self.engaged_samples
    }

    /// True when this stage has not altered a single sample.
    pub fn is_inactive(&self) -> bool {
        !self.enabled || self.engaged_samples == 0
    }

    /// Clear the engagement counter (new track).
    pub fn reset(&mut self) {
        self.engaged_samples = 0;
    }

    /// Limit interleaved samples in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        if !self.enabled {
            return;
        }

        for s in samples.iter_mut() {
            let a = s.abs();
            if a > CEILING {
                *s = CEILING.copysign(*s);
                self.engaged_samples += 1;
            }
        }
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new()
    }
}
