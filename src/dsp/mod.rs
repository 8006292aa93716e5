//! Signal processing chain
//!
//! Applied once, on the decode side, before samples enter the ring buffer.
//! The realtime output callback never processes audio. Stage order:
//! equalizer → ReplayGain → clip-safe limiter. Every stage has a strict
//! no-op configuration, so the whole chain can be provably transparent,
//! which is one precondition of the bit-perfect claim.

pub mod equalizer;
pub mod limiter;
pub mod replaygain;

pub use equalizer::{EqPreset, Equalizer, BAND_FREQUENCIES, NUM_BANDS};
pub use limiter::Limiter;
pub use replaygain::{db_to_linear, ReplayGainInfo, ReplayGainMode, ReplayGainState};

use crate::audio::types::StreamSpec;

/// The full decode-side processing chain.
pub struct DspChain {
    pub equalizer: Equalizer,
    pub replaygain: ReplayGainState,
    pub limiter: Limiter,
}

impl DspChain {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            equalizer: Equalizer::new(sample_rate, channels),
            replaygain: ReplayGainState::new(),
            limiter: Limiter::new(),
        }
    }

    /// Re-arm the chain for a new track: adapt the equalizer to the stream
    /// format, install ReplayGain metadata, clear the limiter counter.
    pub fn prepare_for_track(&mut self, spec: &StreamSpec, replaygain: ReplayGainInfo) {
        self.equalizer.set_stream(spec.sample_rate, spec.channels);
        self.replaygain.set_track_info(replaygain);
        self.limiter.reset();
    }

    /// Run one block through all stages in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        self.equalizer.process(samples);
        self.replaygain.apply(samples);
        self.limiter.process(samples);
    }

    /// True when no stage can have altered the signal: equalizer bypassed,
    /// ReplayGain at unity, limiter disabled or never engaged.
    pub fn is_transparent(&self) -> bool {
        !self.equalizer.is_enabled() && self.replaygain.is_unity() && self.limiter.is_inactive()
    }
}
