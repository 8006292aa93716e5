//! Fade and crossfade state machine
//!
//! Amplitude envelopes for pause/resume/start/stop transitions and the
//! equal-power crossfade at gapless track boundaries. Progress advances in
//! frames per processed block, never wall clock, so every transition is
//! sample-accurate and testable without real time.
//!
//! Two cooperating pieces:
//! - [`FadeMachine`]: explicit state machine (Idle / FadingIn / FadingOut /
//!   Crossfading) with a normalized progress value, advanced by whichever
//!   thread processes the relevant blocks.
//! - [`GainRamp`]: a lock-free per-frame gain interpolator the realtime
//!   output callback multiplies through. A settled gain of exactly 1.0
//!   skips the multiply, keeping the steady path bit-exact.

use serde::Serialize;
use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fade machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeState {
    /// No transition in progress (initial and terminal)
    Idle,
    FadingOut,
    FadingIn,
    Crossfading,
}

/// Equal-power gain pair at normalized progress `t` in [0, 1].
///
/// `incoming² + outgoing² == 1` for every `t`, so perceived loudness stays
/// constant across the transition window.
#[inline]
pub fn equal_power_gains(t: f32) -> (f32, f32) {
    let t = t.clamp(0.0, 1.0);
    ((t * FRAC_PI_2).sin(), (t * FRAC_PI_2).cos())
}

/// Deterministic fade/crossfade state machine.
pub struct FadeMachine {
    state: FadeState,
    /// Frames the active transition spans
    total_frames: u64,
    /// Frames consumed so far
    elapsed_frames: u64,
}

impl FadeMachine {
    pub fn new() -> Self {
        Self {
            state: FadeState::Idle,
            total_frames: 0,
            elapsed_frames: 0,
        }
    }

    pub fn state(&self) -> FadeState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == FadeState::Idle
    }

    /// Normalized progress of the active transition.
    pub fn progress(&self) -> f32 {
        if self.total_frames == 0 {
            return 1.0;
        }
        (self.elapsed_frames as f64 / self.total_frames as f64).min(1.0) as f32
    }

    pub fn begin_fade_in(&mut self, frames: u64) {
        self.begin(FadeState::FadingIn, frames);
    }

    pub fn begin_fade_out(&mut self, frames: u64) {
        self.begin(FadeState::FadingOut, frames);
    }

    pub fn begin_crossfade(&mut self, frames: u64) {
        self.begin(FadeState::Crossfading, frames);
    }

    fn begin(&mut self, state: FadeState, frames: u64) {
        if frames == 0 {
            // Degenerate window: complete immediately
            self.state = FadeState::Idle;
            self.total_frames = 0;
            self.elapsed_frames = 0;
            return;
        }
        self.state = state;
        self.total_frames = frames;
        self.elapsed_frames = 0;
    }

    /// Advance by a processed block. Progress is monotonic; reaching 1.0
    /// returns the machine to Idle.
    pub fn advance(&mut self, frames: u64) {
        if self.state == FadeState::Idle {
            return;
        }
        self.elapsed_frames = self.elapsed_frames.saturating_add(frames);
        if self.elapsed_frames >= self.total_frames {
            self.state = FadeState::Idle;
        }
    }

    /// Gain of the incoming/active signal at the current progress.
    pub fn gain_in(&self) -> f32 {
        match self.state {
            FadeState::Idle => 1.0,
            FadeState::FadingIn | FadeState::Crossfading => equal_power_gains(self.progress()).0,
            FadeState::FadingOut => equal_power_gains(self.progress()).1,
        }
    }

    /// Gain of the outgoing signal (only meaningful while crossfading or
    /// fading out).
    pub fn gain_out(&self) -> f32 {
        match self.state {
            FadeState::Idle => 0.0,
            FadeState::FadingIn => 0.0,
            FadeState::FadingOut | FadeState::Crossfading => equal_power_gains(self.progress()).1,
        }
    }
}

impl Default for FadeMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free gain interpolator for the realtime callback.
///
/// The engine sets a target and a frame count; the callback advances one
/// step per frame. All state lives in f32 bit patterns inside atomics, so
/// neither side ever locks.
pub struct GainRamp {
    /// Current gain, f32 bits
    current: AtomicU32,
    /// Target gain, f32 bits
    target: AtomicU32,
    /// Per-frame increment magnitude, f32 bits
    step: AtomicU32,
}

impl GainRamp {
    pub fn new(initial: f32) -> Self {
        Self {
            current: AtomicU32::new(initial.to_bits()),
            target: AtomicU32::new(initial.to_bits()),
            step: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    /// Begin ramping toward `target` over `frames` frames.
    pub fn ramp_to(&self, target: f32, frames: u64) {
        let target = target.clamp(0.0, 1.0);
        let current = f32::from_bits(self.current.load(Ordering::Relaxed));
        let step = if frames == 0 {
            0.0
        } else {
            (target - current).abs() / frames as f32
        };

        self.step.store(step.to_bits(), Ordering::Relaxed);
        self.target.store(target.to_bits(), Ordering::Release);

        if frames == 0 {
            self.current.store(target.to_bits(), Ordering::Release);
        }
    }

    /// Jump immediately to a gain (no ramp).
    pub fn set(&self, gain: f32) {
        let bits = gain.clamp(0.0, 1.0).to_bits();
        self.current.store(bits, Ordering::Release);
        self.target.store(bits, Ordering::Release);
    }

    /// Advance one frame and return the gain to apply. Called only from
    /// the single realtime consumer.
    #[inline]
    pub fn next_gain(&self) -> f32 {
        let target = f32::from_bits(self.target.load(Ordering::Acquire));
        let current = f32::from_bits(self.current.load(Ordering::Relaxed));

        if current == target {
            return current;
        }

        let step = f32::from_bits(self.step.load(Ordering::Relaxed));
        let next = if current < target {
            (current + step).min(target)
        } else {
            (current - step).max(target)
        };

        self.current.store(next.to_bits(), Ordering::Relaxed);
        next
    }

    /// Last gain produced.
    pub fn current(&self) -> f32 {
        f32::from_bits(self.current.load(Ordering::Acquire))
    }

    /// Whether the ramp has reached its target.
    pub fn is_settled(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.target.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_power_invariant() {
        for i in 0..=100 {
            let t = i as f32 / 100.0;
            let (g_in, g_out) = equal_power_gains(t);
            let power = g_in * g_in + g_out * g_out;
            assert!(
                (power - 1.0).abs() < 1e-5,
                "power {} at t={}",
                power,
                t
            );
        }
    }

    #[test]
    fn test_crossfade_progress_monotonic_and_terminates() {
        let mut fade = FadeMachine::new();
        fade.begin_crossfade(1000);
        assert_eq!(fade.state(), FadeState::Crossfading);

        let mut last = -1.0f32;
        for _ in 0..10 {
            fade.advance(100);
            let p = fade.progress();
            assert!(p >= last);
            last = p;
        }

        assert!(fade.is_idle());
        assert_eq!(fade.progress(), 1.0);
        assert_eq!(fade.gain_in(), 1.0);
    }

    #[test]
    fn test_fade_in_starts_silent_ends_full() {
        let mut fade = FadeMachine::new();
        fade.begin_fade_in(100);

        assert!(fade.gain_in() < 1e-6);
        fade.advance(50);
        let mid = fade.gain_in();
        assert!(mid > 0.5 && mid < 0.9); // sin(π/4) ≈ 0.707
        fade.advance(50);
        assert_eq!(fade.gain_in(), 1.0);
        assert!(fade.is_idle());
    }

    #[test]
    fn test_fade_out_ends_silent() {
        let mut fade = FadeMachine::new();
        fade.begin_fade_out(100);

        assert!((fade.gain_in() - 1.0).abs() < 1e-6);
        fade.advance(100);
        assert!(fade.is_idle());
    }

    #[test]
    fn test_zero_length_transition_is_immediate() {
        let mut fade = FadeMachine::new();
        fade.begin_fade_in(0);
        assert!(fade.is_idle());
        assert_eq!(fade.gain_in(), 1.0);
    }

    #[test]
    fn test_ramp_reaches_target_in_requested_frames() {
        let ramp = GainRamp::new(1.0);
        ramp.ramp_to(0.0, 100);

        let mut g = 1.0;
        for _ in 0..100 {
            g = ramp.next_gain();
        }
        assert_eq!(g, 0.0);
        assert!(ramp.is_settled());
    }

    #[test]
    fn test_ramp_monotonic_upward() {
        let ramp = GainRamp::new(0.0);
        ramp.ramp_to(1.0, 50);

        let mut last = 0.0;
        for _ in 0..50 {
            let g = ramp.next_gain();
            assert!(g >= last);
            last = g;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_settled_unity_gain_is_exact() {
        let ramp = GainRamp::new(0.0);
        ramp.ramp_to(1.0, 10);
        for _ in 0..10 {
            ramp.next_gain();
        }
        // Exactly 1.0, so the callback can skip the multiply entirely
        assert_eq!(ramp.current(), 1.0);
    }

    #[test]
    fn test_instant_ramp() {
        let ramp = GainRamp::new(0.3);
        ramp.ramp_to(0.8, 0);
        assert_eq!(ramp.next_gain(), 0.8);
    }
}
