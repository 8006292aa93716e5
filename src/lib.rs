//! # Purist
//!
//! Realtime audio playback engine for gapless, bit-perfect music
//! reproduction.
//!
//! **Purpose:** Decode audio files to PCM, optionally apply reversible
//! signal processing (equalizer, ReplayGain, clip-safe limiting), negotiate
//! the most faithful output path the hardware offers, and stream to the
//! device without underruns.
//!
//! **Architecture:** Command-driven control loop + per-track decoder worker
//! feeding a lock-free SPSC ring buffer drained by the realtime output
//! callback. Built on symphonia + rubato + cpal.

pub mod audio;
pub mod config;
pub mod diagnostics;
pub mod dsp;
pub mod error;
pub mod playback;
pub mod profiles;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use playback::engine::AudioEngine;
