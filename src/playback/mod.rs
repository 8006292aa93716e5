//! Playback engine internals
//!
//! Thread topology: the engine thread owns the output backend and the
//! command loop; one decoder worker thread exists per active track; the
//! realtime output callback runs wherever the audio backend puts it. The
//! only structure shared with the callback is lock-free (the sample ring,
//! the gain ramp, and a few atomics).

pub mod commands;
pub mod decoder_worker;
pub mod engine;
pub mod fade;
pub mod ring_buffer;
pub mod state;

pub use commands::PlaybackCommand;
pub use engine::{AudioEngine, BackendFactory};
pub use fade::{equal_power_gains, FadeMachine, FadeState, GainRamp};
pub use ring_buffer::SampleRing;
pub use state::{PlaybackState, SharedState};
