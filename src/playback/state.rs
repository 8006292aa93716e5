//! Playback state snapshots
//!
//! The engine thread is the only writer; everyone else sees read-only
//! snapshots. Frequently read fields (position, duration, volume, playing
//! flags) are additionally published through atomics so accessors never
//! take the snapshot lock.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Read-only snapshot of playback state.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_paused: bool,
    /// Monotonic while playing; reset on Stop/new track; jumps on Seek
    pub position_secs: f64,
    pub duration_secs: f64,
    pub sample_rate: u32,
    /// None for formats without a fixed depth
    pub bit_depth: Option<u32>,
    pub channels: u16,
    pub current_file: Option<String>,
    /// True when the active output path is not bit-exact to the source
    pub resampled: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_paused: false,
            position_secs: 0.0,
            duration_secs: 0.0,
            sample_rate: 0,
            bit_depth: None,
            channels: 0,
            current_file: None,
            resampled: false,
        }
    }
}

/// Shared state between the engine thread and snapshot readers.
pub struct SharedState {
    /// Slow-changing fields, engine thread writes only
    inner: Mutex<PlaybackState>,

    /// Atomic mirrors for lock-free reads
    position_ms: AtomicU64,
    duration_ms: AtomicU64,
    is_playing: AtomicBool,
    is_paused: AtomicBool,

    /// Master volume as f32 bits, clamped to [0, 1]
    volume: AtomicU32,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PlaybackState::default()),
            position_ms: AtomicU64::new(0),
            duration_ms: AtomicU64::new(0),
            is_playing: AtomicBool::new(false),
            is_paused: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Full snapshot, with the hot fields read from atomics.
    pub fn snapshot(&self) -> PlaybackState {
        let mut state = self.inner.lock().clone();
        state.position_secs = self.position_ms.load(Ordering::Relaxed) as f64 / 1000.0;
        state.duration_secs = self.duration_ms.load(Ordering::Relaxed) as f64 / 1000.0;
        state.is_playing = self.is_playing.load(Ordering::Relaxed);
        state.is_paused = self.is_paused.load(Ordering::Relaxed);
        state
    }

    /// Engine-side: mutate the slow fields under the lock.
    pub fn update<F: FnOnce(&mut PlaybackState)>(&self, f: F) {
        let mut inner = self.inner.lock();
        f(&mut inner);
        // Keep the atomic mirrors coherent with the snapshot
        self.position_ms
            .store((inner.position_secs * 1000.0) as u64, Ordering::Relaxed);
        self.duration_ms
            .store((inner.duration_secs * 1000.0) as u64, Ordering::Relaxed);
        self.is_playing.store(inner.is_playing, Ordering::Relaxed);
        self.is_paused.store(inner.is_paused, Ordering::Relaxed);
    }

    /// Reset everything to idle defaults (Stop).
    pub fn reset(&self) {
        self.update(|s| *s = PlaybackState::default());
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms.load(Ordering::Relaxed)
    }

    pub fn set_position_ms(&self, ms: u64) {
        self.position_ms.store(ms, Ordering::Relaxed);
    }

    pub fn set_playing_flags(&self, playing: bool, paused: bool) {
        self.is_playing.store(playing, Ordering::Relaxed);
        self.is_paused.store(paused, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.is_playing = playing;
        inner.is_paused = paused;
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::Relaxed)
    }

    /// Set master volume, clamping into [0, 1]. The stored value never
    /// leaves that range.
    pub fn set_volume(&self, volume: f32) {
        let clamped = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.volume.store(clamped.to_bits(), Ordering::Release);
    }

    /// Lock-free volume read (used by the realtime callback).
    #[inline]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Acquire))
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
