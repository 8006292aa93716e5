//! Error types for the playback engine
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Recoverable realtime conditions (buffer underruns, shared-mode
//! fallback) are never represented here; they only ever show up in
//! diagnostics counters or the next state snapshot.

use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File could not be probed as a supported audio format.
    /// Surfaced synchronously to the Play caller; no worker is started.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Audio decoding errors (stream-fatal; per-packet errors are skipped
    /// and counted instead)
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Exclusive-mode negotiation failed and no shared fallback was possible
    #[error("Device negotiation failed: {0}")]
    Negotiation(String),

    /// Device profile persistence errors
    #[error("Device profile error: {0}")]
    Profile(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Command channel closed (fatal; engine performs an orderly shutdown)
    #[error("Command channel closed")]
    ChannelClosed,
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
