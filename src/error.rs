//! Error types shared across the player.
//!
//! Render-path failures never surface through these types: the engine
//! recovers locally. Everything here belongs to setup or the control loop.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or preparing an audio asset.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Audio file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unsupported or corrupt input.
    #[error("Failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("Audio file contains no samples: {0}")]
    Empty(PathBuf),

    #[error("Invalid audio layout: {0}")]
    InvalidLayout(String),

    #[error("Resampling from {from} Hz to {to} Hz failed: {reason}")]
    Resample { from: u32, to: u32, reason: String },

    #[error("No supported audio files found in {0}")]
    NoTracks(PathBuf),
}

/// Errors raised while opening or driving an output stream.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No audio output device available")]
    NoDevice,

    #[error("Audio output device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    #[error("Failed to stop audio stream: {0}")]
    StreamPause(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// Errors raised by the effects chain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(u32),

    #[error("Effects chain expects {expected} channels, block has {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("Effects chain produced a non-finite sample")]
    NonFinite,
}

/// Errors raised by a hand tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to open hand tracker source {0}: {1}")]
    Open(String, #[source] std::io::Error),

    #[error("Failed to read tracker frame: {0}")]
    Read(#[from] std::io::Error),

    #[error("Malformed tracker frame on line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Reasons a track switch was refused or failed.
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("Track index {index} out of range (library has {len} tracks)")]
    OutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Effect(#[from] EffectError),
}
