//! Playback engine error types

use thiserror::Error;

use crate::queue::QueueError;
use crate::types::FramePosition;

/// Errors from the channel control API and the hub
#[derive(Error, Debug)]
pub enum EngineError {
    /// Channel index beyond the sound's channel count
    #[error("Channel {channel} out of range (sound has {count} channels)")]
    InvalidChannel { channel: usize, count: usize },

    /// Position beyond the end of the sound
    #[error("Position {position} is beyond the sound length {len}")]
    PositionOutOfRange {
        position: FramePosition,
        len: FramePosition,
    },

    /// Seek speed that can't be clamped to a usable value
    #[error("Invalid seek speed: {0}")]
    InvalidSpeed(f64),

    /// Sound with an unusable layout
    #[error("Unsupported sound layout: {channels} channels at {sample_rate} Hz")]
    UnsupportedSound { channels: usize, sample_rate: u32 },

    #[error("Player hub is already initialized")]
    AlreadyInitialized,

    #[error("Player hub is not initialized")]
    NotInitialized,

    /// Output format the hub can't mix into
    #[error("Invalid output format: {0}")]
    InvalidFormat(String),

    /// The prebuffer thread exited unexpectedly
    #[error("Prebuffer thread is gone")]
    ProducerGone,

    /// Prebuffer thread couldn't be started
    #[error("Failed to spawn prebuffer thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Malformed persisted output-route data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Route data ended early (expected at least {expected} words, got {got})")]
    Truncated { expected: usize, got: usize },

    #[error("Route flag at word {index} is {value}, expected 0 or 1")]
    BadFlag { index: usize, value: u16 },

    #[error("Route matrix of {rows}x{cols} exceeds the channel limit")]
    TooLarge { rows: usize, cols: usize },

    #[error("{0} trailing words after the last route table")]
    Trailing(usize),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
