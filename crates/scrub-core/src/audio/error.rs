//! Output device errors

use thiserror::Error;

use super::config::BackendKind;
use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio output devices found")]
    NoDevices,

    #[error("Host has no default output device")]
    NoDefaultDevice,

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// The host failed to list devices or their configurations
    #[error("Device query failed: {0}")]
    Query(String),

    /// None of the device's configurations can carry the hub's output
    #[error("No usable output configuration: {0}")]
    NoUsableConfig(String),

    #[error("JACK {stage} failed: {message}")]
    Jack { stage: &'static str, message: String },

    #[error("Failed to open output stream: {0}")]
    StreamOpen(String),

    #[error("Failed to start output stream: {0}")]
    StreamStart(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Backend not compiled in or not available on this platform
    #[error("{0} backend is not available in this build")]
    BackendUnavailable(BackendKind),

    #[error("Player hub rejected the output format: {0}")]
    HubInit(#[from] EngineError),

    #[error("Failed to spawn audio thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl AudioError {
    pub(crate) fn jack(stage: &'static str, err: impl std::fmt::Display) -> Self {
        AudioError::Jack {
            stage,
            message: err.to_string(),
        }
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
