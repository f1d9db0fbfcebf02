//! Error types for the audio backends
//!
//! Turn-level operations never surface these: the controller absorbs them and
//! resolves with a sentinel. They exist so backends can report *why* something
//! failed to the engine that decides what to do about it.

use thiserror::Error;

/// Result type alias for audio backend operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Errors raised by capture, analysis, narration and recognition backends
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Microphone unavailable: {0}")]
    Microphone(String),

    #[error("Audio capture error: {0}")]
    Capture(String),

    #[error("Narration error: {0}")]
    Narration(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Recognition already running")]
    AlreadyStarted,

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        AudioError::Capture(err.to_string())
    }
}
