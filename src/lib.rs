//! Repotour voice engine
//!
//! Narrates a guided walkthrough while listening for the listener to cut in,
//! then captures what they say. The entry point is [`TurnController`]; the
//! engines it composes live in their own modules:
//! - [`narration`]: text-to-speech driver
//! - [`transcription`]: continuous speech-to-text driver
//! - [`vad`]: energy-based barge-in detector
//! - [`audio`]: microphone ownership and analysis

pub mod audio;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod narration;
pub mod settings;
pub mod transcription;
pub mod turn;
pub mod vad;
pub mod whisper;

#[cfg(test)]
mod testing;

pub use config::VoiceConfig;
pub use error::{AudioError, AudioResult};
pub use transcription::{NO_RESPONSE, RECOGNITION_UNAVAILABLE};
pub use turn::{TurnController, TurnReport};
