//! Continuous speech-to-text
//!
//! A platform [`SpeechRecognizer`] streams interim and final results for as
//! long as it runs. It may end on its own at any time; callers restart it.
//! Whether recognition exists at all is decided once, up front, by
//! [`RecognitionCapability::detect`].

mod engine;
mod live;
mod segmenter;

pub use engine::{
    resample, Decoder, TranscriptionEngine, TranscriptionOptions, TranscriptionResult,
};
pub use live::{LiveConfig, WhisperRecognizer};
pub use segmenter::{SegmentEvent, SpeechSegmenter, VoiceClassifier, WebRtcVoice};

use crate::audio::AudioResources;
use crate::error::AudioResult;
use crate::whisper::{ModelManager, WhisperModel};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outcome when a turn ends without any speech
pub const NO_RESPONSE: &str = "[no response]";

/// Outcome when the platform cannot transcribe at all
pub const RECOGNITION_UNAVAILABLE: &str = "[speech recognition not available]";

/// Recognition session options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecognitionOptions {
    /// Report in-progress (non-final) hypotheses
    pub interim_results: bool,
}

/// One recognition result; either field may be absent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecognitionResult {
    pub final_text: Option<String>,
    pub interim_text: Option<String>,
}

impl RecognitionResult {
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            final_text: Some(text.into()),
            interim_text: None,
        }
    }

    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            final_text: None,
            interim_text: Some(text.into()),
        }
    }
}

/// Why a recognition session reported an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Nothing was heard for a while; the session will end and can be restarted
    NoSpeech,
    Aborted,
    Network,
    /// The microphone stream failed or was closed
    AudioCapture,
    NotAllowed,
    ServiceUnavailable,
    Other(String),
}

impl RecognitionErrorKind {
    /// Transient errors are ignored by the turn
    pub fn is_transient(&self) -> bool {
        matches!(self, RecognitionErrorKind::NoSpeech)
    }

    /// Errors meaning recognition itself stopped being possible
    pub fn is_capability_failure(&self) -> bool {
        matches!(
            self,
            RecognitionErrorKind::AudioCapture
                | RecognitionErrorKind::NotAllowed
                | RecognitionErrorKind::ServiceUnavailable
        )
    }
}

/// Signals emitted by a running recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Result(RecognitionResult),
    Error(RecognitionErrorKind),
    /// The session stopped; nothing more arrives until the next `start`
    Ended,
}

/// Platform speech-to-text capability
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a continuous recognition session
    ///
    /// Fails when a session is already running or audio cannot be acquired.
    fn start(
        &self,
        options: RecognitionOptions,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> AudioResult<()>;

    /// Stop the running session, if any; idempotent
    fn stop(&self);
}

/// Result of probing the platform for speech-to-text
#[derive(Clone)]
pub enum RecognitionCapability {
    Available(Arc<dyn SpeechRecognizer>),
    Unavailable,
}

impl RecognitionCapability {
    /// Look for a local whisper model and build a live recognizer on top of it
    pub fn detect(
        model: Option<&str>,
        resources: Arc<AudioResources>,
        config: LiveConfig,
    ) -> Self {
        let manager = match ModelManager::new() {
            Ok(manager) => manager,
            Err(e) => {
                warn!("Model cache unavailable: {}", e);
                return RecognitionCapability::Unavailable;
            }
        };

        let requested = model.and_then(WhisperModel::from_short_name);
        if let Some(name) = model.filter(|_| requested.is_none()) {
            warn!("Unknown model '{}', falling back to any downloaded model", name);
        }

        let model_path = match requested {
            Some(model) => manager.get_cached_model_path(model),
            None => WhisperModel::all()
                .iter()
                .find_map(|&m| manager.get_cached_model_path(m)),
        };

        let Some(model_path) = model_path else {
            info!("No whisper model downloaded; speech recognition disabled");
            return RecognitionCapability::Unavailable;
        };

        match TranscriptionEngine::new(&model_path) {
            Ok(engine) => {
                info!("Speech recognition using {}", model_path.display());
                RecognitionCapability::Available(Arc::new(WhisperRecognizer::new(
                    Arc::new(engine),
                    resources,
                    config,
                )))
            }
            Err(e) => {
                warn!("Failed to load whisper model: {}", e);
                RecognitionCapability::Unavailable
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, RecognitionCapability::Available(_))
    }
}

/// Final results accumulated over one turn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a final result followed by a separator
    pub fn push_final(&mut self, text: &str) {
        self.text.push_str(text);
        self.text.push(' ');
    }

    /// True when nothing but whitespace has been captured
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Trimmed transcript, or [`NO_RESPONSE`] when nothing was said
    pub fn finalize(&self) -> String {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            NO_RESPONSE.to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Best-effort outcome for a turn cut short by a recognition error
    pub fn finalize_after_error(&self, kind: &RecognitionErrorKind) -> String {
        if self.is_empty() && kind.is_capability_failure() {
            RECOGNITION_UNAVAILABLE.to_string()
        } else {
            self.finalize()
        }
    }
}
