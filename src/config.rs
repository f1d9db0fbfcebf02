//! Tunable timing and detection constants
//!
//! Defaults carry the literal values the narration engine has always used.
//! The post-narration grace window is deliberately longer than the inter-result
//! silence window; both are kept separate so they can be tuned independently.

use std::time::Duration;

/// Fixed locale for narration and recognition
pub const LOCALE: &str = "en-US";

/// Whisper language code matching [`LOCALE`]
pub const WHISPER_LANGUAGE: &str = "en";

/// Source node created by PipeWire's echo-cancel module
pub const ECHO_CANCEL_SOURCE: &str = "echo-cancel-source";

/// Default overall timeout for a listening turn
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Narration engine configuration
#[derive(Clone, Debug)]
pub struct NarrationConfig {
    /// Delay between flushing pending narration and starting the new utterance
    pub flush_delay: Duration,
    /// How often the keep-alive check resumes a paused utterance
    pub keep_alive_interval: Duration,
    /// Speech rate multiplier (1.0 = normal)
    pub rate: f32,
    /// Synthesizer command (speech-dispatcher client)
    pub command: String,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(80),
            keep_alive_interval: Duration::from_secs(5),
            rate: 1.05,
            command: "spd-say".to_string(),
        }
    }
}

/// Voice activity detector configuration
#[derive(Clone, Debug)]
pub struct VadConfig {
    /// Sampling interval for the energy check
    pub interval: Duration,
    /// Average byte-spectrum energy above which a frame counts as voice
    pub threshold: f32,
    /// Consecutive voiced frames required before firing (~240ms at 80ms)
    pub debounce_frames: u32,
    /// FFT window size in samples
    pub fft_size: usize,
    /// Temporal smoothing between successive spectra (0.0 - 1.0)
    pub smoothing: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(80),
            threshold: 15.0,
            debounce_frames: 3,
            fft_size: 512,
            smoothing: 0.3,
        }
    }
}

/// Silence and restart windows used by the turn state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnWindows {
    /// Silence after the last result that ends a listen-only turn
    pub listen_silence: Duration,
    /// Silence after the last result that ends an interruptible turn
    pub barge_in_silence: Duration,
    /// How long to wait for trailing speech once narration completes unanswered
    pub grace: Duration,
    /// Delay before restarting recognition that ended on its own (interruptible turns)
    pub restart_delay: Duration,
}

impl Default for TurnWindows {
    fn default() -> Self {
        Self {
            listen_silence: Duration::from_millis(2_000),
            barge_in_silence: Duration::from_millis(2_500),
            grace: Duration::from_millis(8_000),
            restart_delay: Duration::from_millis(100),
        }
    }
}

/// Top-level engine configuration
#[derive(Clone, Debug)]
pub struct VoiceConfig {
    pub narration: NarrationConfig,
    pub vad: VadConfig,
    pub windows: TurnWindows,
    /// Timeout used by the CLI when none is given
    pub default_timeout: Duration,
    /// Short name of the whisper model to load (see [`crate::whisper::WhisperModel`])
    pub model: Option<String>,
    /// Capture node; narration played through speakers must not reach the
    /// detectors, so the echo-cancelled source is preferred
    pub capture_target: Option<String>,
}

/// Parse a capture target setting; `default` means the session default source
pub fn parse_capture_target(value: &str) -> Option<String> {
    match value.trim() {
        "" | "default" => None,
        name => Some(name.to_string()),
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            narration: NarrationConfig::default(),
            vad: VadConfig::default(),
            windows: TurnWindows::default(),
            default_timeout: DEFAULT_TIMEOUT,
            model: None,
            capture_target: Some(ECHO_CANCEL_SOURCE.to_string()),
        }
    }
}
