//! Whisper decoding
//!
//! Wraps whisper-rs (whisper.cpp bindings). Decoding is CPU-bound and blocking;
//! callers run it on a blocking thread.

use crate::config::WHISPER_LANGUAGE;
use crate::error::{AudioError, AudioResult};
use std::path::Path;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

/// Sample rate whisper expects
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Result of decoding one chunk of audio
#[derive(Debug, Clone, Default)]
pub struct TranscriptionResult {
    /// Full transcribed text, trimmed
    pub text: String,
}

/// Decoding options
#[derive(Debug, Clone)]
pub struct TranscriptionOptions {
    /// Number of threads to use (0 = whisper default)
    pub n_threads: i32,
    /// Decode as a single segment (short live chunks)
    pub single_segment: bool,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            n_threads: 0,
            single_segment: true,
        }
    }
}

/// Transcription engine wrapping whisper-rs
pub struct TranscriptionEngine {
    ctx: WhisperContext,
}

impl TranscriptionEngine {
    /// Create a new transcription engine by loading a model
    pub fn new(model_path: &Path) -> AudioResult<Self> {
        let path = model_path
            .to_str()
            .ok_or_else(|| AudioError::Model("Invalid model path".to_string()))?;

        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| AudioError::Model(format!("Failed to load Whisper model: {}", e)))?;

        Ok(Self { ctx })
    }

    /// Transcribe 16kHz mono samples
    pub fn transcribe(
        &self,
        samples: &[f32],
        options: &TranscriptionOptions,
    ) -> AudioResult<TranscriptionResult> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(WHISPER_LANGUAGE));
        params.set_translate(false);
        if options.n_threads > 0 {
            params.set_n_threads(options.n_threads);
        }
        params.set_single_segment(options.single_segment);
        params.set_no_context(true);
        params.set_suppress_blank(true);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_special(false);
        params.set_print_timestamps(false);

        // whisper.cpp refuses inputs shorter than one second
        let min_len = WHISPER_SAMPLE_RATE as usize + WHISPER_SAMPLE_RATE as usize / 10;
        let padded;
        let samples = if samples.len() < min_len {
            let mut buf = samples.to_vec();
            buf.resize(min_len, 0.0);
            padded = buf;
            &padded[..]
        } else {
            samples
        };

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| AudioError::Recognition(format!("Failed to create Whisper state: {}", e)))?;

        state
            .full(params, samples)
            .map_err(|e| AudioError::Recognition(format!("Transcription failed: {}", e)))?;

        let mut full_text = String::new();
        for i in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            let Ok(text) = segment.to_str_lossy() else {
                continue;
            };
            let text = text.trim();
            if text.is_empty() || is_annotation(text) {
                continue;
            }
            if !full_text.is_empty() {
                full_text.push(' ');
            }
            full_text.push_str(text);
        }

        Ok(TranscriptionResult { text: full_text })
    }
}

/// Blocking speech-to-text over 16kHz mono audio
pub trait Decoder: Send + Sync + 'static {
    fn decode(&self, samples: &[f32], options: &TranscriptionOptions) -> AudioResult<String>;
}

impl Decoder for TranscriptionEngine {
    fn decode(&self, samples: &[f32], options: &TranscriptionOptions) -> AudioResult<String> {
        Ok(self.transcribe(samples, options)?.text)
    }
}

/// Non-speech markers whisper emits for silence and noise, e.g. `[BLANK_AUDIO]`
fn is_annotation(text: &str) -> bool {
    (text.starts_with('[') && text.ends_with(']')) || (text.starts_with('(') && text.ends_with(')'))
}

/// Simple linear resampling
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 * ratio;
        let idx = src_idx as usize;
        let frac = src_idx - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac as f32) + samples[idx + 1] * frac as f32
        } else {
            samples[idx.min(samples.len() - 1)]
        };

        output.push(sample);
    }

    output
}
