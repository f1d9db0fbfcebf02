//! WAV file playback as a microphone
//!
//! Replays a recording in real time into a [`SharedCaptureState`], so turns can
//! be driven headless (CI, remote shells) with the same engines as a live mic.

use super::capture::{CaptureState, CaptureStream, MicrophoneSource, SharedCaptureState};
use crate::error::{AudioError, AudioResult};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Chunk length pushed per tick
const CHUNK: Duration = Duration::from_millis(20);

/// Load a WAV file as mono f32 samples
///
/// Returns the samples and sample rate
pub fn load_mono(path: impl AsRef<Path>) -> AudioResult<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path.as_ref())?;

    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_value))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = if channels > 1 {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    };

    Ok((mono, spec.sample_rate))
}

/// A microphone that plays back a WAV file, then stays silent
#[derive(Debug, Clone)]
pub struct WavFileSource {
    path: PathBuf,
}

impl WavFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl MicrophoneSource for WavFileSource {
    fn name(&self) -> &str {
        "wav"
    }

    fn open(&self) -> AudioResult<Box<dyn CaptureStream>> {
        let (samples, sample_rate) = load_mono(&self.path)
            .map_err(|e| AudioError::Microphone(format!("{}: {}", self.path.display(), e)))?;
        debug!(
            "Replaying {} ({} samples @ {}Hz)",
            self.path.display(),
            samples.len(),
            sample_rate
        );
        Ok(Box::new(WavReplay::start(samples, sample_rate)?))
    }
}

struct WavReplay {
    state: SharedCaptureState,
    stop: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WavReplay {
    fn start(samples: Vec<f32>, sample_rate: u32) -> AudioResult<Self> {
        let state = SharedCaptureState::new(sample_rate);
        state.set_state(CaptureState::Capturing);
        let stop = Arc::new(AtomicBool::new(false));

        let chunk_len = ((sample_rate as u64 * CHUNK.as_millis() as u64) / 1000).max(1) as usize;
        let thread_state = state.clone();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("repotour-wav".to_string())
            .spawn(move || {
                for chunk in samples.chunks(chunk_len) {
                    if thread_stop.load(Ordering::SeqCst) {
                        return;
                    }
                    thread_state.process_samples(chunk, sample_rate);
                    thread::sleep(CHUNK);
                }
                // Trailing silence keeps the analyser and recognizer fed
                let silence = vec![0.0f32; chunk_len];
                while !thread_stop.load(Ordering::SeqCst) {
                    thread_state.process_samples(&silence, sample_rate);
                    thread::sleep(CHUNK);
                }
            })?;

        Ok(Self {
            state,
            stop,
            thread_handle: Some(handle),
        })
    }
}

impl CaptureStream for WavReplay {
    fn shared_state(&self) -> SharedCaptureState {
        self.state.clone()
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        self.state.set_state(CaptureState::Stopped);
    }
}

impl Drop for WavReplay {
    fn drop(&mut self) {
        self.stop();
    }
}
