//! Microphone ownership and audio analysis
//!
//! This module provides:
//! - [`AudioResources`]: the single owner of the microphone capture stream
//! - Microphone sources (PipeWire, WAV replay)
//! - Byte-spectrum analysis for voice activity detection

mod analyser;
mod capture;
mod wav;

pub use analyser::SpectrumAnalyser;
pub use capture::{
    CaptureConfig, CaptureState, CaptureStream, MicrophoneSource, PipeWireSource,
    SharedCaptureState,
};
pub use wav::{load_mono, WavFileSource};

use crate::error::{AudioError, AudioResult};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Owner of the shared microphone stream and every analysis context built on it
///
/// Engines borrow the stream's [`SharedCaptureState`]; only [`release_all`]
/// stops it. The access grant survives a release, so the next request reopens
/// capture without repeating the acquisition prompt.
///
/// [`release_all`]: AudioResources::release_all
pub struct AudioResources {
    source: Arc<dyn MicrophoneSource>,
    granted: AtomicBool,
    stream: Mutex<Option<Box<dyn CaptureStream>>>,
    open_analysers: Arc<AtomicUsize>,
    streams_opened: AtomicUsize,
    /// Bumped by every release; analysers opened under an older epoch are dead
    epoch: Arc<AtomicU64>,
}

impl AudioResources {
    pub fn new(source: Arc<dyn MicrophoneSource>) -> Self {
        Self {
            source,
            granted: AtomicBool::new(false),
            stream: Mutex::new(None),
            open_analysers: Arc::new(AtomicUsize::new(0)),
            streams_opened: AtomicUsize::new(0),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<Box<dyn CaptureStream>>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request microphone access; idempotent once granted
    pub fn request_microphone_access(&self) -> bool {
        if self.granted.load(Ordering::SeqCst) {
            return true;
        }
        match self.microphone() {
            Ok(_) => true,
            Err(e) => {
                warn!("Mic access denied: {}", e);
                false
            }
        }
    }

    /// Whether access has been granted at least once
    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    /// Shared state of the live microphone stream, opening it if needed
    pub fn microphone(&self) -> AudioResult<SharedCaptureState> {
        let mut stream = self.lock_stream();
        if let Some(current) = stream.as_ref() {
            let state = current.shared_state();
            if state.state() != CaptureState::Error {
                return Ok(state);
            }
            warn!(
                "Discarding failed capture stream: {}",
                state.error().unwrap_or_default()
            );
            if let Some(mut failed) = stream.take() {
                failed.stop();
            }
        }

        let opened = self.source.open().map_err(|e| match e {
            AudioError::Microphone(_) => e,
            other => AudioError::Microphone(other.to_string()),
        })?;
        let state = opened.shared_state();
        *stream = Some(opened);
        self.streams_opened.fetch_add(1, Ordering::SeqCst);

        if !self.granted.swap(true, Ordering::SeqCst) {
            info!("Microphone access granted ({})", self.source.name());
        } else {
            debug!("Microphone stream reopened ({})", self.source.name());
        }
        Ok(state)
    }

    /// Build a spectrum analyser over the shared microphone stream
    pub fn open_analyser(&self, fft_size: usize, smoothing: f32) -> AudioResult<AnalyserContext> {
        let state = self.microphone()?;
        self.open_analysers.fetch_add(1, Ordering::SeqCst);
        Ok(AnalyserContext {
            analyser: SpectrumAnalyser::new(state, fft_size, smoothing),
            open: Some(self.open_analysers.clone()),
            opened_in: self.epoch.load(Ordering::SeqCst),
            epoch: self.epoch.clone(),
        })
    }

    /// Stop the capture stream and close analysis contexts
    ///
    /// Safe to call any number of times from any cleanup path.
    pub fn release_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let stream = self.lock_stream().take();
        if let Some(mut stream) = stream {
            stream.stop();
            debug!("Microphone stream released");
        }
    }

    /// Whether a capture stream is currently open
    pub fn has_open_stream(&self) -> bool {
        self.lock_stream().is_some()
    }

    /// Number of analysis contexts not yet closed
    pub fn open_analysers(&self) -> usize {
        self.open_analysers.load(Ordering::SeqCst)
    }

    /// Number of times a capture stream has been opened
    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }
}

impl Drop for AudioResources {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// An analyser borrowed from [`AudioResources`]; closing it is tracked
pub struct AnalyserContext {
    analyser: SpectrumAnalyser,
    open: Option<Arc<AtomicUsize>>,
    opened_in: u64,
    epoch: Arc<AtomicU64>,
}

impl AnalyserContext {
    pub fn analyser(&mut self) -> &mut SpectrumAnalyser {
        &mut self.analyser
    }

    /// Whether the owning resources were released since this context opened
    pub fn is_released(&self) -> bool {
        self.open.is_none() || self.epoch.load(Ordering::SeqCst) != self.opened_in
    }

    /// Close the context; idempotent
    pub fn close(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for AnalyserContext {
    fn drop(&mut self) {
        self.close();
    }
}
