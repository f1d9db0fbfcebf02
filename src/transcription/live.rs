//! Live recognition over the shared microphone stream
//!
//! Polls the capture ring buffer, segments speech with the WebRTC voice
//! detector, and decodes each segment on a blocking thread. Interim
//! hypotheses come from re-decoding the growing segment.

use super::engine::{
    resample, Decoder, TranscriptionEngine, TranscriptionOptions, WHISPER_SAMPLE_RATE,
};
use super::segmenter::{SegmentEvent, SpeechSegmenter, WebRtcVoice};
use super::{
    RecognitionErrorKind, RecognitionEvent, RecognitionOptions, RecognitionResult,
    SpeechRecognizer,
};
use crate::audio::{AudioResources, CaptureState, SharedCaptureState};
use crate::error::{AudioError, AudioResult};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Live recognition tuning
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// How often the capture buffer is drained
    pub poll_interval: Duration,
    /// WebRTC detector aggressiveness, 0 (lenient) to 3 (strict)
    pub vad_mode: u8,
    /// Trailing quiet that ends an utterance
    pub close_after: Duration,
    /// Minimum spacing of interim decodes
    pub partial_every: Duration,
    /// Utterances are force-closed at this length
    pub max_segment: Duration,
    /// Quiet with no speech at all before the session ends itself
    pub no_speech_after: Duration,
    pub transcription: TranscriptionOptions,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            vad_mode: 3,
            close_after: Duration::from_millis(700),
            partial_every: Duration::from_secs(1),
            max_segment: Duration::from_secs(15),
            no_speech_after: Duration::from_secs(8),
            transcription: TranscriptionOptions::default(),
        }
    }
}

impl LiveConfig {
    fn segmenter(&self) -> SpeechSegmenter {
        SpeechSegmenter::new(
            Box::new(WebRtcVoice::new(self.vad_mode)),
            self.close_after,
            self.partial_every,
            self.max_segment,
            self.no_speech_after,
        )
    }
}

struct Worker {
    task: JoinHandle<()>,
    /// Cleared before `Ended` is sent
    active: Arc<AtomicBool>,
}

impl Worker {
    fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.task.is_finished()
    }
}

/// [`SpeechRecognizer`] backed by a local whisper model
pub struct WhisperRecognizer<D: Decoder = TranscriptionEngine> {
    engine: Arc<D>,
    resources: Arc<AudioResources>,
    config: LiveConfig,
    worker: Mutex<Option<Worker>>,
}

impl<D: Decoder> WhisperRecognizer<D> {
    pub fn new(
        engine: Arc<D>,
        resources: Arc<AudioResources>,
        config: LiveConfig,
    ) -> Self {
        Self {
            engine,
            resources,
            config,
            worker: Mutex::new(None),
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<D: Decoder> SpeechRecognizer for WhisperRecognizer<D> {
    fn start(
        &self,
        options: RecognitionOptions,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> AudioResult<()> {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(Worker::is_running) {
            return Err(AudioError::AlreadyStarted);
        }

        let mic = self.resources.microphone()?;
        debug!("Recognition session starting");
        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_session(
            self.engine.clone(),
            mic,
            self.config.segmenter(),
            self.config.clone(),
            options,
            active.clone(),
            events,
        ));
        *worker = Some(Worker { task, active });
        Ok(())
    }

    fn stop(&self) {
        if let Some(worker) = self.lock_worker().take() {
            worker.task.abort();
            debug!("Recognition session stopped");
        }
    }
}

impl<D: Decoder> Drop for WhisperRecognizer<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_session<D: Decoder>(
    engine: Arc<D>,
    mic: SharedCaptureState,
    mut segmenter: SpeechSegmenter,
    config: LiveConfig,
    options: RecognitionOptions,
    active: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<RecognitionEvent>,
) {
    let end = |kind: RecognitionErrorKind| {
        active.store(false, Ordering::SeqCst);
        let _ = events.send(RecognitionEvent::Error(kind));
        let _ = events.send(RecognitionEvent::Ended);
    };

    let mut cursor = mic.cursor();
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if events.is_closed() {
            return;
        }

        match mic.state() {
            CaptureState::Error => {
                warn!(
                    "Capture failed during recognition: {}",
                    mic.error().unwrap_or_default()
                );
                return end(RecognitionErrorKind::AudioCapture);
            }
            CaptureState::Stopped => return end(RecognitionErrorKind::AudioCapture),
            CaptureState::Idle | CaptureState::Capturing => {}
        }

        let (samples, next) = mic.read_since(cursor);
        cursor = next;
        let samples = resample(&samples, mic.sample_rate(), WHISPER_SAMPLE_RATE);

        for segment in segmenter.push(&samples) {
            let (audio, is_final) = match segment {
                SegmentEvent::NoSpeech => return end(RecognitionErrorKind::NoSpeech),
                SegmentEvent::Partial(_) if !options.interim_results => continue,
                SegmentEvent::Partial(audio) => (audio, false),
                SegmentEvent::Closed(audio) => (audio, true),
            };

            let text = match decode(&engine, audio, &config.transcription).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("Decoding failed: {}", e);
                    return end(RecognitionErrorKind::Other(e.to_string()));
                }
            };
            if text.is_empty() {
                continue;
            }

            let result = if is_final {
                debug!("Final: {}", text);
                RecognitionResult::final_text(text)
            } else {
                RecognitionResult::interim(text)
            };
            if events.send(RecognitionEvent::Result(result)).is_err() {
                return;
            }
        }
    }
}

async fn decode<D: Decoder>(
    engine: &Arc<D>,
    audio: Vec<f32>,
    options: &TranscriptionOptions,
) -> AudioResult<String> {
    let engine = engine.clone();
    let options = options.clone();
    tokio::task::spawn_blocking(move || engine.decode(&audio, &options))
        .await
        .map_err(|e| AudioError::Recognition(format!("decoder task failed: {}", e)))?
}
