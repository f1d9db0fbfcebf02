//! In-process fakes for the audio backends

use crate::audio::{CaptureState, CaptureStream, MicrophoneSource, SharedCaptureState};
use crate::error::{AudioError, AudioResult};
use crate::narration::{NarrationEvent, SpeechSynthesizer, Utterance};
use crate::transcription::{RecognitionEvent, RecognitionOptions, SpeechRecognizer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

const FAKE_RATE: u32 = 16000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Deterministic white noise in `-amplitude..amplitude`
pub fn noise(len: usize, amplitude: f32) -> Vec<f32> {
    let mut seed: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let unit = (seed >> 8) as f32 / (1u32 << 24) as f32;
            (unit * 2.0 - 1.0) * amplitude
        })
        .collect()
}

/// Ordered record of what the fakes were asked to do
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }
}

#[derive(Default)]
struct JournalSlot(Mutex<Option<Journal>>);

impl JournalSlot {
    fn set(&self, journal: &Journal) {
        *lock(&self.0) = Some(journal.clone());
    }

    fn record(&self, entry: impl Into<String>) {
        if let Some(journal) = lock(&self.0).as_ref() {
            journal.record(entry);
        }
    }
}

/// Microphone whose samples are supplied by the test
#[derive(Default)]
pub struct FakeMicrophone {
    deny: bool,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
    current: Mutex<Option<SharedCaptureState>>,
    journal: Arc<JournalSlot>,
}

impl FakeMicrophone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            ..Self::default()
        })
    }

    pub fn attach(&self, journal: &Journal) {
        self.journal.set(journal);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Put the most recently opened stream into the error state
    pub fn fail_stream(&self, reason: &str) {
        if let Some(state) = lock(&self.current).as_ref() {
            state.set_error(reason.to_string());
        }
    }

    /// Write samples into the most recently opened stream
    pub fn feed(&self, samples: &[f32]) {
        if let Some(state) = lock(&self.current).as_ref() {
            state.process_samples(samples, FAKE_RATE);
        }
    }
}

impl MicrophoneSource for FakeMicrophone {
    fn name(&self) -> &str {
        "fake"
    }

    fn open(&self) -> AudioResult<Box<dyn CaptureStream>> {
        if self.deny {
            return Err(AudioError::Microphone("permission denied".to_string()));
        }
        let state = SharedCaptureState::new(FAKE_RATE);
        state.set_state(CaptureState::Capturing);
        *lock(&self.current) = Some(state.clone());
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        self.journal.record("mic.open");
        Ok(Box::new(FakeStream {
            state,
            live: self.live.clone(),
            journal: self.journal.clone(),
            stopped: false,
        }))
    }
}

struct FakeStream {
    state: SharedCaptureState,
    live: Arc<AtomicUsize>,
    journal: Arc<JournalSlot>,
    stopped: bool,
}

impl CaptureStream for FakeStream {
    fn shared_state(&self) -> SharedCaptureState {
        self.state.clone()
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.state.set_state(CaptureState::Stopped);
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.journal.record("mic.close");
        }
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct SynthState {
    spoken: Vec<String>,
    generation: u64,
    speaking: bool,
    paused: bool,
    cancels: usize,
    resumes: usize,
}

/// Synthesizer that "speaks" every utterance for a fixed duration
pub struct FakeSynthesizer {
    duration: Duration,
    fail: bool,
    state: Arc<Mutex<SynthState>>,
    journal: JournalSlot,
}

impl FakeSynthesizer {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail: false,
            state: Arc::default(),
            journal: JournalSlot::default(),
        })
    }

    /// Every utterance fails to start
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            duration: Duration::ZERO,
            fail: true,
            state: Arc::default(),
            journal: JournalSlot::default(),
        })
    }

    pub fn attach(&self, journal: &Journal) {
        self.journal.set(journal);
    }

    pub fn spoken(&self) -> Vec<String> {
        lock(&self.state).spoken.clone()
    }

    pub fn cancel_count(&self) -> usize {
        lock(&self.state).cancels
    }

    pub fn resume_count(&self) -> usize {
        lock(&self.state).resumes
    }

    pub fn set_paused(&self, paused: bool) {
        lock(&self.state).paused = paused;
    }

    /// Override the speaking flag; the pending utterance never reports an end
    pub fn set_speaking(&self, speaking: bool) {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.speaking = speaking;
    }
}

impl SpeechSynthesizer for FakeSynthesizer {
    fn speak(
        &self,
        utterance: Utterance,
        events: mpsc::UnboundedSender<NarrationEvent>,
    ) -> AudioResult<()> {
        if self.fail {
            return Err(AudioError::Narration("no voices installed".to_string()));
        }
        self.journal.record(format!("speak:{}", utterance.text));

        let generation = {
            let mut state = lock(&self.state);
            state.spoken.push(utterance.text);
            state.generation += 1;
            state.speaking = true;
            state.generation
        };

        let state = self.state.clone();
        let duration = self.duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let mut state = lock(&state);
            if state.generation == generation {
                state.speaking = false;
                let _ = events.send(NarrationEvent::Finished);
            }
        });
        Ok(())
    }

    fn cancel(&self) {
        self.journal.record("cancel");
        let mut state = lock(&self.state);
        state.cancels += 1;
        state.generation += 1;
        state.speaking = false;
        state.paused = false;
    }

    fn resume(&self) {
        let mut state = lock(&self.state);
        state.resumes += 1;
        state.paused = false;
    }

    fn is_speaking(&self) -> bool {
        lock(&self.state).speaking
    }

    fn is_paused(&self) -> bool {
        lock(&self.state).paused
    }
}

#[derive(Default)]
struct RecognizerState {
    sender: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    starts: usize,
    failures_pending: usize,
    options: Vec<RecognitionOptions>,
}

/// Recognizer driven by events the test emits
#[derive(Default)]
pub struct FakeRecognizer {
    state: Mutex<RecognizerState>,
    journal: JournalSlot,
}

impl FakeRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, journal: &Journal) {
        self.journal.set(journal);
    }

    /// The next `start` fails as if audio could not be acquired
    pub fn fail_next_start(&self) {
        lock(&self.state).failures_pending += 1;
    }

    pub fn start_count(&self) -> usize {
        lock(&self.state).starts
    }

    pub fn options(&self) -> Vec<RecognitionOptions> {
        lock(&self.state).options.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).sender.is_some()
    }

    /// Deliver an event to the running session; `Ended` also ends it
    pub fn emit(&self, event: RecognitionEvent) {
        let mut state = lock(&self.state);
        if let Some(sender) = state.sender.as_ref() {
            let _ = sender.send(event.clone());
        }
        if event == RecognitionEvent::Ended {
            state.sender = None;
        }
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn start(
        &self,
        options: RecognitionOptions,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> AudioResult<()> {
        let mut state = lock(&self.state);
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(AudioError::Microphone("capture unavailable".to_string()));
        }
        if state.sender.is_some() {
            return Err(AudioError::AlreadyStarted);
        }
        state.starts += 1;
        state.options.push(options);
        state.sender = Some(events);
        self.journal.record("recognizer.start");
        Ok(())
    }

    fn stop(&self) {
        lock(&self.state).sender = None;
        self.journal.record("recognizer.stop");
    }
}
