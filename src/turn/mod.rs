//! Turn-taking controller
//!
//! [`TurnController`] composes narration, transcription and voice activity
//! detection into the three turn operations. At most one turn is active: every
//! operation first tears down whatever was running, and a turn that loses its
//! session that way resolves right away with what it had.

mod machine;
mod session;

pub use machine::{TurnAction, TurnEvent, TurnMachine, TurnMode, TurnPhase};
pub use session::TurnReport;

use crate::audio::AudioResources;
use crate::config::{TurnWindows, VoiceConfig};
use crate::error::{AudioError, AudioResult};
use crate::narration::{NarrationEvent, Narrator, SpeechSynthesizer};
use crate::transcription::{
    RecognitionCapability, RecognitionEvent, RecognitionOptions, SpeechRecognizer,
    NO_RESPONSE, RECOGNITION_UNAVAILABLE,
};
use crate::vad::{VadEvent, VoiceActivityDetector};
use chrono::Utc;
use log::{debug, info, warn};
use session::{Session, SessionSlot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

/// Receivers feeding one turn's driver
struct TurnChannels {
    narration: Option<mpsc::UnboundedReceiver<NarrationEvent>>,
    vad: Option<mpsc::UnboundedReceiver<VadEvent>>,
    recognition: mpsc::UnboundedReceiver<RecognitionEvent>,
    /// Handed to the recognizer again on every restart
    recognition_tx: mpsc::UnboundedSender<RecognitionEvent>,
    options: RecognitionOptions,
    superseded: oneshot::Receiver<()>,
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Ends a session if the turn future is dropped before it resolves
struct SessionGuard<'a> {
    controller: &'a TurnController,
    id: Uuid,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.controller.end_session(self.id);
    }
}

/// Public voice surface: speak, listen, and speak-while-listening
pub struct TurnController {
    narrator: Narrator,
    recognition: RecognitionCapability,
    resources: Arc<AudioResources>,
    vad: VoiceActivityDetector,
    windows: TurnWindows,
    default_timeout: Duration,
    sessions: SessionSlot,
}

impl TurnController {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        recognition: RecognitionCapability,
        resources: Arc<AudioResources>,
        config: &VoiceConfig,
    ) -> Self {
        Self {
            narrator: Narrator::new(synthesizer, config.narration.clone()),
            recognition,
            resources,
            vad: VoiceActivityDetector::new(config.vad.clone()),
            windows: config.windows,
            default_timeout: config.default_timeout,
            sessions: SessionSlot::default(),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn recognition_available(&self) -> bool {
        self.recognition.is_available()
    }

    pub fn has_active_session(&self) -> bool {
        self.sessions.is_active()
    }

    /// Speak `text`; resolves when narration completes or fails
    pub async fn speak(&self, text: &str) {
        self.speak_report(text).await;
    }

    /// Listen until silence follows speech or `timeout` elapses
    pub async fn listen(&self, timeout: Duration) -> String {
        outcome_of(self.listen_report(timeout).await)
    }

    /// Speak `text` while listening for the listener to cut in
    pub async fn speak_and_listen(&self, text: &str, timeout: Duration) -> String {
        outcome_of(self.speak_and_listen_report(text, timeout).await)
    }

    /// Ask for the microphone; the first grant is cached
    pub async fn request_microphone_access(&self) -> bool {
        let resources = self.resources.clone();
        tokio::task::spawn_blocking(move || resources.request_microphone_access())
            .await
            .unwrap_or(false)
    }

    /// Force-terminate the active turn, if any, and release all audio
    ///
    /// Synchronous and idempotent.
    pub fn kill_active_audio(&self) {
        if let Some(mut session) = self.sessions.take() {
            info!("Killing active session {}", session.id);
            session.supersede();
            session.teardown();
        }
        self.narrator.flush();
        self.resources.release_all();
    }

    pub async fn speak_report(&self, text: &str) -> TurnReport {
        self.kill_active_audio();
        let started_at = Utc::now();

        let (mut session, superseded) = Session::new();
        let id = session.id;
        let (narration, mut events) = self.narrator.start(text);
        session.narration = Some(narration);
        self.sessions.install(session);
        let _guard = SessionGuard {
            controller: self,
            id,
        };

        tokio::select! {
            event = events.recv() => match event {
                Some(NarrationEvent::Failed(reason)) => warn!("Narration failed: {}", reason),
                Some(NarrationEvent::Finished) | None => debug!("Narration finished"),
            },
            _ = superseded => debug!("Narration superseded"),
        }
        self.end_session(id);

        TurnReport {
            session_id: id,
            mode: None,
            started_at,
            finished_at: Utc::now(),
            outcome: None,
        }
    }

    pub async fn listen_report(&self, timeout: Duration) -> TurnReport {
        self.kill_active_audio();
        let started_at = Utc::now();

        let RecognitionCapability::Available(recognizer) = &self.recognition else {
            info!("Speech recognition unavailable");
            return unavailable_report(started_at);
        };

        let (mut session, superseded) = Session::new();
        let id = session.id;
        let (tx, rx) = mpsc::unbounded_channel();
        let options = RecognitionOptions {
            interim_results: false,
        };
        if let Err(e) = recognizer.start(options, tx.clone()) {
            warn!("Recognition failed to start: {}", e);
            return unavailable_report(started_at);
        }
        session.recognizer = Some(recognizer.clone());
        self.sessions.install(session);
        let _guard = SessionGuard {
            controller: self,
            id,
        };

        let channels = TurnChannels {
            narration: None,
            vad: None,
            recognition: rx,
            recognition_tx: tx,
            options,
            superseded,
        };
        let machine = TurnMachine::new(TurnMode::ListenOnly, self.windows);
        let outcome = self.drive(id, machine, timeout, channels).await;

        TurnReport {
            session_id: id,
            mode: Some(TurnMode::ListenOnly),
            started_at,
            finished_at: Utc::now(),
            outcome: Some(outcome),
        }
    }

    pub async fn speak_and_listen_report(&self, text: &str, timeout: Duration) -> TurnReport {
        self.kill_active_audio();
        let started_at = Utc::now();

        let (mut session, superseded) = Session::new();
        let id = session.id;
        let (narration, narration_rx) = self.narrator.start(text);
        session.narration = Some(narration);

        let (tx, rx) = mpsc::unbounded_channel();
        let options = RecognitionOptions {
            interim_results: true,
        };
        session.recognizer = match &self.recognition {
            RecognitionCapability::Available(recognizer) => {
                match recognizer.start(options, tx.clone()) {
                    Ok(()) => Some(recognizer.clone()),
                    Err(e) => {
                        warn!("Recognition failed to start: {}", e);
                        None
                    }
                }
            }
            RecognitionCapability::Unavailable => None,
        };

        let mut vad_rx = None;
        let mode = if session.recognizer.is_some() {
            let (vad_tx, rx) = mpsc::unbounded_channel();
            session.vad = self.vad.start(&self.resources, vad_tx);
            vad_rx = Some(rx);
            TurnMode::Interruptible
        } else {
            info!("Speech recognition unavailable; narrating only");
            TurnMode::NarrationOnly
        };

        self.sessions.install(session);
        let _guard = SessionGuard {
            controller: self,
            id,
        };

        let channels = TurnChannels {
            narration: Some(narration_rx),
            vad: vad_rx,
            recognition: rx,
            recognition_tx: tx,
            options,
            superseded,
        };
        let machine = TurnMachine::new(mode, self.windows);
        let outcome = self.drive(id, machine, timeout, channels).await;

        TurnReport {
            session_id: id,
            mode: Some(mode),
            started_at,
            finished_at: Utc::now(),
            outcome: Some(outcome),
        }
    }

    /// Map engine signals and timers to machine events until the turn resolves
    async fn drive(
        &self,
        id: Uuid,
        mut machine: TurnMachine,
        timeout: Duration,
        mut channels: TurnChannels,
    ) -> String {
        let deadline = Instant::now() + timeout;
        let mut silence_at: Option<Instant> = None;
        let mut restart_at: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut channels.superseded => TurnEvent::Superseded,
                _ = sleep_until(deadline) => TurnEvent::Timeout,
                Some(event) = recv_or_pending(&mut channels.narration) => match event {
                    NarrationEvent::Finished => TurnEvent::NarrationFinished,
                    NarrationEvent::Failed(reason) => TurnEvent::NarrationFailed(reason),
                },
                Some(VadEvent::SustainedVoice) = recv_or_pending(&mut channels.vad) => {
                    TurnEvent::SustainedVoice
                }
                Some(event) = channels.recognition.recv() => TurnEvent::Recognition(event),
                _ = sleep_until(silence_at.unwrap_or(deadline)), if silence_at.is_some() => {
                    silence_at = None;
                    TurnEvent::SilenceElapsed
                }
                _ = sleep_until(restart_at.unwrap_or(deadline)), if restart_at.is_some() => {
                    restart_at = None;
                    match self.restart_recognition(id, channels.options, &channels.recognition_tx) {
                        Ok(()) => continue,
                        Err(e) => TurnEvent::RestartFailed(e.to_string()),
                    }
                }
            };

            for action in machine.handle(event) {
                match action {
                    TurnAction::CancelNarration => {
                        channels.narration = None;
                        self.sessions.with(id, Session::cancel_narration);
                    }
                    TurnAction::StopVad => {
                        channels.vad = None;
                        self.sessions.with(id, Session::stop_vad);
                    }
                    TurnAction::ArmSilenceTimer(window) => {
                        silence_at = Some(Instant::now() + window);
                    }
                    TurnAction::RestartRecognition { after } => {
                        restart_at = Some(Instant::now() + after);
                    }
                    TurnAction::Finish(outcome) => {
                        self.end_session(id);
                        return outcome;
                    }
                }
            }
        }
    }

    fn restart_recognition(
        &self,
        id: Uuid,
        options: RecognitionOptions,
        events: &mpsc::UnboundedSender<RecognitionEvent>,
    ) -> AudioResult<()> {
        let recognizer: Arc<dyn SpeechRecognizer> = self
            .sessions
            .with(id, |s| s.recognizer.clone())
            .flatten()
            .ok_or_else(|| AudioError::Recognition("session no longer active".to_string()))?;
        recognizer.start(options, events.clone())?;
        debug!("Recognition restarted");
        Ok(())
    }

    /// Tear down session `id` if it is still the active one
    fn end_session(&self, id: Uuid) {
        if let Some(mut session) = self.sessions.take_if(id) {
            session.teardown();
            self.resources.release_all();
        }
    }
}

impl Drop for TurnController {
    fn drop(&mut self) {
        self.kill_active_audio();
    }
}

fn outcome_of(report: TurnReport) -> String {
    report.outcome.unwrap_or_else(|| NO_RESPONSE.to_string())
}

fn unavailable_report(started_at: chrono::DateTime<Utc>) -> TurnReport {
    TurnReport {
        session_id: Uuid::new_v4(),
        mode: None,
        started_at,
        finished_at: Utc::now(),
        outcome: Some(RECOGNITION_UNAVAILABLE.to_string()),
    }
}
