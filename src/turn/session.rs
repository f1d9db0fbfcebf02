//! The single active turn and its engine handles

use super::machine::TurnMode;
use crate::narration::Narration;
use crate::transcription::SpeechRecognizer;
use crate::vad::VadHandle;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Engine handles owned by one in-flight turn
pub(crate) struct Session {
    pub id: Uuid,
    pub narration: Option<Narration>,
    pub vad: Option<VadHandle>,
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
    superseded: Option<oneshot::Sender<()>>,
}

impl Session {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let session = Self {
            id: Uuid::new_v4(),
            narration: None,
            vad: None,
            recognizer: None,
            superseded: Some(tx),
        };
        (session, rx)
    }

    pub fn cancel_narration(&mut self) {
        if let Some(narration) = self.narration.take() {
            narration.cancel();
        }
    }

    pub fn stop_vad(&mut self) {
        if let Some(vad) = self.vad.take() {
            vad.stop();
        }
    }

    /// Wake the turn's driver so it resolves now
    pub fn supersede(&mut self) {
        if let Some(tx) = self.superseded.take() {
            let _ = tx.send(());
        }
    }

    /// Stop every engine this session started; idempotent
    pub fn teardown(&mut self) {
        self.cancel_narration();
        self.stop_vad();
        if let Some(recognizer) = self.recognizer.take() {
            recognizer.stop();
        }
        debug!("Session {} torn down", self.id);
    }
}

/// Holder for the at-most-one active session
#[derive(Default)]
pub(crate) struct SessionSlot {
    current: Mutex<Option<Session>>,
}

impl SessionSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a session; the slot must have been emptied first
    pub fn install(&self, session: Session) {
        let previous = self.lock().replace(session);
        if let Some(mut previous) = previous {
            previous.supersede();
            previous.teardown();
        }
    }

    pub fn take(&self) -> Option<Session> {
        self.lock().take()
    }

    /// Remove the session only if it is still `id`
    pub fn take_if(&self, id: Uuid) -> Option<Session> {
        let mut current = self.lock();
        if current.as_ref().is_some_and(|s| s.id == id) {
            current.take()
        } else {
            None
        }
    }

    /// Run `f` against session `id` if it is still the active one
    pub fn with<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.lock().as_mut().filter(|s| s.id == id).map(f)
    }

    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }
}

/// Record of one completed turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub session_id: Uuid,
    pub mode: Option<TurnMode>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Transcript or sentinel; absent for narration-only `speak`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}
