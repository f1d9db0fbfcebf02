//! Pure turn-taking state machine
//!
//! The machine owns the per-turn flags (`speaking`, `barged_in`) and the
//! transcript. It never touches audio: the controller feeds it events and
//! carries out the actions it returns.

use crate::config::TurnWindows;
use crate::transcription::{
    RecognitionErrorKind, RecognitionEvent, RecognitionResult, Transcript,
    RECOGNITION_UNAVAILABLE,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;

/// What kind of turn is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// Listening only, no narration
    ListenOnly,
    /// Narration with barge-in detection
    Interruptible,
    /// Narration with no recognition behind it; always ends unavailable
    NarrationOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Narrating,
    BargedIn,
    NarrationComplete,
    Listening,
    Done,
}

/// Inputs to the machine
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    NarrationFinished,
    NarrationFailed(String),
    SustainedVoice,
    Recognition(RecognitionEvent),
    /// Recognition ended on its own and could not be started again
    RestartFailed(String),
    SilenceElapsed,
    Timeout,
    /// Another turn or an explicit kill took over
    Superseded,
}

/// Effects the controller must apply, in order
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    CancelNarration,
    StopVad,
    /// (Re)arm the single silence/grace timer
    ArmSilenceTimer(Duration),
    RestartRecognition { after: Duration },
    /// Tear everything down and resolve with this outcome
    Finish(String),
}

/// State of one turn
#[derive(Debug, Clone)]
pub struct TurnMachine {
    mode: TurnMode,
    phase: TurnPhase,
    speaking: bool,
    barged_in: bool,
    transcript: Transcript,
    windows: TurnWindows,
}

impl TurnMachine {
    pub fn new(mode: TurnMode, windows: TurnWindows) -> Self {
        let narrating = mode != TurnMode::ListenOnly;
        Self {
            mode,
            phase: if narrating {
                TurnPhase::Narrating
            } else {
                TurnPhase::Listening
            },
            speaking: narrating,
            barged_in: false,
            transcript: Transcript::new(),
            windows,
        }
    }

    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn barged_in(&self) -> bool {
        self.barged_in
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_done(&self) -> bool {
        self.phase == TurnPhase::Done
    }

    /// Apply one event; a finished machine ignores everything
    pub fn handle(&mut self, event: TurnEvent) -> Vec<TurnAction> {
        if self.is_done() {
            return Vec::new();
        }

        match event {
            TurnEvent::NarrationFinished => self.narration_ended(),
            TurnEvent::NarrationFailed(reason) => {
                warn!("Narration failed, treating as complete: {}", reason);
                self.narration_ended()
            }
            TurnEvent::SustainedVoice => self.barge_in("voice activity"),
            TurnEvent::Recognition(RecognitionEvent::Result(result)) => self.on_result(result),
            TurnEvent::Recognition(RecognitionEvent::Error(kind)) => self.on_error(kind),
            TurnEvent::Recognition(RecognitionEvent::Ended) => {
                debug!("Recognition ended unexpectedly, restarting");
                vec![TurnAction::RestartRecognition {
                    after: self.restart_delay(),
                }]
            }
            TurnEvent::RestartFailed(reason) => {
                warn!("Recognition restart failed: {}", reason);
                self.finish(self.outcome())
            }
            TurnEvent::SilenceElapsed => self.finish(self.outcome()),
            TurnEvent::Timeout => {
                debug!("Turn timed out");
                self.finish(self.outcome())
            }
            TurnEvent::Superseded => {
                debug!("Turn superseded");
                self.finish(self.outcome())
            }
        }
    }

    fn restart_delay(&self) -> Duration {
        match self.mode {
            TurnMode::ListenOnly => Duration::ZERO,
            _ => self.windows.restart_delay,
        }
    }

    fn silence_window(&self) -> Duration {
        match self.mode {
            TurnMode::ListenOnly => self.windows.listen_silence,
            _ => self.windows.barge_in_silence,
        }
    }

    fn outcome(&self) -> String {
        match self.mode {
            TurnMode::NarrationOnly => RECOGNITION_UNAVAILABLE.to_string(),
            _ => self.transcript.finalize(),
        }
    }

    fn narration_ended(&mut self) -> Vec<TurnAction> {
        if !self.speaking {
            return Vec::new();
        }
        self.speaking = false;

        if self.mode == TurnMode::NarrationOnly {
            return self.finish(self.outcome());
        }

        self.phase = TurnPhase::NarrationComplete;
        let window = if self.transcript.is_empty() {
            self.windows.grace
        } else {
            self.silence_window()
        };
        vec![TurnAction::StopVad, TurnAction::ArmSilenceTimer(window)]
    }

    fn barge_in(&mut self, trigger: &str) -> Vec<TurnAction> {
        if !self.speaking || self.barged_in || self.mode != TurnMode::Interruptible {
            return Vec::new();
        }
        info!("Barge-in ({})", trigger);
        self.barged_in = true;
        self.speaking = false;
        self.phase = TurnPhase::BargedIn;
        vec![TurnAction::CancelNarration, TurnAction::StopVad]
    }

    fn on_result(&mut self, result: RecognitionResult) -> Vec<TurnAction> {
        let final_text = result.final_text.filter(|t| !t.trim().is_empty());
        let interim_heard = result
            .interim_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if final_text.is_none() && !interim_heard {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if self.speaking && interim_heard {
            actions.extend(self.barge_in("transcription"));
        }

        if let Some(text) = final_text {
            debug!("Final result: {}", text);
            self.transcript.push_final(&text);
        }

        // Finals heard over narration wait for it to end
        if self.speaking {
            return actions;
        }
        self.phase = TurnPhase::Listening;
        actions.push(TurnAction::ArmSilenceTimer(self.silence_window()));
        actions
    }

    fn on_error(&mut self, kind: RecognitionErrorKind) -> Vec<TurnAction> {
        if kind.is_transient() {
            debug!("Ignoring transient recognition error: {:?}", kind);
            return Vec::new();
        }
        if self.speaking {
            debug!("Recognition error during narration deferred: {:?}", kind);
            return Vec::new();
        }
        warn!("Recognition error: {:?}", kind);
        self.finish(self.transcript.finalize_after_error(&kind))
    }

    fn finish(&mut self, outcome: String) -> Vec<TurnAction> {
        info!("Turn finished: {:?}", outcome);
        self.phase = TurnPhase::Done;
        self.speaking = false;
        vec![TurnAction::Finish(outcome)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::NO_RESPONSE;

    fn windows() -> TurnWindows {
        TurnWindows::default()
    }

    fn interim(text: &str) -> TurnEvent {
        TurnEvent::Recognition(RecognitionEvent::Result(RecognitionResult::interim(text)))
    }

    fn final_result(text: &str) -> TurnEvent {
        TurnEvent::Recognition(RecognitionEvent::Result(RecognitionResult::final_text(
            text,
        )))
    }

    fn error(kind: RecognitionErrorKind) -> TurnEvent {
        TurnEvent::Recognition(RecognitionEvent::Error(kind))
    }

    #[test]
    fn test_vad_barge_in_cancels_narration() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert_eq!(
            machine.handle(TurnEvent::SustainedVoice),
            vec![TurnAction::CancelNarration, TurnAction::StopVad]
        );
        assert_eq!(machine.phase(), TurnPhase::BargedIn);
        assert!(machine.barged_in());
        assert!(!machine.is_speaking());
    }

    #[test]
    fn test_barge_in_happens_once() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        let first = machine.handle(TurnEvent::SustainedVoice);
        let second = machine.handle(interim("hey"));

        let cancels = first
            .iter()
            .chain(second.iter())
            .filter(|a| **a == TurnAction::CancelNarration)
            .count();
        assert_eq!(cancels, 1);
        assert_eq!(
            second,
            vec![TurnAction::ArmSilenceTimer(Duration::from_millis(2500))]
        );
        assert!(machine.handle(TurnEvent::SustainedVoice).is_empty());
    }

    #[test]
    fn test_interim_while_speaking_barges_in_and_arms_silence() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert_eq!(
            machine.handle(interim("wait")),
            vec![
                TurnAction::CancelNarration,
                TurnAction::StopVad,
                TurnAction::ArmSilenceTimer(Duration::from_millis(2500)),
            ]
        );
        // Interim text never reaches the transcript
        assert!(machine.transcript().is_empty());
    }

    #[test]
    fn test_blank_result_during_narration_is_ignored() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert!(machine.handle(interim("  ")).is_empty());
        assert!(machine.is_speaking());
    }

    #[test]
    fn test_final_during_narration_is_kept_without_barge_in() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert!(machine.handle(final_result("stop")).is_empty());
        assert!(machine.is_speaking());
        assert!(!machine.barged_in());

        // Already heard something, so narration end uses the short window
        assert_eq!(
            machine.handle(TurnEvent::NarrationFinished),
            vec![
                TurnAction::StopVad,
                TurnAction::ArmSilenceTimer(Duration::from_millis(2500)),
            ]
        );
        assert_eq!(
            machine.handle(TurnEvent::SilenceElapsed),
            vec![TurnAction::Finish("stop".to_string())]
        );
    }

    #[test]
    fn test_blank_final_keeps_grace_window() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        machine.handle(TurnEvent::NarrationFinished);
        assert!(machine.handle(final_result("   ")).is_empty());
        assert_eq!(machine.phase(), TurnPhase::NarrationComplete);

        let mut machine = TurnMachine::new(TurnMode::ListenOnly, windows());
        assert!(machine.handle(final_result("")).is_empty());
        assert!(machine
            .handle(TurnEvent::Recognition(RecognitionEvent::Result(
                RecognitionResult::default()
            )))
            .is_empty());
    }

    #[test]
    fn test_barge_in_then_silence_finalizes_transcript() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        machine.handle(TurnEvent::SustainedVoice);
        machine.handle(final_result("thanks"));
        assert_eq!(
            machine.handle(TurnEvent::SilenceElapsed),
            vec![TurnAction::Finish("thanks".to_string())]
        );
        assert!(machine.is_done());
    }

    #[test]
    fn test_narration_complete_starts_grace() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert_eq!(
            machine.handle(TurnEvent::NarrationFinished),
            vec![
                TurnAction::StopVad,
                TurnAction::ArmSilenceTimer(Duration::from_millis(8000)),
            ]
        );
        assert_eq!(machine.phase(), TurnPhase::NarrationComplete);

        // A result in the grace window switches to the ordinary silence window
        assert_eq!(
            machine.handle(final_result("ok")),
            vec![TurnAction::ArmSilenceTimer(Duration::from_millis(2500))]
        );
        assert_eq!(
            machine.handle(TurnEvent::SilenceElapsed),
            vec![TurnAction::Finish("ok".to_string())]
        );
    }

    #[test]
    fn test_narration_failure_counts_as_completion() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        let actions = machine.handle(TurnEvent::NarrationFailed("synth crashed".into()));
        assert_eq!(
            actions.last(),
            Some(&TurnAction::ArmSilenceTimer(Duration::from_millis(8000)))
        );
        assert!(!machine.is_speaking());
    }

    #[test]
    fn test_grace_elapsing_without_speech() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        machine.handle(TurnEvent::NarrationFinished);
        assert_eq!(
            machine.handle(TurnEvent::SilenceElapsed),
            vec![TurnAction::Finish(NO_RESPONSE.to_string())]
        );
    }

    #[test]
    fn test_finished_narration_after_barge_in_is_ignored() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        machine.handle(TurnEvent::SustainedVoice);
        assert!(machine.handle(TurnEvent::NarrationFinished).is_empty());
        assert_eq!(machine.phase(), TurnPhase::BargedIn);
    }

    #[test]
    fn test_listen_only_uses_short_silence_and_immediate_restart() {
        let mut machine = TurnMachine::new(TurnMode::ListenOnly, windows());
        assert_eq!(machine.phase(), TurnPhase::Listening);
        assert_eq!(
            machine.handle(final_result("hello")),
            vec![TurnAction::ArmSilenceTimer(Duration::from_millis(2000))]
        );
        assert_eq!(
            machine.handle(TurnEvent::Recognition(RecognitionEvent::Ended)),
            vec![TurnAction::RestartRecognition {
                after: Duration::ZERO
            }]
        );
    }

    #[test]
    fn test_interruptible_restart_is_delayed() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert_eq!(
            machine.handle(TurnEvent::Recognition(RecognitionEvent::Ended)),
            vec![TurnAction::RestartRecognition {
                after: Duration::from_millis(100)
            }]
        );
    }

    #[test]
    fn test_no_speech_errors_are_ignored() {
        let mut machine = TurnMachine::new(TurnMode::ListenOnly, windows());
        assert!(machine
            .handle(error(RecognitionErrorKind::NoSpeech))
            .is_empty());
        assert!(!machine.is_done());
    }

    #[test]
    fn test_errors_during_narration_are_deferred() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert!(machine
            .handle(error(RecognitionErrorKind::Network))
            .is_empty());
        assert!(machine.is_speaking());
    }

    #[test]
    fn test_fatal_error_finalizes() {
        let mut machine = TurnMachine::new(TurnMode::ListenOnly, windows());
        assert_eq!(
            machine.handle(error(RecognitionErrorKind::NotAllowed)),
            vec![TurnAction::Finish(RECOGNITION_UNAVAILABLE.to_string())]
        );

        let mut machine = TurnMachine::new(TurnMode::ListenOnly, windows());
        machine.handle(final_result("half a"));
        assert_eq!(
            machine.handle(error(RecognitionErrorKind::Aborted)),
            vec![TurnAction::Finish("half a".to_string())]
        );
    }

    #[test]
    fn test_restart_failure_keeps_transcript() {
        let mut machine = TurnMachine::new(TurnMode::ListenOnly, windows());
        machine.handle(final_result("so far"));
        assert_eq!(
            machine.handle(TurnEvent::RestartFailed("mic gone".into())),
            vec![TurnAction::Finish("so far".to_string())]
        );
    }

    #[test]
    fn test_timeout_wins_in_any_phase() {
        let mut machine = TurnMachine::new(TurnMode::Interruptible, windows());
        assert_eq!(
            machine.handle(TurnEvent::Timeout),
            vec![TurnAction::Finish(NO_RESPONSE.to_string())]
        );
        assert!(machine.handle(final_result("late")).is_empty());
    }

    #[test]
    fn test_narration_only_resolves_unavailable_after_narration() {
        let mut machine = TurnMachine::new(TurnMode::NarrationOnly, windows());
        assert!(machine.handle(TurnEvent::SustainedVoice).is_empty());
        assert_eq!(
            machine.handle(TurnEvent::NarrationFinished),
            vec![TurnAction::Finish(RECOGNITION_UNAVAILABLE.to_string())]
        );
    }

    #[test]
    fn test_finals_accumulate_with_separator() {
        let mut machine = TurnMachine::new(TurnMode::ListenOnly, windows());
        machine.handle(final_result("one"));
        machine.handle(interim("tw"));
        machine.handle(final_result("two"));
        assert_eq!(
            machine.handle(TurnEvent::Superseded),
            vec![TurnAction::Finish("one two".to_string())]
        );
    }
}
