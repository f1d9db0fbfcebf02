//! Text-to-speech narration
//!
//! [`Narrator`] drives a platform [`SpeechSynthesizer`] and absorbs its quirks:
//! - pending speech is flushed before every new utterance, then a short delay
//!   keeps the flush from swallowing the new utterance too
//! - long utterances can pause themselves; a keep-alive check resumes them
//!   while they are still marked as speaking
//!
//! Only one utterance is ever active: starting a new one supersedes the last.

mod spd;

pub use spd::SpeechDispatcher;

use crate::config::{NarrationConfig, LOCALE};
use crate::error::AudioResult;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Outcome signals of an utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NarrationEvent {
    Finished,
    Failed(String),
}

/// A single piece of text to speak
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub lang: &'static str,
    pub rate: f32,
}

/// Platform text-to-speech capability
pub trait SpeechSynthesizer: Send + Sync {
    /// Begin speaking; exactly one terminal [`NarrationEvent`] must follow
    /// unless the utterance is cancelled first
    fn speak(&self, utterance: Utterance, events: mpsc::UnboundedSender<NarrationEvent>)
        -> AudioResult<()>;

    /// Drop everything queued or playing; synchronous and infallible
    fn cancel(&self);

    fn resume(&self);

    fn is_speaking(&self) -> bool;

    fn is_paused(&self) -> bool;
}

/// An utterance in flight
pub struct Narration {
    task: JoinHandle<()>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Narration {
    /// Stop this utterance and its keep-alive check; idempotent
    pub fn cancel(&self) {
        if !self.task.is_finished() {
            self.task.abort();
        }
        self.synthesizer.cancel();
    }
}

impl Drop for Narration {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Narration engine
#[derive(Clone)]
pub struct Narrator {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: NarrationConfig,
}

impl Narrator {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, config: NarrationConfig) -> Self {
        Self {
            synthesizer,
            config,
        }
    }

    /// Flush pending narration (fire-and-forget)
    pub fn flush(&self) {
        self.synthesizer.cancel();
    }

    /// Start speaking `text`
    ///
    /// The returned receiver yields exactly one [`NarrationEvent`] unless the
    /// narration is cancelled.
    pub fn start(&self, text: &str) -> (Narration, mpsc::UnboundedReceiver<NarrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        self.flush();
        let utterance = Utterance {
            text: text.to_string(),
            lang: LOCALE,
            rate: self.config.rate,
        };
        let task = tokio::spawn(drive_utterance(
            self.synthesizer.clone(),
            utterance,
            self.config.clone(),
            tx,
        ));

        (
            Narration {
                task,
                synthesizer: self.synthesizer.clone(),
            },
            rx,
        )
    }

    /// Speak `text` to completion or error
    pub async fn speak(&self, text: &str) {
        let (_narration, mut events) = self.start(text);
        match events.recv().await {
            Some(NarrationEvent::Failed(reason)) => warn!("Narration failed: {}", reason),
            Some(NarrationEvent::Finished) | None => {}
        }
    }
}

async fn drive_utterance(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    utterance: Utterance,
    config: NarrationConfig,
    events: mpsc::UnboundedSender<NarrationEvent>,
) {
    sleep(config.flush_delay).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    debug!("Narrating {} chars", utterance.text.len());
    if let Err(e) = synthesizer.speak(utterance, tx) {
        let _ = events.send(NarrationEvent::Failed(e.to_string()));
        return;
    }

    let period = config.keep_alive_interval;
    let mut keep_alive = interval_at(Instant::now() + period, period);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut keep_alive_active = true;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = event.unwrap_or_else(|| {
                    NarrationEvent::Failed("synthesizer dropped the utterance".to_string())
                });
                let _ = events.send(event);
                return;
            }
            _ = keep_alive.tick(), if keep_alive_active => {
                if !synthesizer.is_speaking() {
                    keep_alive_active = false;
                } else if synthesizer.is_paused() {
                    debug!("Narration stalled, resuming");
                    synthesizer.resume();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSynthesizer;
    use std::time::Duration;

    fn narrator(synth: &Arc<FakeSynthesizer>) -> Narrator {
        Narrator::new(synth.clone(), NarrationConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_speak_waits_for_completion() {
        let synth = FakeSynthesizer::new(Duration::from_millis(1120));
        let started = Instant::now();
        narrator(&synth).speak("Hello").await;

        assert_eq!(started.elapsed(), Duration::from_millis(1200));
        assert_eq!(synth.spoken(), vec!["Hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_precedes_start() {
        let synth = FakeSynthesizer::new(Duration::from_millis(500));
        let (_narration, _rx) = narrator(&synth).start("text");
        assert_eq!(synth.cancel_count(), 1);
        assert!(synth.spoken().is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        assert_eq!(synth.spoken(), vec!["text".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_resumes_paused_narration() {
        let synth = FakeSynthesizer::new(Duration::from_secs(20));
        let (_narration, _rx) = narrator(&synth).start("long text");

        tokio::time::sleep(Duration::from_secs(3)).await;
        synth.set_paused(true);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(synth.resume_count(), 1);
        assert!(!synth.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_stops_once_speech_ends() {
        let synth = FakeSynthesizer::new(Duration::from_secs(20));
        let (_narration, _rx) = narrator(&synth).start("long text");

        tokio::time::sleep(Duration::from_secs(1)).await;
        synth.set_speaking(false);
        tokio::time::sleep(Duration::from_secs(6)).await;

        // A later stall belongs to someone else's speech
        synth.set_speaking(true);
        synth.set_paused(true);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(synth.resume_count(), 0);
        assert!(synth.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_speaks_nothing() {
        let synth = FakeSynthesizer::new(Duration::from_millis(500));
        let (narration, mut rx) = narrator(&synth).start("never");
        narration.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(synth.spoken().is_empty());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_error_is_reported() {
        let synth = FakeSynthesizer::failing();
        let (_narration, mut rx) = narrator(&synth).start("text");
        assert!(matches!(rx.recv().await, Some(NarrationEvent::Failed(_))));
    }
}
