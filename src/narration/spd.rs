//! speech-dispatcher backend
//!
//! Runs one `spd-say --wait` child per utterance. A stopped child (job control,
//! a stalled output module) counts as paused and is resumed with SIGCONT.

use super::{NarrationEvent, SpeechSynthesizer, Utterance};
use crate::error::{AudioError, AudioResult};
use log::{debug, warn};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

struct Active {
    generation: u64,
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    active: Option<Active>,
}

/// Synthesizer backed by the `spd-say` client
#[derive(Clone)]
pub struct SpeechDispatcher {
    command: String,
    inner: Arc<Mutex<Inner>>,
}

impl SpeechDispatcher {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// spd-say rate is -100..=100 around a neutral 0
    fn rate_arg(rate: f32) -> String {
        let rate = ((rate - 1.0) * 100.0).round().clamp(-100.0, 100.0) as i32;
        rate.to_string()
    }

    fn lang_arg(lang: &str) -> &str {
        lang.split('-').next().unwrap_or(lang)
    }
}

impl SpeechSynthesizer for SpeechDispatcher {
    fn speak(
        &self,
        utterance: Utterance,
        events: mpsc::UnboundedSender<NarrationEvent>,
    ) -> AudioResult<()> {
        let mut child = Command::new(&self.command)
            .arg("--wait")
            .args(["-l", Self::lang_arg(utterance.lang)])
            .args(["-r", &Self::rate_arg(utterance.rate)])
            .arg("--")
            .arg(&utterance.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AudioError::Narration(format!("{}: {}", self.command, e)))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.active = Some(Active {
                generation: inner.generation,
                pid: child.id(),
                kill: Some(kill_tx),
            });
            inner.generation
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let event = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => Some(NarrationEvent::Finished),
                    Ok(status) => Some(NarrationEvent::Failed(format!("synthesizer exited with {}", status))),
                    Err(e) => Some(NarrationEvent::Failed(e.to_string())),
                },
                _ = kill_rx => {
                    let _ = child.kill().await;
                    None
                }
            };

            let mut guard = inner.lock().unwrap_or_else(|e| e.into_inner());
            if guard.active.as_ref().map(|a| a.generation) == Some(generation) {
                guard.active = None;
            }
            drop(guard);

            if let Some(event) = event {
                let _ = events.send(event);
            }
        });

        Ok(())
    }

    fn cancel(&self) {
        let active = self.lock().active.take();
        if let Some(mut active) = active {
            if let Some(kill) = active.kill.take() {
                let _ = kill.send(());
            }
        }
        // Also drop anything other clients queued on our behalf
        run_detached(&self.command, &["--cancel"]);
    }

    fn resume(&self) {
        let Some(pid) = self.lock().active.as_ref().and_then(|a| a.pid) else {
            return;
        };
        debug!("Resuming narration process {}", pid);
        run_detached("kill", &["-CONT", &pid.to_string()]);
    }

    fn is_speaking(&self) -> bool {
        self.lock().active.is_some()
    }

    fn is_paused(&self) -> bool {
        let Some(pid) = self.lock().active.as_ref().and_then(|a| a.pid) else {
            return false;
        };
        process_stopped(pid)
    }
}

/// Spawn a short helper command and reap it on the runtime without waiting
fn run_detached(program: &str, args: &[&str]) -> bool {
    if tokio::runtime::Handle::try_current().is_err() {
        warn!("No async runtime to run {}", program);
        return false;
    }
    let spawned = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            warn!("Failed to run {}: {}", program, e);
            return false;
        }
    };

    let label = format!("{} {}", program, args.join(" "));
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("{} exited with {}", label, status),
            Err(e) => warn!("{} failed: {}", label, e),
        }
    });
    true
}

/// Whether /proc reports the process as stopped ('T') or traced ('t')
fn process_stopped(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // The command name is parenthesised and may contain spaces; the state follows it
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(|state| state == "T" || state == "t")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_mapping() {
        assert_eq!(SpeechDispatcher::rate_arg(1.05), "5");
        assert_eq!(SpeechDispatcher::rate_arg(1.0), "0");
        assert_eq!(SpeechDispatcher::rate_arg(5.0), "100");
    }

    #[test]
    fn test_lang_mapping() {
        assert_eq!(SpeechDispatcher::lang_arg("en-US"), "en");
    }

    #[test]
    fn test_own_process_is_not_stopped() {
        assert!(!process_stopped(std::process::id()));
    }

    #[test]
    fn test_detached_command_needs_runtime() {
        assert!(!run_detached("true", &[]));
    }

    #[tokio::test]
    async fn test_detached_command_returns_immediately() {
        let started = std::time::Instant::now();
        assert!(run_detached("sleep", &["5"]));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert!(!run_detached("repotour-no-such-helper", &[]));
    }

    #[test]
    fn test_resume_without_active_narration_is_noop() {
        SpeechDispatcher::new("spd-say").resume();
    }

    #[tokio::test]
    async fn test_missing_command_fails_to_start() {
        let synth = SpeechDispatcher::new("repotour-no-such-synthesizer");
        let (tx, _rx) = mpsc::unbounded_channel();
        let utterance = Utterance {
            text: "hi".to_string(),
            lang: "en-US",
            rate: 1.0,
        };
        assert!(matches!(
            synth.speak(utterance, tx),
            Err(AudioError::Narration(_))
        ));
        assert!(!synth.is_speaking());
    }
}
