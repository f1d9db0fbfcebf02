//! Energy-based voice activity detection for barge-in
//!
//! Samples the shared microphone's byte spectrum on a fixed interval and fires
//! once when enough consecutive frames exceed the energy threshold. This is a
//! best-effort detector: when the microphone cannot be acquired the turn simply
//! proceeds with transcription-based barge-in only.

use crate::audio::{AnalyserContext, AudioResources};
use crate::config::VadConfig;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Signal emitted by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SustainedVoice,
}

/// Debounce counter over per-frame energy readings
#[derive(Debug, Clone)]
pub struct EnergyGate {
    threshold: f32,
    required: u32,
    voiced_frames: u32,
}

impl EnergyGate {
    pub fn new(threshold: f32, required: u32) -> Self {
        Self {
            threshold,
            required: required.max(1),
            voiced_frames: 0,
        }
    }

    /// Feed one frame's average energy; returns true once voice is sustained
    pub fn observe(&mut self, average: f32) -> bool {
        if average > self.threshold {
            self.voiced_frames += 1;
        } else {
            self.voiced_frames = 0;
        }
        self.voiced_frames >= self.required
    }

    pub fn voiced_frames(&self) -> u32 {
        self.voiced_frames
    }
}

/// Handle to a running detector
pub struct VadHandle {
    context: Arc<Mutex<Option<AnalyserContext>>>,
    task: JoinHandle<()>,
}

impl VadHandle {
    /// Stop sampling and close the analysis context; idempotent
    pub fn stop(&self) {
        self.task.abort();
        let context = self
            .context
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut context) = context {
            context.close();
            debug!("VAD stopped");
        }
    }
}

impl Drop for VadHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Voice activity detector bound to the shared microphone
#[derive(Clone, Debug)]
pub struct VoiceActivityDetector {
    config: VadConfig,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self { config }
    }

    /// Start sampling; returns `None` when the microphone is unavailable
    pub fn start(
        &self,
        resources: &AudioResources,
        events: mpsc::UnboundedSender<VadEvent>,
    ) -> Option<VadHandle> {
        let context = match resources.open_analyser(self.config.fft_size, self.config.smoothing) {
            Ok(context) => context,
            Err(e) => {
                warn!("VAD mic access failed: {}", e);
                return None;
            }
        };

        let context = Arc::new(Mutex::new(Some(context)));
        let task = tokio::spawn(run_sampler(
            context.clone(),
            EnergyGate::new(self.config.threshold, self.config.debounce_frames),
            self.config.interval,
            events,
        ));
        Some(VadHandle { context, task })
    }
}

async fn run_sampler(
    context: Arc<Mutex<Option<AnalyserContext>>>,
    mut gate: EnergyGate,
    period: std::time::Duration,
    events: mpsc::UnboundedSender<VadEvent>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let average = {
            let mut guard = context.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_mut() {
                Some(ctx) if !ctx.is_released() => ctx.analyser().average_energy(),
                _ => return,
            }
        };

        if gate.observe(average) {
            debug!(
                "Sustained voice after {} frames (avg energy {:.1})",
                gate.voiced_frames(),
                average
            );
            let _ = events.send(VadEvent::SustainedVoice);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{noise, FakeMicrophone};
    use std::time::Duration;

    #[test]
    fn test_gate_requires_consecutive_frames() {
        let mut gate = EnergyGate::new(15.0, 3);
        assert!(!gate.observe(20.0));
        assert!(!gate.observe(20.0));
        assert!(!gate.observe(10.0)); // spike broken by a quiet frame
        assert_eq!(gate.voiced_frames(), 0);
        assert!(!gate.observe(16.0));
        assert!(!gate.observe(16.0));
        assert!(gate.observe(16.0));
    }

    #[test]
    fn test_gate_threshold_is_exclusive() {
        let mut gate = EnergyGate::new(15.0, 1);
        assert!(!gate.observe(15.0));
        assert!(gate.observe(15.1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_debounce() {
        let mic = FakeMicrophone::new();
        let resources = AudioResources::new(mic.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let vad = VoiceActivityDetector::new(VadConfig::default());
        let handle = vad.start(&resources, tx).expect("vad should start");

        let started = Instant::now();
        mic.feed(&noise(1024, 0.8));
        assert_eq!(rx.recv().await, Some(VadEvent::SustainedVoice));
        assert_eq!(started.elapsed(), Duration::from_millis(240));

        handle.stop();
        assert_eq!(resources.open_analysers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_never_fires() {
        let mic = FakeMicrophone::new();
        let resources = AudioResources::new(mic.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let vad = VoiceActivityDetector::new(VadConfig::default());
        let _handle = vad.start(&resources, tx).expect("vad should start");

        mic.feed(&vec![0.0; 1024]);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_microphone_yields_none() {
        let resources = AudioResources::new(FakeMicrophone::denied());
        let (tx, _rx) = mpsc::unbounded_channel();
        let vad = VoiceActivityDetector::new(VadConfig::default());
        assert!(vad.start(&resources, tx).is_none());
    }
}
