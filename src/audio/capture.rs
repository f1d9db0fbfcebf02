//! Microphone capture using PipeWire
//!
//! A capture stream runs on its own thread and pushes mono samples into a
//! [`SharedCaptureState`] ring buffer. Consumers never own the stream: the
//! spectrum analyser reads the most recent window, the recognizer reads
//! everything written since its last cursor.

use crate::error::{AudioError, AudioResult};
use log::{debug, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Current state of a capture stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Stopped,
    Error,
}

/// How many seconds of audio the ring buffer retains
const RETAINED_SECONDS: usize = 30;

/// How long `open` waits for the capture thread to reach the server
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared state for a capture stream - thread-safe
#[derive(Clone)]
pub struct SharedCaptureState {
    inner: Arc<Mutex<CaptureStateInner>>,
}

struct CaptureStateInner {
    /// Most recent samples (f32, mono)
    ring: VecDeque<f32>,
    /// Total samples ever written; cursors are absolute positions in this count
    written: u64,
    sample_rate: u32,
    state: CaptureState,
    error: Option<String>,
}

impl CaptureStateInner {
    fn capacity(&self) -> usize {
        self.sample_rate as usize * RETAINED_SECONDS
    }
}

impl SharedCaptureState {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureStateInner {
                ring: VecDeque::new(),
                written: 0,
                sample_rate,
                state: CaptureState::Idle,
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureStateInner> {
        // A panicking writer leaves samples in a consistent state; keep reading.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state
    }

    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// Absolute position of the next sample to be written
    pub fn cursor(&self) -> u64 {
        self.lock().written
    }

    pub fn set_state(&self, state: CaptureState) {
        self.lock().state = state;
    }

    pub fn set_error(&self, error: String) {
        let mut inner = self.lock();
        inner.error = Some(error);
        inner.state = CaptureState::Error;
    }

    /// Process incoming audio samples
    pub fn process_samples(&self, samples: &[f32], sample_rate: u32) {
        if samples.is_empty() {
            return;
        }

        let mut inner = self.lock();
        if inner.sample_rate != sample_rate && sample_rate > 0 {
            // Format renegotiated; old samples are at the wrong rate
            inner.ring.clear();
            inner.sample_rate = sample_rate;
        }

        inner.ring.extend(samples.iter().copied());
        let capacity = inner.capacity();
        if inner.ring.len() > capacity {
            let excess = inner.ring.len() - capacity;
            inner.ring.drain(..excess);
        }
        inner.written += samples.len() as u64;
    }

    /// Copy the most recent `count` samples into `out`, zero-padding the front
    /// if fewer have been captured
    pub fn latest(&self, out: &mut [f32]) {
        let inner = self.lock();
        let count = out.len();
        let available = inner.ring.len().min(count);
        let pad = count - available;
        out[..pad].fill(0.0);
        let start = inner.ring.len() - available;
        for (dst, src) in out[pad..].iter_mut().zip(inner.ring.range(start..)) {
            *dst = *src;
        }
    }

    /// Read every retained sample written at or after `cursor`
    ///
    /// Returns the samples and the cursor to pass next time. Samples that fell
    /// out of the ring buffer are silently skipped.
    pub fn read_since(&self, cursor: u64) -> (Vec<f32>, u64) {
        let inner = self.lock();
        let oldest = inner.written - inner.ring.len() as u64;
        let from = cursor.max(oldest);
        let skip = (from - oldest) as usize;
        let samples = inner.ring.range(skip..).copied().collect();
        (samples, inner.written)
    }
}

/// A live capture stream handed out by a [`MicrophoneSource`]
pub trait CaptureStream: Send {
    /// Shared sample buffer fed by this stream
    fn shared_state(&self) -> SharedCaptureState;

    /// Stop capturing; must be idempotent
    fn stop(&mut self);
}

/// Something that can open a microphone capture stream
pub trait MicrophoneSource: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Open a new capture stream. This is the permission/acquisition point.
    fn open(&self) -> AudioResult<Box<dyn CaptureStream>>;
}

/// Audio capture configuration
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Requested sample rate (the server may negotiate another)
    pub sample_rate: u32,
    /// Node name to link to (`target.object`); `None` follows the default source
    ///
    /// The session manager falls back to the default source when the named
    /// node does not exist.
    pub target: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            target: None,
        }
    }
}

/// Default microphone via PipeWire
#[derive(Debug, Default)]
pub struct PipeWireSource {
    config: CaptureConfig,
}

impl PipeWireSource {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }
}

impl MicrophoneSource for PipeWireSource {
    fn name(&self) -> &str {
        "pipewire"
    }

    fn open(&self) -> AudioResult<Box<dyn CaptureStream>> {
        let mut capture = PipeWireCapture::new(self.config.sample_rate);
        capture.start(self.config.target.clone())?;
        Ok(Box::new(capture))
    }
}

enum PipeWireCommand {
    Stop,
}

/// A running PipeWire capture thread
pub struct PipeWireCapture {
    state: SharedCaptureState,
    is_running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: Option<pw::channel::Sender<PipeWireCommand>>,
}

impl PipeWireCapture {
    fn new(sample_rate: u32) -> Self {
        Self {
            state: SharedCaptureState::new(sample_rate),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender: None,
        }
    }

    /// Spawn the capture thread and wait until its stream is connected
    fn start(&mut self, target: Option<String>) -> AudioResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(AudioError::Capture("Capture already running".to_string()));
        }

        self.state.set_state(CaptureState::Capturing);
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();

        let (sender, receiver) = pw::channel::channel::<PipeWireCommand>();
        self.sender = Some(sender);
        let (ready_tx, ready_rx) = sync_channel(1);

        let handle = thread::Builder::new()
            .name("repotour-capture".to_string())
            .spawn(move || {
                if let Err(e) = run_capture_loop(state.clone(), receiver, target, &ready_tx) {
                    warn!("PipeWire capture failed: {}", e);
                    state.set_error(e.clone());
                    let _ = ready_tx.send(Err(e));
                }
                is_running.store(false, Ordering::SeqCst);
            })?;
        self.thread_handle = Some(handle);

        let failure = match ready_rx.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(RecvTimeoutError::Disconnected) => "capture thread exited".to_string(),
            Err(RecvTimeoutError::Timeout) => {
                // Leave a stuck thread detached rather than joining it
                if let Some(sender) = self.sender.take() {
                    let _ = sender.send(PipeWireCommand::Stop);
                }
                self.thread_handle = None;
                "timed out connecting to PipeWire".to_string()
            }
        };
        self.stop();
        self.state.set_error(failure.clone());
        Err(AudioError::Microphone(failure))
    }
}

impl CaptureStream for PipeWireCapture {
    fn shared_state(&self) -> SharedCaptureState {
        self.state.clone()
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(PipeWireCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            debug!("PipeWire capture thread joined");
        }
        self.is_running.store(false, Ordering::SeqCst);
        if self.state.state() != CaptureState::Error {
            self.state.set_state(CaptureState::Stopped);
        }
    }
}

impl Drop for PipeWireCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the PipeWire capture loop in a background thread
fn run_capture_loop(
    state: SharedCaptureState,
    receiver: pw::channel::Receiver<PipeWireCommand>,
    target: Option<String>,
    ready: &SyncSender<Result<(), String>>,
) -> Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _receiver = receiver.attach(mainloop.loop_(), move |cmd| match cmd {
        PipeWireCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedCaptureState,
    }

    let user_data = UserData {
        format: Default::default(),
        state: state.clone(),
    };

    let mut props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Communication",
        *pw::keys::APP_NAME => "Repotour",
    };
    if let Some(target) = target {
        debug!("Capturing from {}", target);
        props.insert("target.object", target);
    }

    let stream = pw::stream::StreamBox::new(&core, "repotour-capture", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            let Some(param) = param else { return };
            if id != spa::param::ParamType::Format.as_raw() {
                return;
            }

            let (media_type, media_subtype) = match format_utils::parse_format(param) {
                Ok(v) => v,
                Err(_) => return,
            };

            if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
                return;
            }

            if let Err(e) = user_data.format.parse(param) {
                warn!("Failed to parse negotiated audio format: {:?}", e);
            }
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1);
            let sample_rate = user_data.format.rate();
            let n_samples = data.chunk().size() / (std::mem::size_of::<f32>() as u32);

            if let Some(raw_samples) = data.data() {
                // Keep the first channel only
                let mut mono_samples = Vec::with_capacity((n_samples / n_channels) as usize);

                for i in (0..n_samples).step_by(n_channels as usize) {
                    let start = i as usize * std::mem::size_of::<f32>();
                    let end = start + std::mem::size_of::<f32>();
                    if end <= raw_samples.len() {
                        let sample = f32::from_le_bytes(
                            raw_samples[start..end].try_into().unwrap_or([0; 4]),
                        );
                        mono_samples.push(sample);
                    }
                }

                user_data.state.process_samples(&mono_samples, sample_rate);
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner();

    let pod = Pod::from_bytes(&values).ok_or("Serialized audio format is not a valid pod")?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    let _ = ready.send(Ok(()));
    mainloop.run();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_pads_with_silence() {
        let state = SharedCaptureState::new(16000);
        state.process_samples(&[0.5, 0.25], 16000);

        let mut out = [1.0f32; 4];
        state.latest(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.25]);
    }

    #[test]
    fn test_read_since_advances_cursor() {
        let state = SharedCaptureState::new(16000);
        state.process_samples(&[0.1, 0.2, 0.3], 16000);

        let (first, cursor) = state.read_since(0);
        assert_eq!(first, vec![0.1, 0.2, 0.3]);
        assert_eq!(cursor, 3);

        state.process_samples(&[0.4], 16000);
        let (second, cursor) = state.read_since(cursor);
        assert_eq!(second, vec![0.4]);
        assert_eq!(cursor, 4);
    }

    #[test]
    fn test_ring_drops_oldest_samples() {
        // 1 Hz "rate" keeps RETAINED_SECONDS samples
        let state = SharedCaptureState::new(1);
        let samples: Vec<f32> = (0..40).map(|i| i as f32).collect();
        state.process_samples(&samples, 1);

        let (kept, cursor) = state.read_since(0);
        assert_eq!(cursor, 40);
        assert_eq!(kept.len(), RETAINED_SECONDS);
        assert_eq!(kept[0], (40 - RETAINED_SECONDS) as f32);
    }
}
