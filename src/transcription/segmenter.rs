//! Utterance segmentation for live decoding
//!
//! Splits a 16kHz stream into speech segments: a segment opens on the first
//! voiced frame, reports partial audio for interim decoding while it grows,
//! and closes after a run of unvoiced frames. Long stretches with no speech
//! at all are reported so the recognizer can end its session the way
//! platform engines do.
//!
//! Frames are classified by the WebRTC voice detector, so steady room noise
//! or speaker spill does not hold a segment open.

use super::engine::WHISPER_SAMPLE_RATE;
use std::time::Duration;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// 20ms analysis frames
const FRAME_LEN: usize = WHISPER_SAMPLE_RATE as usize / 50;

fn frames_for(duration: Duration) -> usize {
    (duration.as_millis() as usize / 20).max(1)
}

/// Decides whether one 20ms frame of 16kHz PCM contains speech
pub trait VoiceClassifier: Send {
    fn is_voice(&mut self, frame: &[i16]) -> bool;
}

/// [`VoiceClassifier`] backed by libfvad
pub struct WebRtcVoice {
    vad: Vad,
}

// SAFETY: the fvad instance is plain heap state with no thread affinity, and
// it is only ever reached through `&mut self`.
unsafe impl Send for WebRtcVoice {}

impl WebRtcVoice {
    /// `mode` 0 (least) to 3 (most aggressive at rejecting non-speech)
    pub fn new(mode: u8) -> Self {
        let mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            _ => VadMode::VeryAggressive,
        };
        Self {
            vad: Vad::new_with_rate_and_mode(SampleRate::Rate16kHz, mode),
        }
    }
}

impl VoiceClassifier for WebRtcVoice {
    fn is_voice(&mut self, frame: &[i16]) -> bool {
        self.vad.is_voice_segment(frame).unwrap_or(false)
    }
}

fn to_pcm16(frame: &[f32]) -> Vec<i16> {
    frame
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

/// Something the recognizer should act on
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Speech in progress; audio so far, for an interim hypothesis
    Partial(Vec<f32>),
    /// A complete utterance, for a final result
    Closed(Vec<f32>),
    /// Nothing has been said for the whole no-speech window
    NoSpeech,
}

/// Streaming speech segmenter
pub struct SpeechSegmenter {
    classifier: Box<dyn VoiceClassifier>,
    close_after: usize,
    partial_every: usize,
    max_frames: usize,
    no_speech_after: usize,
    pending: Vec<f32>,
    segment: Vec<f32>,
    in_speech: bool,
    quiet_frames: usize,
    frames_since_partial: usize,
    idle_frames: usize,
}

impl SpeechSegmenter {
    pub fn new(
        classifier: Box<dyn VoiceClassifier>,
        close_after: Duration,
        partial_every: Duration,
        max_segment: Duration,
        no_speech_after: Duration,
    ) -> Self {
        Self {
            classifier,
            close_after: frames_for(close_after),
            partial_every: frames_for(partial_every),
            max_frames: frames_for(max_segment),
            no_speech_after: frames_for(no_speech_after),
            pending: Vec::new(),
            segment: Vec::new(),
            in_speech: false,
            quiet_frames: 0,
            frames_since_partial: 0,
            idle_frames: 0,
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Feed 16kHz samples; returns what happened, in order
    pub fn push(&mut self, samples: &[f32]) -> Vec<SegmentEvent> {
        self.pending.extend_from_slice(samples);
        let mut events = Vec::new();

        let whole = self.pending.len() / FRAME_LEN * FRAME_LEN;
        let frames: Vec<f32> = self.pending.drain(..whole).collect();
        for frame in frames.chunks(FRAME_LEN) {
            if let Some(event) = self.push_frame(frame) {
                events.push(event);
            }
        }
        events
    }

    fn push_frame(&mut self, frame: &[f32]) -> Option<SegmentEvent> {
        let voiced = self.classifier.is_voice(&to_pcm16(frame));

        if !self.in_speech {
            if !voiced {
                self.idle_frames += 1;
                if self.idle_frames >= self.no_speech_after {
                    self.idle_frames = 0;
                    return Some(SegmentEvent::NoSpeech);
                }
                return None;
            }
            self.in_speech = true;
            self.idle_frames = 0;
            self.quiet_frames = 0;
            self.frames_since_partial = 0;
            self.segment.clear();
        }

        self.segment.extend_from_slice(frame);
        self.frames_since_partial += 1;
        self.quiet_frames = if voiced { 0 } else { self.quiet_frames + 1 };

        let segment_frames = self.segment.len() / FRAME_LEN;
        if self.quiet_frames >= self.close_after || segment_frames >= self.max_frames {
            return Some(self.close());
        }
        if self.frames_since_partial >= self.partial_every {
            self.frames_since_partial = 0;
            return Some(SegmentEvent::Partial(self.segment.clone()));
        }
        None
    }

    fn close(&mut self) -> SegmentEvent {
        self.in_speech = false;
        self.quiet_frames = 0;
        self.idle_frames = 0;
        SegmentEvent::Closed(std::mem::take(&mut self.segment))
    }
}

/// Treats any frame above a fixed amplitude as speech
#[cfg(test)]
pub(crate) struct LoudFrames;

#[cfg(test)]
impl VoiceClassifier for LoudFrames {
    fn is_voice(&mut self, frame: &[i16]) -> bool {
        frame.iter().any(|s| s.unsigned_abs() > 1000)
    }
}
