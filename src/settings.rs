//! Persistent engine settings using dconf
//!
//! Settings are stored in dconf under `/com/repotour/voice/` as strings.
//! Missing or unparsable keys leave the built-in defaults untouched.

use crate::config::{parse_capture_target, VoiceConfig};
use log::{debug, error, warn};
use std::time::Duration;

const DCONF_PATH: &str = "/com/repotour/voice/";

/// Keys for dconf settings
mod keys {
    pub const SELECTED_MODEL: &str = "selected-model";
    pub const BARGE_IN_SILENCE_MS: &str = "barge-in-silence-ms";
    pub const GRACE_MS: &str = "grace-ms";
    pub const VAD_THRESHOLD: &str = "vad-threshold";
    pub const NARRATION_COMMAND: &str = "narration-command";
    pub const CAPTURE_TARGET: &str = "capture-target";
}

fn key(name: &str) -> String {
    format!("{}{}", DCONF_PATH, name)
}

/// Get the selected Whisper model name from dconf
pub fn get_selected_model() -> Option<String> {
    dconf_rs::get_string(&key(keys::SELECTED_MODEL))
        .ok()
        .filter(|s| !s.is_empty())
}

/// Set the selected Whisper model name in dconf
pub fn set_selected_model(model_name: &str) {
    if let Err(e) = dconf_rs::set_string(&key(keys::SELECTED_MODEL), model_name) {
        error!("Failed to save selected model to dconf: {}", e);
    }
}

fn get_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = dconf_rs::get_string(&key(name))
        .ok()
        .filter(|s| !s.trim().is_empty())?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("dconf: ignoring invalid {} = {:?}", name, raw);
            None
        }
    }
}

fn get_millis(name: &str) -> Option<Duration> {
    get_parsed::<u64>(name)
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis)
}

/// Apply any stored overrides on top of `config`
pub fn apply_overrides(config: &mut VoiceConfig) {
    if let Some(model) = get_selected_model() {
        debug!("dconf: selected model {}", model);
        config.model = Some(model);
    }
    if let Some(silence) = get_millis(keys::BARGE_IN_SILENCE_MS) {
        debug!("dconf: barge-in silence {:?}", silence);
        config.windows.barge_in_silence = silence;
    }
    if let Some(grace) = get_millis(keys::GRACE_MS) {
        debug!("dconf: grace window {:?}", grace);
        config.windows.grace = grace;
    }
    if let Some(threshold) = get_parsed::<f32>(keys::VAD_THRESHOLD).filter(|&t| t > 0.0) {
        debug!("dconf: VAD threshold {}", threshold);
        config.vad.threshold = threshold;
    }
    if let Ok(command) = dconf_rs::get_string(&key(keys::NARRATION_COMMAND)) {
        if !command.is_empty() {
            config.narration.command = command;
        }
    }
    if let Ok(target) = dconf_rs::get_string(&key(keys::CAPTURE_TARGET)) {
        if !target.is_empty() {
            debug!("dconf: capture target {}", target);
            config.capture_target = parse_capture_target(&target);
        }
    }
}
