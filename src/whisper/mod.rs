//! Whisper models and whisper.cpp log routing

mod manager;

use log::{debug, error, info, trace, warn};
use whisper_rs::GGMLLogLevel;

pub use manager::{ModelDownloadProgress, ModelManager, ModelState, ProgressTracker, WhisperModel};

/// Routes whisper.cpp output to the `whisper` log target
///
/// # Safety
/// Called from C; `text` must be null or a valid null-terminated string.
unsafe extern "C" fn whisper_log_callback(
    level: u32,
    text: *const std::os::raw::c_char,
    _user_data: *mut std::os::raw::c_void,
) {
    if text.is_null() {
        return;
    }

    // SAFETY: checked non-null above; whisper.cpp passes terminated strings
    let line = unsafe { std::ffi::CStr::from_ptr(text) }.to_string_lossy();
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    match GGMLLogLevel::from(level) {
        GGMLLogLevel::None | GGMLLogLevel::Debug => debug!(target: "whisper", "{}", trimmed),
        GGMLLogLevel::Info => info!(target: "whisper", "{}", trimmed),
        GGMLLogLevel::Warn => warn!(target: "whisper", "{}", trimmed),
        GGMLLogLevel::Error => error!(target: "whisper", "{}", trimmed),
        GGMLLogLevel::Cont => trace!(target: "whisper", "{}", trimmed),
        GGMLLogLevel::Unknown(lvl) => {
            warn!(target: "whisper", "unknown log level {}: {}", lvl, trimmed)
        }
    }
}

/// Install [`whisper_log_callback`]; call once before loading a model
pub fn init_logging() {
    // SAFETY: the callback is a plain function with no user data
    unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    }
}
