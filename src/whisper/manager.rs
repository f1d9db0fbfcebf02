//! Whisper model cache and download
//!
//! Models live in the standard Hugging Face cache. Lookups only scan the cache;
//! nothing is fetched unless a download is requested explicitly.

use crate::error::{AudioError, AudioResult};
use hf_hub::api::tokio::{ApiBuilder, Progress};
use hf_hub::Cache;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// GGML models; narration and recognition are English-only, so only the
/// English variants are offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WhisperModel {
    TinyEn,
    BaseEn,
    SmallEn,
    MediumEn,
}

impl WhisperModel {
    /// All models, smallest first; also the fallback search order
    pub fn all() -> &'static [WhisperModel] {
        &[
            WhisperModel::TinyEn,
            WhisperModel::BaseEn,
            WhisperModel::SmallEn,
            WhisperModel::MediumEn,
        ]
    }

    pub fn default_model() -> WhisperModel {
        WhisperModel::BaseEn
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WhisperModel::TinyEn => "Tiny English (75 MB)",
            WhisperModel::BaseEn => "Base English (142 MB)",
            WhisperModel::SmallEn => "Small English (466 MB)",
            WhisperModel::MediumEn => "Medium English (1.5 GB)",
        }
    }

    /// Name of the file in the model repository
    pub fn file_name(&self) -> &'static str {
        match self {
            WhisperModel::TinyEn => "ggml-tiny.en.bin",
            WhisperModel::BaseEn => "ggml-base.en.bin",
            WhisperModel::SmallEn => "ggml-small.en.bin",
            WhisperModel::MediumEn => "ggml-medium.en.bin",
        }
    }

    /// Name used on the command line and in settings
    pub fn short_name(&self) -> &'static str {
        match self {
            WhisperModel::TinyEn => "tiny.en",
            WhisperModel::BaseEn => "base.en",
            WhisperModel::SmallEn => "small.en",
            WhisperModel::MediumEn => "medium.en",
        }
    }

    /// Parse a short name; the `.en` suffix is optional
    pub fn from_short_name(name: &str) -> Option<WhisperModel> {
        match name.strip_suffix(".en").unwrap_or(name) {
            "tiny" => Some(WhisperModel::TinyEn),
            "base" => Some(WhisperModel::BaseEn),
            "small" => Some(WhisperModel::SmallEn),
            "medium" => Some(WhisperModel::MediumEn),
            _ => None,
        }
    }

    /// Approximate download size in bytes
    pub fn size_bytes(&self) -> u64 {
        match self {
            WhisperModel::TinyEn => 75_000_000,
            WhisperModel::BaseEn => 142_000_000,
            WhisperModel::SmallEn => 466_000_000,
            WhisperModel::MediumEn => 1_500_000_000,
        }
    }
}

impl std::fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Whether a model is available locally
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModelState {
    NotDownloaded,
    Downloaded { path: PathBuf },
}

/// Snapshot of a download in progress
#[derive(Debug, Clone, Default)]
pub struct ModelDownloadProgress {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Fraction complete (0.0 - 1.0)
    pub progress: f32,
    pub is_complete: bool,
    pub error: Option<String>,
}

/// Thread-safe progress tracker for downloads
#[derive(Clone, Default)]
pub struct ProgressTracker {
    downloaded: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    is_complete: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn add_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    fn set_complete(&self) {
        self.is_complete.store(true, Ordering::SeqCst);
    }

    fn set_error(&self, msg: String) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(msg);
    }

    pub fn get_progress(&self) -> ModelDownloadProgress {
        let downloaded = self.downloaded.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);

        ModelDownloadProgress {
            downloaded_bytes: downloaded,
            total_bytes: (total > 0).then_some(total),
            progress: if total > 0 {
                downloaded as f32 / total as f32
            } else {
                0.0
            },
            is_complete: self.is_complete.load(Ordering::SeqCst),
            error: self.error.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

/// Adapter from hf-hub's [`Progress`] callbacks to a [`ProgressTracker`]
#[derive(Clone)]
struct ProgressReporter {
    tracker: ProgressTracker,
}

impl Progress for ProgressReporter {
    async fn init(&mut self, size: usize, _filename: &str) {
        self.tracker.set_total(size as u64);
    }

    async fn update(&mut self, size: usize) {
        self.tracker.add_downloaded(size as u64);
    }

    async fn finish(&mut self) {
        self.tracker.set_complete();
    }
}

/// Locates and fetches whisper models
pub struct ModelManager {
    cache_dir: PathBuf,
    /// Hugging Face repo holding the GGML files
    repo_id: String,
}

impl ModelManager {
    /// Manager over the standard Hugging Face cache
    pub fn new() -> AudioResult<Self> {
        let cache_dir = Cache::from_env().path().to_path_buf();
        fs::create_dir_all(&cache_dir)?;
        Ok(Self::with_cache_dir(cache_dir))
    }

    pub fn with_cache_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            repo_id: "ggerganov/whisper.cpp".to_string(),
        }
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// hf-hub layout: cache_dir/models--{org}--{repo}/
    fn repo_cache_dir(&self) -> PathBuf {
        let repo_folder = self.repo_id.replace('/', "--");
        self.cache_dir.join(format!("models--{}", repo_folder))
    }

    /// Path to a cached, non-empty model file; never downloads
    pub fn get_cached_model_path(&self, model: WhisperModel) -> Option<PathBuf> {
        let snapshots_dir = self.repo_cache_dir().join("snapshots");
        let entries = fs::read_dir(&snapshots_dir).ok()?;

        let file_name = model.file_name();
        entries
            .flatten()
            .map(|entry| entry.path().join(file_name))
            // metadata() follows symlinks, so dangling snapshot links are skipped
            .find(|path| fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0))
    }

    pub fn get_model_state(&self, model: WhisperModel) -> ModelState {
        match self.get_cached_model_path(model) {
            Some(path) => ModelState::Downloaded { path },
            None => ModelState::NotDownloaded,
        }
    }

    /// Every model with its local state
    pub fn list_models(&self) -> Vec<(WhisperModel, ModelState)> {
        WhisperModel::all()
            .iter()
            .map(|&model| (model, self.get_model_state(model)))
            .collect()
    }

    /// Download a model into the cache, reporting progress to `progress`
    pub async fn download(
        &self,
        model: WhisperModel,
        progress: ProgressTracker,
    ) -> AudioResult<PathBuf> {
        let api = ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .build()
            .map_err(|e| AudioError::Model(format!("Failed to create HuggingFace API: {}", e)))?;

        let reporter = ProgressReporter {
            tracker: progress.clone(),
        };
        let result = api
            .model(self.repo_id.clone())
            .download_with_progress(model.file_name(), reporter)
            .await
            .map_err(|e| format!("Failed to download model {}: {}", model.display_name(), e));

        match result {
            Ok(path) => {
                progress.set_complete();
                Ok(path)
            }
            Err(e) => {
                progress.set_error(e.clone());
                Err(AudioError::Model(e))
            }
        }
    }
}
