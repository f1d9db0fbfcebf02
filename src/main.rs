//! Repotour - interruptible voice narration from the command line
//!
//! This is the main entry point for the repotour binary.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Args, Command};
use log::info;
use repotour::audio::{
    AudioResources, CaptureConfig, MicrophoneSource, PipeWireSource, WavFileSource,
};
use repotour::config::parse_capture_target;
use repotour::narration::SpeechDispatcher;
use repotour::transcription::{LiveConfig, RecognitionCapability};
use repotour::whisper::{self, ModelManager, ModelState, ProgressTracker, WhisperModel};
use repotour::{settings, TurnController, TurnReport, VoiceConfig};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    // Parse command-line arguments and initialize logging
    let args = Args::parse();
    cli::init_logging(&args);

    // Route whisper.cpp logs through our logging system
    whisper::init_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let mut config = VoiceConfig::default();
    settings::apply_overrides(&mut config);
    if let Some(model) = &args.model {
        config.model = Some(model.clone());
    }
    if let Some(target) = &args.capture_target {
        config.capture_target = parse_capture_target(target);
    }

    match &args.command {
        Command::Models => return list_models(args.json),
        Command::DownloadModel { name } => return download_model(name.as_deref(), args.json).await,
        _ => {}
    }

    let source: Arc<dyn MicrophoneSource> = match &args.wav {
        Some(path) => Arc::new(WavFileSource::new(path)),
        None => Arc::new(PipeWireSource::new(CaptureConfig {
            target: config.capture_target.clone(),
            ..CaptureConfig::default()
        })),
    };
    let resources = Arc::new(AudioResources::new(source));

    let recognition = match args.command {
        Command::Ask { .. } | Command::Listen { .. } => {
            let model = config.model.clone();
            let resources = resources.clone();
            tokio::task::spawn_blocking(move || {
                RecognitionCapability::detect(model.as_deref(), resources, LiveConfig::default())
            })
            .await
            .context("Model loading panicked")?
        }
        _ => RecognitionCapability::Unavailable,
    };

    let synthesizer = Arc::new(SpeechDispatcher::new(config.narration.command.clone()));
    let controller = TurnController::new(synthesizer, recognition, resources, &config);
    info!("Starting repotour {:?}", args.command);

    if let Command::MicCheck = args.command {
        return mic_check(&controller, args.json).await;
    }

    let report = tokio::select! {
        report = run_turn(&controller, &args.command) => report,
        _ = tokio::signal::ctrl_c() => {
            controller.kill_active_audio();
            bail!("Interrupted");
        }
    };
    print_report(&report, args.json)
}

async fn run_turn(controller: &TurnController, command: &Command) -> TurnReport {
    let timeout = |ms: &Option<u64>| {
        ms.map(Duration::from_millis)
            .unwrap_or_else(|| controller.default_timeout())
    };

    match command {
        Command::Speak { text } => controller.speak_report(text).await,
        Command::Listen { timeout_ms } => controller.listen_report(timeout(timeout_ms)).await,
        Command::Ask { text, timeout_ms } => {
            controller
                .speak_and_listen_report(text, timeout(timeout_ms))
                .await
        }
        Command::MicCheck | Command::Models | Command::DownloadModel { .. } => {
            unreachable!("handled before a turn starts")
        }
    }
}

fn print_report(report: &TurnReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if let Some(outcome) = &report.outcome {
        println!("{}", outcome);
    }
    Ok(())
}

async fn mic_check(controller: &TurnController, json: bool) -> Result<()> {
    let granted = controller.request_microphone_access().await;
    controller.kill_active_audio();

    if json {
        println!("{}", serde_json::json!({ "granted": granted }));
    } else {
        println!("Microphone access {}", if granted { "granted" } else { "denied" });
    }
    if !granted {
        bail!("Microphone unavailable");
    }
    Ok(())
}

fn list_models(json: bool) -> Result<()> {
    let manager = ModelManager::new().context("Failed to open model cache")?;
    let selected = settings::get_selected_model();
    let models = manager.list_models();

    if json {
        let entries: Vec<_> = models
            .iter()
            .map(|(model, state)| {
                serde_json::json!({
                    "name": model.short_name(),
                    "description": model.display_name(),
                    "size_bytes": model.size_bytes(),
                    "selected": selected.as_deref() == Some(model.short_name()),
                    "local": state,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for (model, state) in models {
        let marker = if selected.as_deref() == Some(model.short_name()) {
            "*"
        } else {
            " "
        };
        let status = match state {
            ModelState::Downloaded { path } => path.display().to_string(),
            ModelState::NotDownloaded => "not downloaded".to_string(),
        };
        println!(
            "{} {:<10} {:<24} {}",
            marker,
            model.short_name(),
            model.display_name(),
            status
        );
    }
    Ok(())
}

async fn download_model(name: Option<&str>, json: bool) -> Result<()> {
    let model = match name {
        Some(name) => match WhisperModel::from_short_name(name) {
            Some(model) => model,
            None => bail!("Unknown model '{}'", name),
        },
        None => WhisperModel::default_model(),
    };

    let manager = ModelManager::new().context("Failed to open model cache")?;
    if let Some(path) = manager.get_cached_model_path(model) {
        info!("{} already downloaded", model);
        settings::set_selected_model(model.short_name());
        return print_download(model, &path, json);
    }

    let tracker = ProgressTracker::new();
    let progress = tokio::spawn(report_progress(tracker.clone(), model));
    let result = manager.download(model, tracker).await;
    progress.abort();
    eprintln!();

    let path = result.with_context(|| format!("Failed to download {}", model))?;
    settings::set_selected_model(model.short_name());
    print_download(model, &path, json)
}

async fn report_progress(tracker: ProgressTracker, model: WhisperModel) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        let progress = tracker.get_progress();
        eprint!(
            "\rDownloading {}: {:>3}% ({} / {} MB)",
            model.short_name(),
            (progress.progress * 100.0) as u32,
            progress.downloaded_bytes / 1_000_000,
            progress.total_bytes.unwrap_or(model.size_bytes()) / 1_000_000
        );
        let _ = std::io::stderr().flush();
        if progress.is_complete || progress.error.is_some() {
            break;
        }
    }
}

fn print_download(model: WhisperModel, path: &std::path::Path, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::json!({ "name": model.short_name(), "path": path })
        );
    } else {
        println!("{} ready at {}", model.display_name(), path.display());
    }
    Ok(())
}
