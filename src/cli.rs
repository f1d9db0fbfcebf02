//! Command-line interface for repotour
//!
//! Handles argument parsing and logging configuration.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// Repotour - interruptible voice narration for guided repository tours
#[derive(Parser, Debug)]
#[command(name = "repotour")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace (includes whisper)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Replay a WAV file as the microphone instead of capturing live audio
    #[arg(long, value_name = "FILE", global = true)]
    pub wav: Option<PathBuf>,

    /// PipeWire node to capture from, or "default" for the default source
    #[arg(long, value_name = "NODE", global = true)]
    pub capture_target: Option<String>,

    /// Whisper model to recognize with (e.g. base.en)
    #[arg(long, value_name = "NAME", global = true)]
    pub model: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Speak text aloud
    Speak { text: String },

    /// Listen and print what was said
    Listen {
        /// Give up after this long (default 30000)
        #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
        timeout_ms: Option<u64>,
    },

    /// Speak text while listening for an interruption, then print the answer
    Ask {
        text: String,

        /// Give up after this long (default 30000)
        #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
        timeout_ms: Option<u64>,
    },

    /// Check that the microphone can be opened
    MicCheck,

    /// List whisper models and whether they are downloaded
    Models,

    /// Download a whisper model and make it the default
    DownloadModel {
        /// Model short name (default base.en)
        name: Option<String>,
    },
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    /// Only at trace level (-vvv) do we show whisper internals
    pub fn whisper_verbose(&self) -> bool {
        self.verbose >= 3
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);
    builder.filter_module("repotour", args.log_level());

    // Whisper output (via our custom callback) only at -vvv
    if args.whisper_verbose() {
        builder.filter_module("whisper", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
