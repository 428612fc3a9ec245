//! signstream-recognizer - hand-landmark sign recognizer
//!
//! Turns a stream of hand-landmark frames into text: motion tracking,
//! control gestures, sign classification, and sentence assembly, with an
//! adaptive quality controller for optional enhancement stages.

mod classify;
mod config;
mod context;
mod landmarks;
mod pipeline;
mod quality;
mod replay;
mod runner;
mod sexp;
mod text;
mod tracking;

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::classify::training::{load_dataset, train, TrainingOptions};
use crate::config::RecognizerConfig;

#[derive(Parser, Debug)]
#[command(
    name = "signstream-recognizer",
    version,
    about = "Hand-landmark sign recognizer"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a landmark recording through the recognizer
    Run(RunArgs),
    /// Build a centroid classifier artifact from labeled sequences
    Train(TrainArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Landmark recording (one s-expression frame per line)
    #[arg(long)]
    landmarks: PathBuf,

    /// Classifier artifact (default: heuristic fallback)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Configuration overrides (plist s-expression)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frames buffered between the source and the worker
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Replay at this many frames per second (default: as fast as possible)
    #[arg(long)]
    replay_fps: Option<f32>,

    /// Drop frames when the worker is busy instead of waiting
    #[arg(long)]
    drop_when_busy: bool,

    /// Exit after N seconds
    #[arg(long)]
    exit_after: Option<u64>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Dataset file or directory of .sexp files
    #[arg(long)]
    data: PathBuf,

    /// Where to write the artifact
    #[arg(long)]
    out: PathBuf,

    /// Also write the training report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// Configuration file; its classifier sequence length is the default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resampled window length (default: configured, else 24)
    #[arg(long)]
    sequence_length: Option<usize>,

    #[arg(long, default_value_t = classify::centroid::DEFAULT_CONFIDENCE_SCALE)]
    confidence_scale: f32,

    #[arg(long, default_value_t = 8)]
    min_samples_per_class: usize,

    /// Share of each class held out for validation
    #[arg(long, default_value_t = 0.2)]
    validation_split: f32,

    /// Skip mirror augmentation
    #[arg(long)]
    no_augment: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signstream_recognizer=info".into()),
        )
        .init();

    info!("signstream-recognizer v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run(args) => run(args),
        Command::Train(args) => run_train(args),
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = capacity;
    }
    config.validate()?;

    let summary = runner::run(
        runner::RunOptions {
            landmarks: args.landmarks,
            model: args.model,
            config,
            replay_fps: args.replay_fps,
            drop_when_busy: args.drop_when_busy,
            exit_after: args.exit_after,
        },
        Box::new(runner::StdoutSink),
    )?;
    info!(
        frames = summary.frames_read,
        malformed = summary.malformed,
        processed = summary.frames_processed,
        sentences = summary.sentences,
        interrupted = summary.interrupted,
        paused = summary.paused,
        "Run finished",
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RecognizerConfig> {
    match path {
        Some(path) => RecognizerConfig::load(path),
        None => Ok(RecognizerConfig::default()),
    }
}

fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let dataset = load_dataset(&args.data)?;
    info!(
        samples = dataset.samples.len(),
        skipped = dataset.skipped,
        "Dataset loaded from {}",
        args.data.display(),
    );

    let config = load_config(args.config.as_deref())?;
    let options = TrainingOptions {
        sequence_length: args
            .sequence_length
            .unwrap_or_else(|| config.classifier.training_sequence_length()),
        confidence_scale: args.confidence_scale,
        min_samples_per_class: args.min_samples_per_class,
        validation_split: args.validation_split,
        augment: !args.no_augment,
        ..TrainingOptions::default()
    };
    let (artifact, report) = train(&dataset, &options)?;
    artifact.save(&args.out)?;
    info!(
        labels = artifact.labels.len(),
        "Artifact written to {}",
        args.out.display(),
    );

    let rendered = report.render();
    print!("{}", rendered);
    if let Some(path) = &args.report {
        std::fs::write(path, &rendered)
            .map_err(|e| anyhow!("failed to write report {}: {}", path.display(), e))?;
    }
    Ok(())
}
