//! `run` subcommand: feed a landmark source through the recognizer.
//!
//! Wires the frame worker, the quality controller, and the text
//! assembler together, then pumps frames from the source until it is
//! exhausted, a signal arrives, or the exit timer fires.  Status is
//! logged periodically and once more on shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::config::RecognizerConfig;
use crate::context::{Counter, RuntimeContext};
use crate::pipeline::worker::{spawn_controller, spawn_worker};
use crate::pipeline::{CountingHook, FramePipeline, SentenceSink};
use crate::quality::{ProcessMetrics, QualityController, Stage, StageSwitches};
use crate::replay::{LandmarkSource, ReplaySource};
use crate::text::TextAssembler;

/// Faults listed individually in the shutdown summary.
const RECENT_FAULTS_LOGGED: usize = 5;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn install_signal_handlers() {
    let handler = signal_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
    unsafe {
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Prints every confirmed sentence on its own stdout line.
pub struct StdoutSink;

impl SentenceSink for StdoutSink {
    fn on_sentence(&mut self, sentence: &str) {
        println!("{}", sentence);
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub landmarks: PathBuf,
    pub model: Option<PathBuf>,
    pub config: RecognizerConfig,
    /// Pace the replay at this rate; `None` replays as fast as possible.
    pub replay_fps: Option<f32>,
    /// Drop frames when the worker queue is full instead of waiting.
    pub drop_when_busy: bool,
    /// Stop after N seconds.
    pub exit_after: Option<u64>,
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub malformed: u64,
    pub frames_processed: u64,
    pub sentences: u64,
    /// Stopped by a signal or the exit timer rather than end of input.
    pub interrupted: bool,
    pub paused: bool,
}

/// Run the recognizer until the source is exhausted or shutdown.
/// Confirmed sentences go to `sink`.
pub fn run(options: RunOptions, sink: Box<dyn SentenceSink>) -> anyhow::Result<RunSummary> {
    let config = options.config;
    info!("Configuration: {}", config.config_sexp());

    // Open the recording before any thread starts.
    let mut source = ReplaySource::open(&options.landmarks)?;
    info!("Replaying {}", options.landmarks.display());

    let context = Arc::new(RuntimeContext::default());
    let switches = Arc::new(StageSwitches::new(config.stages));
    let text = Arc::new(TextAssembler::new(config.idle_timeout));
    info!("Pending text auto-confirms after {:?} idle", text.idle_timeout());
    let classifier = Classifier::load(options.model.as_deref(), &config.classifier);
    info!("Classifier: {}", classifier.status_sexp());

    let mut pipeline = FramePipeline::new(
        &config,
        classifier,
        Arc::clone(&text),
        Arc::clone(&switches),
        Arc::clone(&context),
    );
    pipeline.add_sink(sink);
    debug!("Tracking: {}", pipeline.config_sexp());
    // Enhancement stages run out of process; only their invocations are
    // tracked here.
    let mut stage_counts: Vec<(Stage, Arc<AtomicU64>)> = Vec::new();
    for stage in Stage::PRIORITY {
        let (hook, count) = CountingHook::new(stage);
        pipeline.add_hook(Box::new(hook));
        stage_counts.push((stage, count));
    }

    let controller = QualityController::new(config.quality.clone(), Arc::clone(&switches));
    debug!("Quality: {}", controller.config_sexp());
    let controller = spawn_controller(
        controller,
        Box::new(ProcessMetrics::new(Arc::clone(&context))),
        Arc::clone(&context),
    )?;
    let (sender, worker) = spawn_worker(pipeline, config.queue_capacity, Arc::clone(&context))?;

    install_signal_handlers();

    let start_time = Instant::now();
    let exit_duration = options.exit_after.map(Duration::from_secs);
    let frame_interval = options
        .replay_fps
        .filter(|fps| *fps > 0.0)
        .map(|fps| Duration::from_secs_f32(1.0 / fps));
    let mut next_due = Instant::now();
    let mut last_status_log = Instant::now();
    let mut interrupted = false;

    loop {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received");
            interrupted = true;
            break;
        }
        if let Some(dur) = exit_duration {
            if start_time.elapsed() >= dur {
                info!("Exit timer fired after {}s", dur.as_secs());
                interrupted = true;
                break;
            }
        }
        if worker.is_finished() {
            warn!("Frame worker exited early");
            break;
        }

        // Periodic status logging
        if last_status_log.elapsed() >= config.status_interval {
            info!(
                "Status: {} queued {} stages {} text {}",
                context.status_sexp(),
                sender.queued(),
                switches.status_sexp(),
                text.snapshot().status_sexp(),
            );
            last_status_log = Instant::now();
        }

        let Some(frame) = source.next_frame() else {
            info!("Recording exhausted after {} frame(s)", source.frames());
            break;
        };

        if options.drop_when_busy {
            sender.offer(frame);
        } else {
            sender.send(frame)?;
        }

        if let Some(interval) = frame_interval {
            next_due += interval;
            let now = Instant::now();
            if next_due > now {
                std::thread::sleep(next_due - now);
            } else {
                next_due = now;
            }
        }
    }

    drop(sender);
    if interrupted {
        worker.stop();
    }
    let mut pipeline = worker.join()?;
    let controller = controller.join()?;

    pipeline.flush_pending();

    let stages: Vec<String> = stage_counts
        .iter()
        .map(|(stage, count)| format!(":{} {}", stage.as_str(), count.load(Ordering::Relaxed)))
        .collect();
    info!("Final counters: {}", context.status_sexp());
    info!("Final pipeline: {}", pipeline.status_sexp());
    info!("Final quality: {}", controller.status_sexp());
    let quality = controller.state();
    if quality.active {
        warn!("Ended degraded at level {}", quality.level);
    }
    info!("Stage invocations: ({})", stages.join(" "));
    if source.malformed() > 0 {
        warn!("{} recording line(s) were unreadable", source.malformed());
    }
    let faults = context.fault_summary();
    if !faults.is_empty() {
        let summary: Vec<String> = faults
            .iter()
            .map(|(severity, n)| format!(":{} {}", severity.as_str(), n))
            .collect();
        warn!("Faults recorded: ({})", summary.join(" "));
        for fault in context.faults().iter().rev().take(RECENT_FAULTS_LOGGED) {
            warn!(
                "  [{}] {} ({:.1}s ago): {}",
                fault.severity.as_str(),
                fault.component,
                fault.at.elapsed().as_secs_f32(),
                fault.message,
            );
        }
    }

    Ok(RunSummary {
        frames_read: source.frames(),
        malformed: source.malformed(),
        frames_processed: context.get(Counter::FramesProcessed),
        sentences: context.get(Counter::SentencesConfirmed),
        interrupted,
        paused: pipeline.is_paused(),
    })
}

// ── Tests ──────────────────────────────────────────────────
