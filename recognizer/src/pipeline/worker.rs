//! Threads around the frame pipeline.
//!
//! Frames reach the worker through a bounded queue so a slow frame never
//! stalls the producer: [`FrameSender::offer`] drops a frame when the
//! queue is full.  The quality controller runs on its own thread, driven
//! by a calloop timer, and only talks to the worker through the shared
//! stage switches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;
use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::FramePipeline;
use crate::context::{Counter, RuntimeContext, Severity};
use crate::landmarks::LandmarkFrame;
use crate::quality::{MetricsSource, QualityChange, QualityController};

/// How long blocking waits sleep before rechecking the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ── Producer side ──────────────────────────────────────────

/// Cloneable handle for feeding frames (`None` = no hand) to the worker.
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<Option<LandmarkFrame>>,
    context: Arc<RuntimeContext>,
}

impl FrameSender {
    /// Queue a frame without waiting.  Returns false when it was dropped
    /// (queue full) or the worker is gone.
    pub fn offer(&self, frame: Option<LandmarkFrame>) -> bool {
        self.context.incr(Counter::FramesReceived);
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.context.incr(Counter::FramesDropped);
                debug!("Frame queue full, dropped frame ({} total)", dropped);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queue a frame, waiting for room.
    pub fn send(&self, frame: Option<LandmarkFrame>) -> anyhow::Result<()> {
        self.context.incr(Counter::FramesReceived);
        self.tx
            .send(frame)
            .map_err(|_| anyhow!("frame worker has stopped"))
    }

    /// Frames currently waiting in the queue.
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

// ── Worker ─────────────────────────────────────────────────

pub struct WorkerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<FramePipeline>>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Ask the worker to stop after its current frame.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the worker and take the pipeline back.  Frames already
    /// queued are processed first unless [`stop`](Self::stop) was called.
    pub fn join(mut self) -> anyhow::Result<FramePipeline> {
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("frame worker already joined"))?;
        thread
            .join()
            .map_err(|_| anyhow!("frame worker thread panicked"))
    }
}

/// Start the frame worker with a queue of `capacity` frames.
pub fn spawn_worker(
    mut pipeline: FramePipeline,
    capacity: usize,
    context: Arc<RuntimeContext>,
) -> anyhow::Result<(FrameSender, WorkerHandle)> {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);

    let thread = thread::Builder::new()
        .name("frame-worker".to_string())
        .spawn(move || {
            run_worker(&mut pipeline, &rx, &flag);
            pipeline
        })
        .map_err(|e| anyhow!("failed to spawn frame worker: {}", e))?;

    info!(capacity = capacity.max(1), "Frame worker started");
    Ok((
        FrameSender { tx, context },
        WorkerHandle {
            running,
            thread: Some(thread),
        },
    ))
}

fn run_worker(
    pipeline: &mut FramePipeline,
    rx: &Receiver<Option<LandmarkFrame>>,
    running: &AtomicBool,
) {
    let mut processed = 0u64;
    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(frame) => {
                pipeline.process(frame);
                processed += 1;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Frame queue closed");
                break;
            }
        }
    }
    info!("Frame worker stopped after {} frame(s)", processed);
}

// ── Quality controller thread ──────────────────────────────

struct ControllerLoop {
    controller: QualityController,
    source: Box<dyn MetricsSource>,
    context: Arc<RuntimeContext>,
}

pub struct ControllerHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<anyhow::Result<QualityController>>>,
}

impl ControllerHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop the controller and take it back.
    pub fn join(mut self) -> anyhow::Result<QualityController> {
        self.stop();
        let thread = self
            .thread
            .take()
            .ok_or_else(|| anyhow!("quality controller already joined"))?;
        thread
            .join()
            .map_err(|_| anyhow!("quality controller thread panicked"))?
    }
}

/// Start the quality controller, ticking every `tick_interval`.
pub fn spawn_controller(
    controller: QualityController,
    source: Box<dyn MetricsSource>,
    context: Arc<RuntimeContext>,
) -> anyhow::Result<ControllerHandle> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let tick = controller.config.tick_interval;

    let thread = thread::Builder::new()
        .name("quality-controller".to_string())
        .spawn(move || {
            let mut state = ControllerLoop {
                controller,
                source,
                context,
            };
            run_controller(&mut state, tick, &flag)?;
            Ok(state.controller)
        })
        .map_err(|e| anyhow!("failed to spawn quality controller: {}", e))?;

    info!(tick_ms = tick.as_millis() as u64, "Quality controller started");
    Ok(ControllerHandle {
        running,
        thread: Some(thread),
    })
}

fn run_controller(
    state: &mut ControllerLoop,
    tick: Duration,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let mut event_loop: EventLoop<ControllerLoop> =
        EventLoop::try_new().map_err(|e| anyhow!("failed to create controller loop: {}", e))?;

    event_loop
        .handle()
        .insert_source(Timer::from_duration(tick), move |_, _, state| {
            let sample = state.source.sample();
            match state.controller.tick(sample) {
                Some(QualityChange::Degraded { stage, level }) => {
                    state.context.record_fault(
                        Severity::Warning,
                        "quality",
                        format!("disabled {} (level {})", stage.as_str(), level),
                    );
                }
                Some(QualityChange::Restored { stages }) => {
                    info!("Quality restored, {} stage(s) re-enabled", stages.len());
                }
                None => {}
            }
            TimeoutAction::ToDuration(tick)
        })
        .map_err(|e| anyhow!("failed to insert controller timer: {:?}", e))?;

    let poll = tick.min(POLL_INTERVAL);
    while running.load(Ordering::SeqCst) {
        if let Err(e) = event_loop.dispatch(Some(poll), state) {
            warn!("Controller loop dispatch failed: {}", e);
            return Err(anyhow!("controller loop: {}", e));
        }
    }
    debug!("Quality controller stopped: {}", state.controller.status_sexp());
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────
