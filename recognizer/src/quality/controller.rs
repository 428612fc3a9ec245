//! Closed-loop quality controller.
//!
//! Once per tick the controller records CPU load and frame rate in two
//! rolling windows.  When the window means show overload it disables the
//! most expensive optional stage that is still enabled; when load
//! recovers it re-enables what it disabled, in reverse order.  Both
//! windows are cleared after every change so the next decision is made
//! on fresh samples.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::metrics::PerformanceSample;
use super::stages::{Stage, StageSwitches};
use crate::sexp::flag;

// ── Config ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Samples kept per rolling window.
    pub window_size: usize,
    /// Samples required in each window before any decision.
    pub min_samples: usize,
    /// Mean CPU percentage above which the pipeline is overloaded.
    pub cpu_threshold: f32,
    /// Mean FPS below which the pipeline is overloaded (0 = unmeasured).
    pub fps_threshold: f32,
    /// Controller cadence.
    pub tick_interval: Duration,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            min_samples: 3,
            cpu_threshold: 80.0,
            fps_threshold: 15.0,
            tick_interval: Duration::from_secs(1),
        }
    }
}

// ── State ──────────────────────────────────────────────────

/// How far the controller has stepped down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DegradationState {
    pub active: bool,
    /// 0 when inactive; otherwise 1 + priority position of the deepest
    /// stage disabled.
    pub level: u8,
}

/// A decision taken on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityChange {
    Degraded { stage: Stage, level: u8 },
    Restored { stages: Vec<Stage> },
}

// ── Controller ─────────────────────────────────────────────

pub struct QualityController {
    pub config: QualityConfig,
    switches: Arc<StageSwitches>,
    cpu: VecDeque<f32>,
    fps: VecDeque<f32>,
    state: DegradationState,
    /// Stages this controller turned off, in the order it did so.
    disabled_by_us: Vec<Stage>,
    ticks: u64,
}

fn mean(window: &VecDeque<f32>) -> f32 {
    if window.is_empty() {
        0.0
    } else {
        window.iter().sum::<f32>() / window.len() as f32
    }
}

impl QualityController {
    pub fn new(config: QualityConfig, switches: Arc<StageSwitches>) -> Self {
        Self {
            cpu: VecDeque::with_capacity(config.window_size),
            fps: VecDeque::with_capacity(config.window_size),
            config,
            switches,
            state: DegradationState::default(),
            disabled_by_us: Vec::new(),
            ticks: 0,
        }
    }

    pub fn state(&self) -> DegradationState {
        self.state
    }

    pub fn sample_count(&self) -> usize {
        self.cpu.len().min(self.fps.len())
    }

    fn push(window: &mut VecDeque<f32>, value: f32, cap: usize) {
        window.push_back(value);
        while window.len() > cap {
            window.pop_front();
        }
    }

    fn clear_samples(&mut self) {
        self.cpu.clear();
        self.fps.clear();
    }

    /// Whether the current window means show overload.
    pub fn needs_degradation(&self) -> bool {
        let cpu = mean(&self.cpu);
        let fps = mean(&self.fps);
        cpu > self.config.cpu_threshold || (fps > 0.0 && fps < self.config.fps_threshold)
    }

    /// Record one sample and act on it.
    pub fn tick(&mut self, sample: PerformanceSample) -> Option<QualityChange> {
        self.ticks += 1;
        let cap = self.config.window_size.max(1);
        Self::push(&mut self.cpu, sample.cpu_percent, cap);
        Self::push(&mut self.fps, sample.frames_per_second, cap);

        if self.sample_count() < self.config.min_samples {
            debug!(samples = self.sample_count(), "Quality controller warming up");
            return None;
        }

        if self.needs_degradation() {
            self.degrade()
        } else if self.state.active {
            Some(self.restore())
        } else {
            None
        }
    }

    fn degrade(&mut self) -> Option<QualityChange> {
        let (position, stage) = Stage::PRIORITY
            .iter()
            .enumerate()
            .find(|(_, s)| self.switches.is_enabled(**s))
            .map(|(i, s)| (i, *s))?;

        self.switches.set(stage, false);
        self.disabled_by_us.push(stage);
        let level = (position + 1) as u8;
        self.state = DegradationState {
            active: true,
            level: self.state.level.max(level),
        };
        warn!(
            cpu = mean(&self.cpu),
            fps = mean(&self.fps),
            "Performance degraded: disabled {} (level {})",
            stage.as_str(),
            self.state.level,
        );
        self.clear_samples();
        Some(QualityChange::Degraded {
            stage,
            level: self.state.level,
        })
    }

    fn restore(&mut self) -> QualityChange {
        let mut restored = Vec::with_capacity(self.disabled_by_us.len());
        while let Some(stage) = self.disabled_by_us.pop() {
            self.switches.set(stage, true);
            restored.push(stage);
        }
        info!(
            "Performance recovered: re-enabled {} stage(s) from level {}",
            restored.len(),
            self.state.level,
        );
        self.state = DegradationState::default();
        self.clear_samples();
        QualityChange::Restored { stages: restored }
    }

    /// Generate s-expression for status logging.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:active {} :level {} :ticks {} :samples {} :cpu {:.1} :fps {:.1} :stages {})",
            flag(self.state.active),
            self.state.level,
            self.ticks,
            self.sample_count(),
            mean(&self.cpu),
            mean(&self.fps),
            self.switches.status_sexp(),
        )
    }

    /// Generate s-expression for the active configuration.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:window-size {} :min-samples {} :cpu-threshold {:.1} :fps-threshold {:.1} :tick-ms {})",
            self.config.window_size,
            self.config.min_samples,
            self.config.cpu_threshold,
            self.config.fps_threshold,
            self.config.tick_interval.as_millis(),
        )
    }
}

// ── Tests ──────────────────────────────────────────────────
