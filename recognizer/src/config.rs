//! Recognizer configuration.
//!
//! Every component carries its own `*Config` with defaults; this module
//! gathers them and applies overrides from an optional s-expression file:
//!
//! ```text
//! (:motion (:idle-threshold 0.004 :stable-required-frames 7)
//!  :gesture (:hold-frames 6 :cooldown-frames 20)
//!  :tokens (:hold-frames 8 :cooldown-frames 18)
//!  :classifier (:min-confidence 0.6 :confidence-scale 6.0 :sequence-length 24)
//!  :text (:idle-timeout-ms 1500)
//!  :quality (:cpu-threshold 80 :fps-threshold 15 :tick-ms 1000)
//!  :stages (:background-blur t :face-focus t :lighting t)
//!  :queue-capacity 8 :status-interval-ms 5000)
//! ```
//!
//! Unknown keys are ignored; missing keys keep their defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail};
use lexpr::Value;
use tracing::info;

use crate::classify::centroid::ClassifierArtifact;
use crate::classify::DEFAULT_SEQUENCE_LENGTH;
use crate::pipeline::stabilizer::StabilizerConfig;
use crate::quality::{QualityConfig, Stage, STAGE_COUNT};
use crate::sexp::{get_bool, get_float, get_int, plist_get};
use crate::text::DEFAULT_IDLE_TIMEOUT;
use crate::tracking::{GestureConfig, MotionConfig};

/// Classifier settings that override what the artifact carries.
#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub min_confidence: Option<f32>,
    pub confidence_scale: Option<f32>,
    /// Window length the artifact must have been trained with; also the
    /// default for `train`.
    pub sequence_length: Option<usize>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            min_confidence: None,
            confidence_scale: None,
            sequence_length: None,
        }
    }
}

impl ClassifierSettings {
    /// Check a loaded artifact against the configured window and apply
    /// the overrides.
    pub fn apply(&self, artifact: &mut ClassifierArtifact) -> anyhow::Result<()> {
        if let Some(len) = self.sequence_length {
            if artifact.sequence_length != len {
                bail!(
                    "artifact sequence length {} does not match configured {}",
                    artifact.sequence_length,
                    len
                );
            }
        }
        if let Some(v) = self.min_confidence {
            artifact.min_confidence = v;
        }
        if let Some(v) = self.confidence_scale {
            artifact.confidence_scale = v;
        }
        Ok(())
    }

    /// Sequence length for training when none is given explicitly.
    pub fn training_sequence_length(&self) -> usize {
        self.sequence_length.unwrap_or(DEFAULT_SEQUENCE_LENGTH)
    }
}

#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub motion: MotionConfig,
    pub gesture: GestureConfig,
    pub stabilizer: StabilizerConfig,
    pub classifier: ClassifierSettings,
    pub idle_timeout: Duration,
    pub quality: QualityConfig,
    /// Initial optional-stage flags, indexed by `Stage::index()`.
    pub stages: [bool; STAGE_COUNT],
    /// Frames buffered between the source and the worker.
    pub queue_capacity: usize,
    /// How often the run loop logs component status.
    pub status_interval: Duration,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            gesture: GestureConfig::default(),
            stabilizer: StabilizerConfig::default(),
            classifier: ClassifierSettings::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            quality: QualityConfig::default(),
            stages: [true; STAGE_COUNT],
            queue_capacity: 8,
            status_interval: Duration::from_secs(5),
        }
    }
}

fn positive_int(value: &Value, key: &str) -> anyhow::Result<Option<u64>> {
    match get_int(value, key) {
        None => Ok(None),
        Some(v) if v > 0 => Ok(Some(v as u64)),
        Some(v) => bail!(":{} must be positive, got {}", key, v),
    }
}

fn float(value: &Value, key: &str) -> Option<f32> {
    get_float(value, key).map(|v| v as f32)
}

impl RecognizerConfig {
    /// Read overrides from a file on top of the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
        let value = lexpr::from_str(&text)
            .map_err(|e| anyhow!("failed to parse config {}: {}", path.display(), e))?;
        let mut config = Self::default();
        config.apply_sexp(&value)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Apply a plist of overrides, then validate.
    pub fn apply_sexp(&mut self, value: &Value) -> anyhow::Result<()> {
        if let Some(m) = plist_get(value, "motion") {
            let c = &mut self.motion;
            if let Some(v) = float(m, "idle-threshold") {
                c.idle_threshold = v;
            }
            if let Some(v) = float(m, "stable-threshold") {
                c.stable_threshold = v;
            }
            if let Some(v) = float(m, "fast-threshold") {
                c.fast_threshold = v;
            }
            if let Some(v) = positive_int(m, "stable-required-frames")? {
                c.stable_required_frames = v as u32;
            }
            if let Some(v) = positive_int(m, "idle-required-frames")? {
                c.idle_required_frames = v as u32;
            }
            if let Some(v) = float(m, "smoothing-alpha") {
                c.smoothing_alpha = v;
            }
            if let Some(v) = positive_int(m, "history-size")? {
                c.history_size = v as usize;
            }
        }

        if let Some(g) = plist_get(value, "gesture") {
            let c = &mut self.gesture;
            if let Some(v) = positive_int(g, "hold-frames")? {
                c.hold_frames = v as u32;
            }
            if let Some(v) = get_int(g, "cooldown-frames") {
                c.cooldown_frames = v.max(0) as u32;
            }
            if let Some(v) = float(g, "min-confidence") {
                c.min_confidence = v;
            }
            if let Some(v) = float(g, "finger-margin") {
                c.finger_margin = v;
            }
            if let Some(v) = float(g, "thumb-margin") {
                c.thumb_margin = v;
            }
        }

        if let Some(t) = plist_get(value, "tokens") {
            let c = &mut self.stabilizer;
            if let Some(v) = positive_int(t, "hold-frames")? {
                c.hold_frames = v as u32;
            }
            if let Some(v) = get_int(t, "cooldown-frames") {
                c.cooldown_frames = v.max(0) as u32;
            }
        }

        if let Some(k) = plist_get(value, "classifier") {
            let c = &mut self.classifier;
            if let Some(v) = float(k, "min-confidence") {
                c.min_confidence = Some(v);
            }
            if let Some(v) = float(k, "confidence-scale") {
                c.confidence_scale = Some(v);
            }
            if let Some(v) = positive_int(k, "sequence-length")? {
                c.sequence_length = Some(v as usize);
            }
        }

        if let Some(t) = plist_get(value, "text") {
            if let Some(ms) = positive_int(t, "idle-timeout-ms")? {
                self.idle_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(q) = plist_get(value, "quality") {
            let c = &mut self.quality;
            if let Some(v) = positive_int(q, "window-size")? {
                c.window_size = v as usize;
            }
            if let Some(v) = positive_int(q, "min-samples")? {
                c.min_samples = v as usize;
            }
            if let Some(v) = float(q, "cpu-threshold") {
                c.cpu_threshold = v;
            }
            if let Some(v) = float(q, "fps-threshold") {
                c.fps_threshold = v;
            }
            if let Some(ms) = positive_int(q, "tick-ms")? {
                c.tick_interval = Duration::from_millis(ms);
            }
        }

        if let Some(s) = plist_get(value, "stages") {
            for stage in Stage::PRIORITY {
                if let Some(enabled) = get_bool(s, stage.as_str()) {
                    self.stages[stage.index()] = enabled;
                }
            }
        }

        if let Some(v) = positive_int(value, "queue-capacity")? {
            self.queue_capacity = v as usize;
        }
        if let Some(ms) = positive_int(value, "status-interval-ms")? {
            self.status_interval = Duration::from_millis(ms);
        }

        self.validate()
    }

    /// Reject settings the components cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let m = &self.motion;
        if !(m.idle_threshold <= m.stable_threshold && m.stable_threshold < m.fast_threshold) {
            bail!(
                "motion thresholds must satisfy idle <= stable < fast ({} / {} / {})",
                m.idle_threshold,
                m.stable_threshold,
                m.fast_threshold
            );
        }
        if !(m.smoothing_alpha > 0.0 && m.smoothing_alpha <= 1.0) {
            bail!("smoothing alpha must be in (0, 1], got {}", m.smoothing_alpha);
        }
        if !(0.0..=1.0).contains(&self.gesture.min_confidence) {
            bail!("gesture min confidence must be in [0, 1]");
        }
        if let Some(v) = self.classifier.min_confidence {
            if !(0.0..=1.0).contains(&v) {
                bail!("classifier min confidence must be in [0, 1], got {}", v);
            }
        }
        if let Some(v) = self.classifier.confidence_scale {
            if !(v.is_finite() && v > 0.0) {
                bail!("classifier confidence scale must be positive, got {}", v);
            }
        }
        if matches!(self.classifier.sequence_length, Some(len) if len <= 1) {
            bail!("sequence length must be greater than 1");
        }
        if self.quality.min_samples > self.quality.window_size {
            bail!(
                "quality min-samples {} exceeds window size {}",
                self.quality.min_samples,
                self.quality.window_size
            );
        }
        Ok(())
    }

    /// Generate s-expression for the top-level settings.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:idle-timeout-ms {} :queue-capacity {} :status-interval-ms {} :token-hold {} :token-cooldown {} :sequence-length {})",
            self.idle_timeout.as_millis(),
            self.queue_capacity,
            self.status_interval.as_millis(),
            self.stabilizer.hold_frames,
            self.stabilizer.cooldown_frames,
            self.classifier.training_sequence_length(),
        )
    }
}
