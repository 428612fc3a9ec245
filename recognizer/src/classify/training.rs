//! Offline centroid training from labeled landmark sequences.
//!
//! Dataset files hold one sample per line:
//!
//! ```text
//! (:label "A" :frames (((x y z) ...21 points) ...))
//! ```
//!
//! Blank lines and lines starting with `;` are ignored.  A directory is
//! read file by file (`*.sexp`, sorted by name).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};
use lexpr::Value;
use tracing::{debug, info, warn};

use super::centroid::{predict, ClassifierArtifact, DEFAULT_CONFIDENCE_SCALE, DEFAULT_MIN_CONFIDENCE};
use super::features::{mirror, sequence_features, Pose, DEFAULT_SEQUENCE_LENGTH};
use crate::landmarks::{COORDS, POINT_COUNT};
use crate::sexp;

// ── Dataset ────────────────────────────────────────────────

/// One recorded sign.
#[derive(Debug, Clone)]
pub struct LabeledSequence {
    pub label: String,
    pub poses: Vec<Pose>,
}

/// Samples read from disk plus how many lines were unusable.
#[derive(Debug, Default)]
pub struct Dataset {
    pub samples: Vec<LabeledSequence>,
    pub skipped: usize,
}

/// Parse one sample plist.
pub fn parse_sample(value: &Value) -> anyhow::Result<LabeledSequence> {
    let label = sexp::get_keyword(value, "label")
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && l != "nil")
        .ok_or_else(|| anyhow!("sample without :label"))?;
    let frames =
        sexp::plist_get(value, "frames").ok_or_else(|| anyhow!("sample without :frames"))?;

    let mut poses = Vec::new();
    for frame in sexp::list_items(frames) {
        let points = sexp::list_items(frame);
        if points.len() != POINT_COUNT {
            bail!("frame has {} points, expected {}", points.len(), POINT_COUNT);
        }
        let mut pose = [[0.0f32; COORDS]; POINT_COUNT];
        for (slot, point) in pose.iter_mut().zip(points) {
            let coords =
                sexp::number_list(point).ok_or_else(|| anyhow!("non-numeric coordinate"))?;
            if coords.len() != COORDS {
                bail!("point has {} coordinates, expected {}", coords.len(), COORDS);
            }
            for (dst, src) in slot.iter_mut().zip(coords) {
                *dst = src as f32;
            }
        }
        poses.push(pose);
    }
    if poses.is_empty() {
        bail!("sample {:?} has no frames", label);
    }
    Ok(LabeledSequence { label, poses })
}

/// Parse dataset text.  Bad lines are counted, not fatal.
pub fn parse_dataset(text: &str, dataset: &mut Dataset) {
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let parsed = lexpr::from_str(line)
            .map_err(|e| anyhow!("{}", e))
            .and_then(|v| parse_sample(&v));
        match parsed {
            Ok(sample) => dataset.samples.push(sample),
            Err(e) => {
                debug!("Skipping dataset line {}: {}", lineno + 1, e);
                dataset.skipped += 1;
            }
        }
    }
}

/// Load a dataset file or a directory of `*.sexp` files.
pub fn load_dataset(path: &Path) -> anyhow::Result<Dataset> {
    let files: Vec<PathBuf> = if path.is_dir() {
        let entries = std::fs::read_dir(path)
            .map_err(|e| anyhow!("failed to list {}: {}", path.display(), e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "sexp").unwrap_or(false))
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut dataset = Dataset::default();
    for file in &files {
        let text = std::fs::read_to_string(file)
            .map_err(|e| anyhow!("failed to read {}: {}", file.display(), e))?;
        parse_dataset(&text, &mut dataset);
    }
    info!(
        files = files.len(),
        samples = dataset.samples.len(),
        skipped = dataset.skipped,
        "Dataset loaded from {}",
        path.display(),
    );
    Ok(dataset)
}

// ── Options ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub sequence_length: usize,
    pub confidence_scale: f32,
    pub min_confidence: f32,
    /// Classes with fewer feature rows (after augmentation) are dropped.
    pub min_samples_per_class: usize,
    /// Share of each class held out for validation.
    pub validation_split: f32,
    /// Add an x-mirrored copy of every sample.
    pub augment: bool,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            confidence_scale: DEFAULT_CONFIDENCE_SCALE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_samples_per_class: 8,
            validation_split: 0.2,
            augment: true,
        }
    }
}

// ── Metrics ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClassMetrics {
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub support: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SplitMetrics {
    pub samples: usize,
    pub accuracy: f32,
    pub macro_f1: f32,
    pub per_class: Vec<(String, ClassMetrics)>,
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

/// Accuracy, macro F1 and per-class scores over label indices.
pub fn compute_metrics(truth: &[usize], predicted: &[usize], labels: &[String]) -> SplitMetrics {
    let correct = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    let mut per_class = Vec::with_capacity(labels.len());
    for (class, name) in labels.iter().enumerate() {
        let pairs = || truth.iter().zip(predicted);
        let tp = pairs().filter(|(t, p)| **t == class && **p == class).count();
        let fp = pairs().filter(|(t, p)| **t != class && **p == class).count();
        let fn_ = pairs().filter(|(t, p)| **t == class && **p != class).count();
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        per_class.push((
            name.clone(),
            ClassMetrics {
                precision,
                recall,
                f1,
                support: truth.iter().filter(|t| **t == class).count(),
            },
        ));
    }
    let macro_f1 = if per_class.is_empty() {
        0.0
    } else {
        per_class.iter().map(|(_, m)| m.f1).sum::<f32>() / per_class.len() as f32
    };
    SplitMetrics {
        samples: truth.len(),
        accuracy: ratio(correct, truth.len()),
        macro_f1,
        per_class,
    }
}

// ── Report ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub sequence_length: usize,
    pub augment: bool,
    pub raw_samples: usize,
    pub skipped_samples: usize,
    pub filtered_rows: usize,
    pub class_counts: BTreeMap<String, usize>,
    pub train: SplitMetrics,
    pub validation: SplitMetrics,
}

impl TrainingReport {
    /// Human-readable report text.
    pub fn render(&self) -> String {
        let rule = "-".repeat(40);
        let mut s = String::new();
        let _ = writeln!(s, "Landmark Classifier Training Report");
        let _ = writeln!(s, "{}", "=".repeat(40));
        let _ = writeln!(s, "Sequence length: {}", self.sequence_length);
        let _ = writeln!(s, "Augmentation: {}", self.augment);
        let _ = writeln!(s);
        let _ = writeln!(s, "Dataset\n{}", rule);
        let _ = writeln!(s, "Raw samples loaded: {}", self.raw_samples);
        let _ = writeln!(s, "Invalid/skipped samples: {}", self.skipped_samples);
        let _ = writeln!(s, "Rows after filtering: {}", self.filtered_rows);
        let _ = writeln!(s, "Class counts:");
        for (label, count) in &self.class_counts {
            let _ = writeln!(s, "  - {}: {}", label, count);
        }
        for (title, m) in [("Train", &self.train), ("Validation", &self.validation)] {
            let _ = writeln!(s);
            let _ = writeln!(s, "{} Metrics\n{}", title, rule);
            let _ = writeln!(s, "Samples: {}", m.samples);
            let _ = writeln!(s, "Accuracy: {:.4}", m.accuracy);
            let _ = writeln!(s, "Macro F1: {:.4}", m.macro_f1);
        }
        let _ = writeln!(s);
        let _ = writeln!(s, "Per-Class Validation Metrics\n{}", rule);
        for (label, m) in &self.validation.per_class {
            let _ = writeln!(
                s,
                "{}: precision={:.3}, recall={:.3}, f1={:.3}, support={}",
                label, m.precision, m.recall, m.f1, m.support,
            );
        }
        s
    }
}

// ── Training ───────────────────────────────────────────────

/// Deterministic stratified split: the last `round(n * split)` rows of
/// each class (at least one, never all) go to validation.
pub fn stratified_split(labels: &[usize], class_count: usize, split: f32) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut validation = Vec::new();
    for class in 0..class_count {
        let rows: Vec<usize> = (0..labels.len()).filter(|i| labels[*i] == class).collect();
        if rows.len() <= 1 {
            train.extend(rows);
            continue;
        }
        let val_count = ((rows.len() as f32 * split).round() as usize)
            .max(1)
            .min(rows.len() - 1);
        let cut = rows.len() - val_count;
        train.extend_from_slice(&rows[..cut]);
        validation.extend_from_slice(&rows[cut..]);
    }
    (train, validation)
}

/// Train centroids and score them on both splits.
pub fn train(
    dataset: &Dataset,
    options: &TrainingOptions,
) -> anyhow::Result<(ClassifierArtifact, TrainingReport)> {
    if dataset.samples.is_empty() {
        bail!("no samples to train on");
    }

    let mut skipped = dataset.skipped;
    let mut rows: Vec<(String, Vec<f32>)> = Vec::new();
    for sample in &dataset.samples {
        match sequence_features(&sample.poses, options.sequence_length) {
            Ok(f) => rows.push((sample.label.clone(), f)),
            Err(e) => {
                warn!("Skipping sample {:?}: {}", sample.label, e);
                skipped += 1;
                continue;
            }
        }
        if options.augment {
            if let Ok(f) = sequence_features(&mirror(&sample.poses), options.sequence_length) {
                rows.push((sample.label.clone(), f));
            }
        }
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for (label, _) in &rows {
        *counts.entry(label.clone()).or_default() += 1;
    }
    counts.retain(|label, count| {
        let keep = *count >= options.min_samples_per_class;
        if !keep {
            warn!(
                "Dropping class {:?}: {} rows < {}",
                label, count, options.min_samples_per_class
            );
        }
        keep
    });
    if counts.len() < 2 {
        bail!(
            "need at least two classes with {} or more rows, found {}",
            options.min_samples_per_class,
            counts.len()
        );
    }

    // BTreeMap keys are already sorted.
    let labels: Vec<String> = counts.keys().cloned().collect();
    let (features, targets): (Vec<Vec<f32>>, Vec<usize>) = rows
        .into_iter()
        .filter_map(|(label, f)| labels.iter().position(|l| *l == label).map(|i| (f, i)))
        .unzip();

    let (train_idx, val_idx) = stratified_split(&targets, labels.len(), options.validation_split);

    let dim = features[0].len();
    let mut centroids = vec![vec![0.0f32; dim]; labels.len()];
    let mut per_class = vec![0usize; labels.len()];
    for &i in &train_idx {
        per_class[targets[i]] += 1;
        for (acc, v) in centroids[targets[i]].iter_mut().zip(&features[i]) {
            *acc += v;
        }
    }
    for (row, n) in centroids.iter_mut().zip(&per_class) {
        let n = (*n).max(1) as f32;
        row.iter_mut().for_each(|v| *v /= n);
    }

    let score = |idx: &[usize]| -> SplitMetrics {
        let truth: Vec<usize> = idx.iter().map(|i| targets[*i]).collect();
        let predicted: Vec<usize> = idx
            .iter()
            .map(|i| {
                predict(&features[*i], &centroids, options.confidence_scale)
                    .map(|(p, _)| p)
                    .unwrap_or(0)
            })
            .collect();
        compute_metrics(&truth, &predicted, &labels)
    };
    let train_metrics = score(&train_idx);
    let val_metrics = score(&val_idx);

    info!(
        classes = labels.len(),
        train_rows = train_idx.len(),
        validation_rows = val_idx.len(),
        "Trained centroids: train accuracy {:.4}, validation accuracy {:.4}",
        train_metrics.accuracy,
        val_metrics.accuracy,
    );

    let artifact = ClassifierArtifact {
        labels: labels.clone(),
        centroids,
        confidence_scale: options.confidence_scale,
        min_confidence: options.min_confidence,
        sequence_length: options.sequence_length,
    };
    artifact.validate()?;

    let report = TrainingReport {
        sequence_length: options.sequence_length,
        augment: options.augment,
        raw_samples: dataset.samples.len() + dataset.skipped,
        skipped_samples: skipped,
        filtered_rows: targets.len(),
        class_counts: counts,
        train: train_metrics,
        validation: val_metrics,
    };
    Ok((artifact, report))
}
