//! Nearest-centroid cosine classifier and its persisted artifact.
//!
//! The artifact is a single s-expression plist:
//!
//! ```text
//! (:version "1.0.0" :sequence-length 24 :confidence-scale 6.0
//!  :min-confidence 0.58 :labels ("A" "B") :centroids ((...) (...)))
//! ```

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{anyhow, bail};
use lexpr::Value;
use tracing::debug;

use super::features::{cosine_similarity, feature_dim, sequence_features, Pose};
use super::Classification;
use crate::sexp;

pub const ARTIFACT_VERSION: &str = "1.0.0";
pub const DEFAULT_CONFIDENCE_SCALE: f32 = 6.0;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.58;

// ── Artifact ───────────────────────────────────────────────

/// Trained classifier parameters.  Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierArtifact {
    pub labels: Vec<String>,
    /// One row per label, each `feature_dim(sequence_length)` long.
    pub centroids: Vec<Vec<f32>>,
    pub confidence_scale: f32,
    pub min_confidence: f32,
    pub sequence_length: usize,
}

impl ClassifierArtifact {
    /// Check the shape and value invariants.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sequence_length <= 1 {
            bail!("sequence length must be greater than 1, got {}", self.sequence_length);
        }
        if self.labels.is_empty() {
            bail!("artifact has no labels");
        }
        if self.centroids.len() != self.labels.len() {
            bail!(
                "{} centroid rows for {} labels",
                self.centroids.len(),
                self.labels.len()
            );
        }
        let dim = feature_dim(self.sequence_length);
        for (label, row) in self.labels.iter().zip(&self.centroids) {
            if row.len() != dim {
                bail!(
                    "centroid for {:?} has {} values, expected {}",
                    label,
                    row.len(),
                    dim
                );
            }
            if row.iter().any(|v| !v.is_finite()) {
                bail!("centroid for {:?} contains non-finite values", label);
            }
        }
        if !self.confidence_scale.is_finite() || self.confidence_scale <= 0.0 {
            bail!("invalid confidence scale {}", self.confidence_scale);
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            bail!("min confidence {} outside [0, 1]", self.min_confidence);
        }
        Ok(())
    }

    /// Parse and validate an artifact plist.
    pub fn from_sexp(value: &Value) -> anyhow::Result<Self> {
        let labels_value =
            sexp::plist_get(value, "labels").ok_or_else(|| anyhow!("artifact without :labels"))?;
        let labels = sexp::list_items(labels_value)
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.to_string()),
                Value::Symbol(s) => Ok(s.to_string()),
                other => Err(anyhow!("label {} is not a string", other)),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let centroids_value = sexp::plist_get(value, "centroids")
            .ok_or_else(|| anyhow!("artifact without :centroids"))?;
        let centroids = sexp::list_items(centroids_value)
            .into_iter()
            .map(|row| {
                sexp::number_list(row)
                    .map(|vals| vals.into_iter().map(|v| v as f32).collect::<Vec<f32>>())
                    .ok_or_else(|| anyhow!("non-numeric centroid row"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let sequence_length = sexp::get_int(value, "sequence-length")
            .ok_or_else(|| anyhow!("artifact without :sequence-length"))?;
        let sequence_length = usize::try_from(sequence_length)
            .map_err(|_| anyhow!("negative sequence length {}", sequence_length))?;

        let artifact = Self {
            labels,
            centroids,
            confidence_scale: sexp::get_float(value, "confidence-scale")
                .map(|v| v as f32)
                .unwrap_or(DEFAULT_CONFIDENCE_SCALE),
            min_confidence: sexp::get_float(value, "min-confidence")
                .map(|v| v as f32)
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            sequence_length,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Render as a plist.
    pub fn to_sexp(&self) -> String {
        let mut s = String::new();
        let _ = write!(
            s,
            "(:version \"{}\" :sequence-length {} :feature-dim {} :confidence-scale {} :min-confidence {}",
            ARTIFACT_VERSION,
            self.sequence_length,
            feature_dim(self.sequence_length),
            self.confidence_scale,
            self.min_confidence,
        );
        s.push_str("\n :labels (");
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                s.push(' ');
            }
            let _ = write!(s, "\"{}\"", sexp::escape_string(label));
        }
        s.push_str(")\n :centroids (");
        for row in &self.centroids {
            s.push_str("\n  (");
            for (i, v) in row.iter().enumerate() {
                if i > 0 {
                    s.push(' ');
                }
                let _ = write!(s, "{}", v);
            }
            s.push(')');
        }
        s.push_str("))\n");
        s
    }

    /// Read and validate an artifact file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
        let value = lexpr::from_str(&text)
            .map_err(|e| anyhow!("failed to parse {}: {}", path.display(), e))?;
        Self::from_sexp(&value)
    }

    /// Write the artifact file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("failed to create {}: {}", parent.display(), e))?;
            }
        }
        std::fs::write(path, self.to_sexp())
            .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))
    }
}

// ── Prediction ─────────────────────────────────────────────

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Index and probability of the best centroid for a feature vector.
/// The first index wins ties.
pub fn predict(features: &[f32], centroids: &[Vec<f32>], confidence_scale: f32) -> Option<(usize, f32)> {
    if centroids.is_empty() {
        return None;
    }
    let logits: Vec<f32> = centroids
        .iter()
        .map(|c| cosine_similarity(features, c) * confidence_scale)
        .collect();
    let probs = softmax(&logits);
    let mut best = 0;
    for (i, p) in probs.iter().enumerate().skip(1) {
        if *p > probs[best] {
            best = i;
        }
    }
    Some((best, probs[best]))
}

/// Classifier backed by a loaded artifact.
pub struct CentroidClassifier {
    artifact: ClassifierArtifact,
}

impl CentroidClassifier {
    pub fn new(artifact: ClassifierArtifact) -> Self {
        Self { artifact }
    }

    pub fn artifact(&self) -> &ClassifierArtifact {
        &self.artifact
    }

    /// Classify the trailing `sequence_length` poses of the window.
    /// Shorter windows and below-floor results yield no token.
    pub fn classify(&self, window: &[Pose]) -> Option<Classification> {
        let len = self.artifact.sequence_length;
        if window.len() < len {
            return None;
        }
        let recent = &window[window.len() - len..];
        let features = match sequence_features(recent, len) {
            Ok(f) => f,
            Err(e) => {
                debug!("Feature extraction failed: {}", e);
                return None;
            }
        };
        let (idx, confidence) = predict(
            &features,
            &self.artifact.centroids,
            self.artifact.confidence_scale,
        )?;
        if confidence < self.artifact.min_confidence {
            debug!(
                "Best label {} below floor ({:.3} < {:.2})",
                self.artifact.labels[idx], confidence, self.artifact.min_confidence,
            );
            return None;
        }
        Some(Classification {
            label: self.artifact.labels[idx].clone(),
            confidence,
            heuristic: false,
        })
    }
}

// ── Test helpers ───────────────────────────────────────────

/// Static window of one fixture pose per label slot (open hand, fist, two fingers).
#[cfg(test)]
pub fn make_pose_window(slot: usize, len: usize) -> Vec<Pose> {
    use super::features::pose_from_frame;
    use crate::landmarks::{make_fist, make_open_hand, make_two_fingers, Handedness};
    let hand = Some(Handedness::Right);
    let frame = match slot {
        0 => make_open_hand(hand),
        1 => make_fist(hand),
        _ => make_two_fingers(hand),
    };
    let pose = pose_from_frame(&frame).unwrap();
    vec![pose; len]
}

/// Artifact whose centroids are the exact features of the fixture windows.
/// The fixture poses differ only at the fingertips, so the scale is large
/// enough to separate them.
#[cfg(test)]
pub fn make_artifact(labels: &[&str], sequence_length: usize) -> ClassifierArtifact {
    let centroids = (0..labels.len())
        .map(|slot| {
            sequence_features(&make_pose_window(slot, sequence_length), sequence_length).unwrap()
        })
        .collect();
    ClassifierArtifact {
        labels: labels.iter().map(|l| l.to_string()).collect(),
        centroids,
        confidence_scale: 200.0,
        min_confidence: DEFAULT_MIN_CONFIDENCE,
        sequence_length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn test_predict_first_index_wins_ties() {
        let centroids = vec![vec![1.0, 0.0], vec![1.0, 0.0]];
        let (idx, conf) = predict(&[1.0, 0.0], &centroids, 6.0).unwrap();
        assert_eq!(idx, 0);
        assert!((conf - 0.5).abs() < 1e-6);
        assert!(predict(&[1.0], &[], 6.0).is_none());
    }

    #[test]
    fn test_classify_matches_centroid() {
        let classifier = CentroidClassifier::new(make_artifact(&["OPEN", "FIST", "TWO"], 4));
        for (slot, label) in ["OPEN", "FIST", "TWO"].iter().enumerate() {
            let result = classifier.classify(&make_pose_window(slot, 6)).expect("token");
            assert_eq!(result.label, *label);
            assert!(result.confidence > 0.58, "confidence {}", result.confidence);
            assert!(!result.heuristic);
        }
    }

    #[test]
    fn test_short_window_yields_nothing() {
        let classifier = CentroidClassifier::new(make_artifact(&["OPEN", "FIST"], 4));
        assert!(classifier.classify(&make_pose_window(0, 3)).is_none());
    }

    #[test]
    fn test_below_floor_yields_nothing() {
        let mut artifact = make_artifact(&["OPEN", "FIST"], 4);
        artifact.confidence_scale = 0.01;
        let classifier = CentroidClassifier::new(artifact);
        assert!(classifier.classify(&make_pose_window(0, 4)).is_none());
    }

    #[test]
    fn test_sexp_round_trip() {
        let artifact = make_artifact(&["A", "B"], 3);
        let parsed = ClassifierArtifact::from_sexp(&lexpr::from_str(&artifact.to_sexp()).unwrap())
            .unwrap();
        assert_eq!(parsed.labels, artifact.labels);
        assert_eq!(parsed.sequence_length, 3);
        assert_eq!(parsed.centroids.len(), 2);
        for (a, b) in parsed.centroids.iter().flatten().zip(artifact.centroids.iter().flatten()) {
            assert!((a - b).abs() < 1e-5);
        }
        assert_eq!(parsed.confidence_scale, artifact.confidence_scale);
    }

    #[test]
    fn test_validate_rejects_inconsistent() {
        let mut artifact = make_artifact(&["A", "B"], 3);
        artifact.centroids.pop();
        assert!(artifact.validate().is_err());

        let mut artifact = make_artifact(&["A", "B"], 3);
        artifact.centroids[1].truncate(10);
        assert!(artifact.validate().is_err());

        let mut artifact = make_artifact(&["A", "B"], 3);
        artifact.centroids[0][0] = f32::NAN;
        assert!(artifact.validate().is_err());

        let mut artifact = make_artifact(&["A", "B"], 3);
        artifact.sequence_length = 1;
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn test_from_sexp_defaults_scale_and_floor() {
        let row: Vec<String> = (0..feature_dim(2)).map(|i| format!("{}", i % 3)).collect();
        let text = format!(
            "(:labels (\"A\") :sequence-length 2 :centroids (({})))",
            row.join(" ")
        );
        let artifact = ClassifierArtifact::from_sexp(&lexpr::from_str(&text).unwrap()).unwrap();
        assert_eq!(artifact.confidence_scale, DEFAULT_CONFIDENCE_SCALE);
        assert_eq!(artifact.min_confidence, DEFAULT_MIN_CONFIDENCE);
    }
}
