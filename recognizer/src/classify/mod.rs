//! Sign classification over a rolling window of hand poses.
//!
//! Two strategies share one contract: a nearest-centroid classifier
//! backed by a trained artifact, and a single-frame geometric heuristic
//! used when no artifact is available.  The choice is made once at
//! startup.

pub mod centroid;
pub mod features;
pub mod heuristic;
pub mod training;

use std::path::Path;

use tracing::{info, warn};

use crate::config::ClassifierSettings;

pub use centroid::{CentroidClassifier, ClassifierArtifact};
pub use features::{Pose, DEFAULT_SEQUENCE_LENGTH};
pub use heuristic::HeuristicClassifier;

/// A token proposed by a classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
    /// Produced by the geometric fallback rather than a trained model.
    pub heuristic: bool,
}

/// Classifier selected at startup.
pub enum Classifier {
    Heuristic(HeuristicClassifier),
    Centroid(CentroidClassifier),
}

impl Classifier {
    /// Load the artifact at `path`, falling back to the heuristic when the
    /// path is absent or the artifact cannot be used.  Configured overrides
    /// are applied on top of the artifact's own settings.
    pub fn load(path: Option<&Path>, settings: &ClassifierSettings) -> Self {
        let Some(path) = path else {
            warn!("No classifier artifact configured; using heuristic fallback (lower quality)");
            return Self::Heuristic(HeuristicClassifier::default());
        };
        let loaded = ClassifierArtifact::load(path).and_then(|mut artifact| {
            settings.apply(&mut artifact)?;
            artifact.validate()?;
            Ok(artifact)
        });
        match loaded {
            Ok(artifact) => {
                info!(
                    labels = artifact.labels.len(),
                    sequence_length = artifact.sequence_length,
                    "Classifier artifact loaded from {}",
                    path.display(),
                );
                Self::Centroid(CentroidClassifier::new(artifact))
            }
            Err(e) => {
                warn!(
                    "Classifier artifact {} unusable ({}); using heuristic fallback (lower quality)",
                    path.display(),
                    e,
                );
                Self::Heuristic(HeuristicClassifier::default())
            }
        }
    }

    /// Classify the most recent window of poses (oldest first).
    pub fn classify(&self, window: &[Pose]) -> Option<Classification> {
        match self {
            Self::Heuristic(h) => h.classify(window),
            Self::Centroid(c) => c.classify(window),
        }
    }

    /// Number of poses the classifier needs before it can answer.
    pub fn window_len(&self) -> usize {
        match self {
            Self::Heuristic(_) => 1,
            Self::Centroid(c) => c.artifact().sequence_length,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heuristic(_) => "heuristic",
            Self::Centroid(_) => "centroid",
        }
    }

    /// Generate s-expression describing the active classifier.
    pub fn status_sexp(&self) -> String {
        match self {
            Self::Heuristic(h) => format!(
                "(:kind :{} :window 1 :min-confidence {:.2})",
                self.as_str(),
                h.min_confidence,
            ),
            Self::Centroid(c) => {
                let a = c.artifact();
                format!(
                    "(:kind :{} :window {} :labels {} :confidence-scale {:.2} :min-confidence {:.2})",
                    self.as_str(),
                    a.sequence_length,
                    a.labels.len(),
                    a.confidence_scale,
                    a.min_confidence,
                )
            }
        }
    }
}
