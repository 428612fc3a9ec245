//! Single-frame geometric fallback used when no trained artifact exists.
//!
//! Looks only at the newest pose: how far the fingertips sit above the
//! wrist (openness), the thumb-to-index gap (pinch), and the index-to-pinky
//! gap (spread).  Every result is flagged as heuristic.

use super::features::Pose;
use super::Classification;
use crate::landmarks::{planar_distance, HandPoint};

/// Minimum confidence for a heuristic token.
pub const HEURISTIC_MIN_CONFIDENCE: f32 = 0.45;

#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    pub min_confidence: f32,
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self {
            min_confidence: HEURISTIC_MIN_CONFIDENCE,
        }
    }
}

/// Hand shape measurements the rules read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeMetrics {
    pub openness: f32,
    pub pinch: f32,
    pub spread: f32,
}

impl ShapeMetrics {
    pub fn from_pose(pose: &Pose) -> Self {
        let wrist_y = pose[HandPoint::Wrist.index()][1];
        let tips = [
            HandPoint::IndexTip,
            HandPoint::MiddleTip,
            HandPoint::RingTip,
            HandPoint::PinkyTip,
        ];
        let openness = tips
            .iter()
            .map(|t| wrist_y - pose[t.index()][1])
            .sum::<f32>()
            / tips.len() as f32;
        let index_tip = pose[HandPoint::IndexTip.index()];
        Self {
            openness,
            pinch: planar_distance(&pose[HandPoint::ThumbTip.index()], &index_tip),
            spread: planar_distance(&index_tip, &pose[HandPoint::PinkyTip.index()]),
        }
    }

    /// Rules in priority order.
    pub fn label(&self) -> (&'static str, f32) {
        if self.pinch < 0.06 && self.openness > 0.14 {
            ("OK", 0.55)
        } else if self.openness > 0.22 {
            ("HELLO", 0.58)
        } else if self.openness < 0.10 {
            ("YES", 0.54)
        } else if self.spread > 0.40 {
            ("WIDE", 0.52)
        } else {
            ("SIGN", 0.5)
        }
    }
}

impl HeuristicClassifier {
    pub fn classify(&self, window: &[Pose]) -> Option<Classification> {
        let pose = window.last()?;
        let (label, confidence) = ShapeMetrics::from_pose(pose).label();
        if confidence < self.min_confidence {
            return None;
        }
        Some(Classification {
            label: label.to_string(),
            confidence,
            heuristic: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::features::pose_from_frame;
    use crate::landmarks::{make_fist, make_open_hand, HandPoint};

    #[test]
    fn test_open_hand_is_hello() {
        let pose = pose_from_frame(&make_open_hand(None)).unwrap();
        let result = HeuristicClassifier::default().classify(&[pose]).unwrap();
        assert_eq!(result.label, "HELLO");
        assert_eq!(result.confidence, 0.58);
        assert!(result.heuristic);
    }

    #[test]
    fn test_fist_fixture_still_reads_open() {
        // Tips folded just below the joints remain well above the wrist.
        let pose = pose_from_frame(&make_fist(None)).unwrap();
        let metrics = ShapeMetrics::from_pose(&pose);
        assert!(metrics.openness > 0.22, "openness {}", metrics.openness);
    }

    #[test]
    fn test_tips_at_wrist_height_is_yes() {
        let mut pose = pose_from_frame(&make_open_hand(None)).unwrap();
        for tip in [
            HandPoint::IndexTip,
            HandPoint::MiddleTip,
            HandPoint::RingTip,
            HandPoint::PinkyTip,
        ] {
            pose[tip.index()][1] = 0.74;
        }
        let metrics = ShapeMetrics::from_pose(&pose);
        assert!(metrics.openness < 0.10, "openness {}", metrics.openness);
        assert_eq!(metrics.label().0, "YES");
    }

    #[test]
    fn test_pinch_is_ok() {
        let mut pose = pose_from_frame(&make_open_hand(None)).unwrap();
        let index_tip = pose[HandPoint::IndexTip.index()];
        pose[HandPoint::ThumbTip.index()] = [index_tip[0] + 0.02, index_tip[1] + 0.02, 0.0];
        assert_eq!(ShapeMetrics::from_pose(&pose).label(), ("OK", 0.55));
    }

    #[test]
    fn test_rule_order() {
        let wide = ShapeMetrics {
            openness: 0.15,
            pinch: 0.2,
            spread: 0.5,
        };
        assert_eq!(wide.label().0, "WIDE");
        let plain = ShapeMetrics {
            openness: 0.15,
            pinch: 0.2,
            spread: 0.2,
        };
        assert_eq!(plain.label(), ("SIGN", 0.5));
    }

    #[test]
    fn test_empty_window() {
        assert!(HeuristicClassifier::default().classify(&[]).is_none());
    }

    #[test]
    fn test_floor_applies() {
        let pose = pose_from_frame(&make_open_hand(None)).unwrap();
        let strict = HeuristicClassifier {
            min_confidence: 0.6,
        };
        assert!(strict.classify(&[pose]).is_none());
    }
}
