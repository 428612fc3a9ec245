//! Landmark sequence feature engineering shared by training and inference.
//!
//! A window of poses is wrist-centered, divided by palm width, clipped,
//! linearly resampled to a fixed length, and flattened into
//! positions ‖ velocities ‖ per-point spread.

use anyhow::bail;

use crate::landmarks::{HandPoint, LandmarkFrame, Point3, COORDS, POINT_COUNT};

/// One full hand pose.
pub type Pose = [Point3; POINT_COUNT];

pub const DEFAULT_SEQUENCE_LENGTH: usize = 24;

const EPSILON: f32 = 1e-6;
const CLIP: f32 = 3.0;

/// Values per pose once flattened.
const POSE_LEN: usize = POINT_COUNT * COORDS;

/// Feature vector length for a given resampled length.
pub fn feature_dim(sequence_length: usize) -> usize {
    3 * sequence_length * POSE_LEN
}

/// Fixed-size pose from a frame.  None for malformed frames.
pub fn pose_from_frame(frame: &LandmarkFrame) -> Option<Pose> {
    if !frame.is_complete() {
        return None;
    }
    let mut pose = [[0.0; COORDS]; POINT_COUNT];
    pose.copy_from_slice(&frame.points()[..POINT_COUNT]);
    Some(pose)
}

// ── Normalization ──────────────────────────────────────────

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Wrist-center each pose and divide by palm width (index MCP to pinky MCP).
///
/// Poses whose palm width collapses below epsilon borrow the median width
/// of the valid poses; if every pose collapsed the width is 1.  Results
/// are clipped to [-3, 3].
pub fn normalize(sequence: &[Pose]) -> Vec<Pose> {
    let centered: Vec<Pose> = sequence
        .iter()
        .map(|pose| {
            let wrist = pose[HandPoint::Wrist.index()];
            let mut out = *pose;
            for p in out.iter_mut() {
                for k in 0..COORDS {
                    p[k] -= wrist[k];
                }
            }
            out
        })
        .collect();

    let scales: Vec<f32> = centered
        .iter()
        .map(|pose| {
            crate::landmarks::distance(
                &pose[HandPoint::IndexMcp.index()],
                &pose[HandPoint::PinkyMcp.index()],
            )
        })
        .collect();

    let mut valid: Vec<f32> = scales.iter().copied().filter(|s| *s > EPSILON).collect();
    let reference = if valid.is_empty() { 1.0 } else { median(&mut valid) };

    centered
        .into_iter()
        .zip(scales)
        .map(|(mut pose, scale)| {
            let scale = if scale > EPSILON { scale } else { reference };
            for p in pose.iter_mut() {
                for v in p.iter_mut() {
                    *v = (*v / scale).clamp(-CLIP, CLIP);
                }
            }
            pose
        })
        .collect()
}

/// Normalized sequence mirrored on the x axis (left/right augmentation).
pub fn mirror(sequence: &[Pose]) -> Vec<Pose> {
    let mut mirrored = normalize(sequence);
    for pose in mirrored.iter_mut() {
        for p in pose.iter_mut() {
            p[0] = -p[0];
        }
    }
    mirrored
}

// ── Resampling ─────────────────────────────────────────────

/// Linearly resample every point trajectory to `target` steps.
///
/// Source and destination steps are spread evenly over [0, 1].  A sequence
/// already at the target length comes back unchanged; a single pose is
/// repeated.
pub fn resample(sequence: &[Pose], target: usize) -> anyhow::Result<Vec<Pose>> {
    if target <= 1 {
        bail!("target length must be greater than 1, got {}", target);
    }
    if sequence.is_empty() {
        bail!("cannot resample an empty sequence");
    }
    if sequence.len() == target {
        return Ok(sequence.to_vec());
    }
    if sequence.len() == 1 {
        return Ok(vec![sequence[0]; target]);
    }

    let last = sequence.len() - 1;
    let mut out = Vec::with_capacity(target);
    for step in 0..target {
        let pos = step as f64 * last as f64 / (target - 1) as f64;
        let lo = (pos.floor() as usize).min(last);
        let hi = (lo + 1).min(last);
        let frac = (pos - lo as f64) as f32;
        let mut pose = sequence[lo];
        for (i, p) in pose.iter_mut().enumerate() {
            for k in 0..COORDS {
                let a = sequence[lo][i][k];
                let b = sequence[hi][i][k];
                p[k] = a + (b - a) * frac;
            }
        }
        out.push(pose);
    }
    Ok(out)
}

// ── Feature vector ─────────────────────────────────────────

fn flatten_into(out: &mut Vec<f32>, poses: &[Pose]) {
    for pose in poses {
        for p in pose {
            out.extend_from_slice(p);
        }
    }
}

/// Build the feature vector for a raw (unnormalized) pose window.
pub fn sequence_features(sequence: &[Pose], sequence_length: usize) -> anyhow::Result<Vec<f32>> {
    features_from_normalized(&normalize(sequence), sequence_length)
}

/// Build the feature vector for an already-normalized pose window.
pub fn features_from_normalized(
    normalized: &[Pose],
    sequence_length: usize,
) -> anyhow::Result<Vec<f32>> {
    let sampled = resample(normalized, sequence_length)?;

    // First difference; the first step has zero velocity.
    let mut velocity = Vec::with_capacity(sampled.len());
    velocity.push([[0.0; COORDS]; POINT_COUNT]);
    for pair in sampled.windows(2) {
        let mut v = [[0.0; COORDS]; POINT_COUNT];
        for i in 0..POINT_COUNT {
            for k in 0..COORDS {
                v[i][k] = pair[1][i][k] - pair[0][i][k];
            }
        }
        velocity.push(v);
    }

    // Population standard deviation of each coordinate over time.
    let n = sampled.len() as f32;
    let mut spread = [[0.0f32; COORDS]; POINT_COUNT];
    for i in 0..POINT_COUNT {
        for k in 0..COORDS {
            let mean = sampled.iter().map(|p| p[i][k]).sum::<f32>() / n;
            let var = sampled.iter().map(|p| (p[i][k] - mean).powi(2)).sum::<f32>() / n;
            spread[i][k] = var.sqrt();
        }
    }

    let mut out = Vec::with_capacity(feature_dim(sequence_length));
    flatten_into(&mut out, &sampled);
    flatten_into(&mut out, &velocity);
    for _ in 0..sequence_length {
        flatten_into(&mut out, std::slice::from_ref(&spread));
    }
    Ok(out)
}

/// Cosine similarity with norms floored at epsilon.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt().max(EPSILON);
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt().max(EPSILON);
    dot / (na * nb)
}

#[cfg(test)]
pub fn make_window(len: usize) -> Vec<Pose> {
    use crate::landmarks::{make_open_hand, translated};
    (0..len)
        .map(|i| {
            let frame = translated(&make_open_hand(None), 0.01 * i as f32, -0.005 * i as f32);
            pose_from_frame(&frame).unwrap()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[Pose], b: &[Pose], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.iter().zip(b) {
            for i in 0..POINT_COUNT {
                for k in 0..COORDS {
                    assert!(
                        (pa[i][k] - pb[i][k]).abs() < tol,
                        "point {} coord {}: {} vs {}",
                        i,
                        k,
                        pa[i][k],
                        pb[i][k],
                    );
                }
            }
        }
    }

    #[test]
    fn test_normalize_wrist_at_origin() {
        let norm = normalize(&make_window(5));
        for pose in &norm {
            assert_eq!(pose[HandPoint::Wrist.index()], [0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_normalize_scale_invariance() {
        let window = make_window(6);
        let scaled: Vec<Pose> = window
            .iter()
            .map(|pose| {
                let mut out = *pose;
                for p in out.iter_mut() {
                    p[0] = p[0] * 2.5 + 0.3;
                    p[1] = p[1] * 2.5 - 0.1;
                    p[2] *= 2.5;
                }
                out
            })
            .collect();
        assert_close(&normalize(&window), &normalize(&scaled), 1e-4);
    }

    #[test]
    fn test_normalize_collapsed_palm_uses_median() {
        let mut window = make_window(3);
        let mcp = window[1][HandPoint::IndexMcp.index()];
        window[1][HandPoint::PinkyMcp.index()] = mcp;
        let norm = normalize(&window);
        // Wrist-to-index-MCP offset is identical in every pose of the fixture.
        let reference = norm[0][HandPoint::IndexMcp.index()];
        let collapsed = norm[1][HandPoint::IndexMcp.index()];
        for k in 0..COORDS {
            assert!((reference[k] - collapsed[k]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_normalize_all_collapsed_keeps_unit_scale() {
        let window = vec![[[0.5, 0.5, 0.0]; POINT_COUNT]; 4];
        let norm = normalize(&window);
        assert!(norm.iter().flatten().flatten().all(|v| *v == 0.0));
    }

    #[test]
    fn test_normalize_clips() {
        let mut window = make_window(1);
        window[0][HandPoint::PinkyTip.index()] = [50.0, 50.0, 50.0];
        let norm = normalize(&window);
        assert_eq!(norm[0][HandPoint::PinkyTip.index()], [CLIP, CLIP, CLIP]);
    }

    #[test]
    fn test_resample_idempotent_at_target() {
        let window = normalize(&make_window(DEFAULT_SEQUENCE_LENGTH));
        let out = resample(&window, DEFAULT_SEQUENCE_LENGTH).unwrap();
        assert_eq!(out, window);
    }

    #[test]
    fn test_resample_endpoints_and_midpoint() {
        let window = make_window(3);
        let out = resample(&window, 5).unwrap();
        assert_eq!(out.len(), 5);
        assert_close(&out[..1], &window[..1], 1e-6);
        assert_close(&out[4..], &window[2..], 1e-6);
        assert_close(&out[2..3], &window[1..2], 1e-6);
    }

    #[test]
    fn test_resample_single_pose() {
        let window = make_window(1);
        let out = resample(&window, 4).unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|p| *p == window[0]));
    }

    #[test]
    fn test_resample_rejects_short_target() {
        assert!(resample(&make_window(3), 1).is_err());
        assert!(resample(&make_window(3), 0).is_err());
        assert!(resample(&[], 4).is_err());
    }

    #[test]
    fn test_feature_dim() {
        let features = sequence_features(&make_window(10), 8).unwrap();
        assert_eq!(features.len(), feature_dim(8));
        assert_eq!(feature_dim(24), 3 * 24 * 21 * 3);
    }

    #[test]
    fn test_static_window_has_no_velocity_or_spread() {
        let window = vec![pose_from_frame(&crate::landmarks::make_open_hand(None)).unwrap(); 5];
        let features = sequence_features(&window, 4).unwrap();
        let positions = 4 * POSE_LEN;
        assert!(features[positions..].iter().all(|v| v.abs() < 1e-6));
        assert!(features[..positions].iter().any(|v| v.abs() > 0.1));
    }

    #[test]
    fn test_mirror_negates_x() {
        let window = make_window(2);
        let norm = normalize(&window);
        let mirrored = mirror(&window);
        for (a, b) in norm.iter().zip(&mirrored) {
            for i in 0..POINT_COUNT {
                assert_eq!(a[i][0], -b[i][0]);
                assert_eq!(a[i][1], b[i][1]);
            }
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_pose_from_malformed_frame() {
        let frame = LandmarkFrame::new(vec![[0.0; 3]; 5], None);
        assert!(pose_from_frame(&frame).is_none());
    }
}
