//! Motion state tracking: frame-to-frame landmark displacement with
//! exponential smoothing and hysteresis-based state classification.
//!
//! The tracker is the first per-frame stage.  Its snapshot gates the
//! gesture debouncer and the token stabilizer, so transitional hand
//! poses never reach them.

use std::collections::VecDeque;

use tracing::debug;

use crate::landmarks::{planar_distance, LandmarkFrame, Point3};
use crate::sexp::flag;

/// Velocities below this are snapped to zero while decaying.
const DECAY_FLOOR: f32 = 1e-9;

// ── MotionState ────────────────────────────────────────────

/// Classified hand motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionState {
    /// No (or malformed) hand this frame.
    NoHand,
    /// Very low motion held for the idle frame requirement.
    Idle,
    /// Low motion held for the stable frame requirement.
    Stable,
    Moving,
    MovingFast,
}

impl MotionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoHand => "no_hand",
            Self::Idle => "idle",
            Self::Stable => "stable",
            Self::Moving => "moving",
            Self::MovingFast => "moving_fast",
        }
    }

    /// Stable or idle: the hand is posed deliberately.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Stable | Self::Idle)
    }
}

// ── Snapshot ───────────────────────────────────────────────

/// Motion state after one update cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSnapshot {
    pub state: MotionState,
    /// Exponentially smoothed mean per-point displacement.
    pub smoothed_velocity: f32,
    /// Mean of the most recent smoothed velocities.
    pub average_movement: f32,
    pub stable_frame_count: u32,
    pub has_hand: bool,
}

impl MotionSnapshot {
    /// Snapshot of a tracker that has never seen a hand.
    pub fn no_hand() -> Self {
        Self {
            state: MotionState::NoHand,
            smoothed_velocity: 0.0,
            average_movement: 0.0,
            stable_frame_count: 0,
            has_hand: false,
        }
    }
}

// ── Config ─────────────────────────────────────────────────

/// Thresholds tuned for image-normalized landmark coordinates.
#[derive(Debug, Clone)]
pub struct MotionConfig {
    /// Smoothed velocity at or below which the hand may be idle.
    pub idle_threshold: f32,
    /// Smoothed velocity at or below which the hand counts as still.
    pub stable_threshold: f32,
    /// Smoothed velocity at or above which the hand is moving fast.
    pub fast_threshold: f32,
    /// Consecutive still frames required for `Stable`.
    pub stable_required_frames: u32,
    /// Consecutive still frames required for `Idle`.
    pub idle_required_frames: u32,
    /// Blend factor for new displacement samples (0.0-1.0).
    pub smoothing_alpha: f32,
    /// Number of smoothed velocities kept for `average_movement`.
    pub history_size: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            idle_threshold: 0.004,
            stable_threshold: 0.012,
            fast_threshold: 0.05,
            stable_required_frames: 7,
            idle_required_frames: 14,
            smoothing_alpha: 0.45,
            history_size: 30,
        }
    }
}

// ── Tracker ────────────────────────────────────────────────

/// Tracks frame-to-frame landmark movement with smoothing.
pub struct MotionTracker {
    pub config: MotionConfig,
    history: VecDeque<f32>,
    prev_points: Option<Vec<Point3>>,
    smoothed: f32,
    stable_frames: u32,
    last_state: MotionState,
}

impl MotionTracker {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_size),
            config,
            prev_points: None,
            smoothed: 0.0,
            stable_frames: 0,
            last_state: MotionState::NoHand,
        }
    }

    /// Feed one frame (or its absence) and classify the result.
    pub fn update(&mut self, frame: Option<&LandmarkFrame>) -> MotionSnapshot {
        let frame = match frame {
            Some(f) if f.is_complete() => f,
            _ => return self.update_absent(),
        };

        let current = frame.points();
        let instant = match &self.prev_points {
            Some(prev) => mean_planar_displacement(prev, current),
            None => 0.0,
        };
        self.prev_points = Some(current.to_vec());

        let alpha = self.config.smoothing_alpha;
        self.smoothed = alpha * instant + (1.0 - alpha) * self.smoothed;
        self.push_history(self.smoothed);

        if self.smoothed <= self.config.stable_threshold {
            self.stable_frames += 1;
        } else {
            self.stable_frames = 0;
        }

        let state = self.classify();
        if state != self.last_state {
            debug!(
                "Motion state {} -> {} (velocity={:.4}, stable_frames={})",
                self.last_state.as_str(),
                state.as_str(),
                self.smoothed,
                self.stable_frames,
            );
        }
        self.last_state = state;

        MotionSnapshot {
            state,
            smoothed_velocity: self.smoothed,
            average_movement: self.average_movement(10),
            stable_frame_count: self.stable_frames,
            has_hand: true,
        }
    }

    fn update_absent(&mut self) -> MotionSnapshot {
        self.prev_points = None;
        self.stable_frames = 0;
        self.smoothed *= 0.5;
        if self.smoothed < DECAY_FLOOR {
            self.smoothed = 0.0;
        }
        self.push_history(self.smoothed);
        self.last_state = MotionState::NoHand;

        MotionSnapshot {
            state: MotionState::NoHand,
            smoothed_velocity: self.smoothed,
            average_movement: self.average_movement(10),
            stable_frame_count: 0,
            has_hand: false,
        }
    }

    fn classify(&self) -> MotionState {
        let v = self.smoothed;
        let cfg = &self.config;

        if v >= cfg.fast_threshold {
            return MotionState::MovingFast;
        }
        if v <= cfg.idle_threshold && self.stable_frames >= cfg.idle_required_frames {
            return MotionState::Idle;
        }
        if v <= cfg.stable_threshold && self.stable_frames >= cfg.stable_required_frames {
            return MotionState::Stable;
        }
        MotionState::Moving
    }

    fn push_history(&mut self, value: f32) {
        self.history.push_back(value);
        while self.history.len() > self.config.history_size.max(1) {
            self.history.pop_front();
        }
    }

    /// Mean of the last `window` smoothed velocities.
    pub fn average_movement(&self, window: usize) -> f32 {
        if self.history.is_empty() || window == 0 {
            return 0.0;
        }
        let take = window.min(self.history.len());
        let sum: f32 = self.history.iter().rev().take(take).sum();
        sum / take as f32
    }

    /// Forget all motion history.
    pub fn reset(&mut self) {
        self.history.clear();
        self.prev_points = None;
        self.smoothed = 0.0;
        self.stable_frames = 0;
        self.last_state = MotionState::NoHand;
    }

    /// Generate s-expression for status logging.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:state :{} :velocity {:.4} :average {:.4} :stable-frames {} :has-hand {})",
            self.last_state.as_str(),
            self.smoothed,
            self.average_movement(10),
            self.stable_frames,
            flag(self.last_state != MotionState::NoHand),
        )
    }

    /// Generate s-expression for the active configuration.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:idle-threshold {:.4} :stable-threshold {:.4} :fast-threshold {:.4} :stable-required-frames {} :idle-required-frames {} :smoothing-alpha {:.2} :history-size {})",
            self.config.idle_threshold,
            self.config.stable_threshold,
            self.config.fast_threshold,
            self.config.stable_required_frames,
            self.config.idle_required_frames,
            self.config.smoothing_alpha,
            self.config.history_size,
        )
    }
}

/// Mean per-point planar displacement between two frames.
fn mean_planar_displacement(prev: &[Point3], current: &[Point3]) -> f32 {
    if prev.len() != current.len() || current.is_empty() {
        return 0.0;
    }
    let total: f32 = prev
        .iter()
        .zip(current)
        .map(|(a, b)| planar_distance(a, b))
        .sum();
    total / current.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{make_open_hand, translated};

    fn feed_still(tracker: &mut MotionTracker, frames: u32) -> MotionSnapshot {
        let hand = make_open_hand(None);
        let mut snap = MotionSnapshot::no_hand();
        for _ in 0..frames {
            snap = tracker.update(Some(&hand));
        }
        snap
    }

    #[test]
    fn test_first_frame_has_zero_movement() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let snap = tracker.update(Some(&make_open_hand(None)));
        assert!(snap.has_hand);
        assert_eq!(snap.smoothed_velocity, 0.0);
        assert_eq!(snap.stable_frame_count, 1);
        assert_eq!(snap.state, MotionState::Moving);
    }

    #[test]
    fn test_still_hand_becomes_idle() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let required = tracker.config.idle_required_frames;
        let snap = feed_still(&mut tracker, required);
        assert_eq!(snap.state, MotionState::Idle);
        let snap = feed_still(&mut tracker, 10);
        assert_eq!(snap.state, MotionState::Idle);
    }

    #[test]
    fn test_still_hand_between_requirements_is_stable() {
        let cfg = MotionConfig::default();
        for n in cfg.stable_required_frames..cfg.idle_required_frames {
            let mut tracker = MotionTracker::new(cfg.clone());
            let snap = feed_still(&mut tracker, n);
            assert_eq!(snap.state, MotionState::Stable, "after {} still frames", n);
        }
    }

    #[test]
    fn test_short_still_run_is_moving() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let snap = feed_still(&mut tracker, 6);
        assert_eq!(snap.state, MotionState::Moving);
    }

    #[test]
    fn test_large_jump_is_moving_fast() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let hand = make_open_hand(None);
        feed_still(&mut tracker, 20);
        let snap = tracker.update(Some(&translated(&hand, 0.2, 0.0)));
        // 0.45 * 0.2 = 0.09 >= 0.05
        assert_eq!(snap.state, MotionState::MovingFast);
        assert_eq!(snap.stable_frame_count, 0);
        assert!((snap.smoothed_velocity - 0.09).abs() < 1e-4);
    }

    #[test]
    fn test_smoothing_blend() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let hand = make_open_hand(None);
        tracker.update(Some(&hand));
        let snap = tracker.update(Some(&translated(&hand, 0.03, 0.04)));
        // displacement 0.05 per point, alpha 0.45
        assert!((snap.smoothed_velocity - 0.0225).abs() < 1e-5);
        assert_eq!(snap.state, MotionState::Moving);
    }

    #[test]
    fn test_no_hand_decays_monotonically() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let hand = make_open_hand(None);
        tracker.update(Some(&hand));
        tracker.update(Some(&translated(&hand, 0.1, 0.0)));

        let first = tracker.update(None);
        assert_eq!(first.state, MotionState::NoHand);
        assert!(!first.has_hand);
        assert_eq!(first.stable_frame_count, 0);

        let mut prev = first.smoothed_velocity;
        assert!(prev > 0.0);
        let mut steps = 0;
        while prev > 0.0 {
            let snap = tracker.update(None);
            assert_eq!(snap.state, MotionState::NoHand);
            assert!(
                snap.smoothed_velocity < prev,
                "velocity must strictly decrease: {} -> {}",
                prev,
                snap.smoothed_velocity,
            );
            prev = snap.smoothed_velocity;
            steps += 1;
            assert!(steps < 200, "decay never reached zero");
        }
        assert_eq!(tracker.smoothed, 0.0);
    }

    #[test]
    fn test_malformed_frame_is_no_hand() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        feed_still(&mut tracker, 10);
        let short = LandmarkFrame::new(vec![[0.5, 0.5, 0.0]; 12], None);
        let snap = tracker.update(Some(&short));
        assert_eq!(snap.state, MotionState::NoHand);
        assert_eq!(snap.stable_frame_count, 0);
    }

    #[test]
    fn test_hand_return_does_not_diff_against_stale_frame() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        let hand = make_open_hand(None);
        feed_still(&mut tracker, 3);
        tracker.update(None);
        let snap = tracker.update(Some(&translated(&hand, 0.3, 0.3)));
        assert_eq!(snap.smoothed_velocity, 0.0);
    }

    #[test]
    fn test_average_movement_window() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        assert_eq!(tracker.average_movement(10), 0.0);
        let hand = make_open_hand(None);
        tracker.update(Some(&hand));
        tracker.update(Some(&translated(&hand, 0.1, 0.0)));
        // history: [0.0, 0.045]
        assert!((tracker.average_movement(10) - 0.0225).abs() < 1e-5);
        assert!((tracker.average_movement(1) - 0.045).abs() < 1e-5);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        feed_still(&mut tracker, 100);
        assert_eq!(tracker.history.len(), tracker.config.history_size);
    }

    #[test]
    fn test_reset() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        feed_still(&mut tracker, 20);
        tracker.reset();
        assert_eq!(tracker.last_state, MotionState::NoHand);
        assert_eq!(tracker.smoothed, 0.0);
        assert!(tracker.history.is_empty());
    }

    #[test]
    fn test_status_sexp() {
        let mut tracker = MotionTracker::new(MotionConfig::default());
        feed_still(&mut tracker, 8);
        let sexp = tracker.status_sexp();
        assert!(sexp.contains(":state :stable"));
        assert!(sexp.contains(":has-hand t"));
        assert!(tracker.config_sexp().contains(":idle-required-frames 14"));
    }
}
