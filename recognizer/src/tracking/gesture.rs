//! Control gesture recognition from hand landmarks.
//!
//! Detects open palm, fist, and two-finger poses from per-finger
//! extended/curled state.  A pose only counts while the hand is settled;
//! it must be held for a number of frames before it is confirmed, and a
//! cooldown keeps one held pose from firing repeatedly.

use tracing::{debug, info};

use super::motion::MotionState;
use crate::landmarks::{HandPoint, Handedness, LandmarkFrame};
use crate::sexp::flag;

// ── Gesture types ──────────────────────────────────────────

/// Recognized control gestures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlGesture {
    None,
    /// Four or more fingers extended, including index and middle.
    OpenPalm,
    /// Index, middle, ring and pinky curled.
    Fist,
    /// Index and middle extended, ring and pinky curled.
    TwoFingers,
}

impl ControlGesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::OpenPalm => "open_palm",
            Self::Fist => "fist",
            Self::TwoFingers => "two_fingers",
        }
    }

    /// Fixed rule confidence for each pose.
    pub fn confidence(&self) -> f32 {
        match self {
            Self::None => 0.0,
            Self::OpenPalm => 0.92,
            Self::Fist => 0.9,
            Self::TwoFingers => 0.88,
        }
    }

    /// Action bound to a confirmed gesture.
    pub fn action(&self) -> Action {
        match self {
            Self::None => Action::None,
            Self::OpenPalm => Action::TogglePause,
            Self::Fist => Action::ConfirmSentence,
            Self::TwoFingers => Action::UndoLastWord,
        }
    }
}

/// Application action triggered by a confirmed gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    None,
    TogglePause,
    ConfirmSentence,
    UndoLastWord,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TogglePause => "toggle_pause",
            Self::ConfirmSentence => "confirm_sentence",
            Self::UndoLastWord => "undo_last_word",
        }
    }

    /// Short user-facing feedback line for overlays.
    pub fn feedback(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::TogglePause => "Open palm detected: pause/resume toggled.",
            Self::ConfirmSentence => "Fist detected: sentence confirmed.",
            Self::UndoLastWord => "Two fingers detected: last word removed.",
        }
    }
}

// ── Events ─────────────────────────────────────────────────

/// Debounced gesture output for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureEvent {
    pub gesture: ControlGesture,
    pub confidence: f32,
    pub confirmed: bool,
    pub action: Action,
}

impl GestureEvent {
    pub fn none() -> Self {
        Self {
            gesture: ControlGesture::None,
            confidence: 0.0,
            confirmed: false,
            action: Action::None,
        }
    }
}

impl Default for GestureEvent {
    fn default() -> Self {
        Self::none()
    }
}

// ── Config ─────────────────────────────────────────────────

/// Configuration for gesture debouncing.
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Consecutive frames a pose must be held before it is confirmed.
    pub hold_frames: u32,
    /// Frames after a confirmation during which nothing else confirms.
    pub cooldown_frames: u32,
    /// Minimum rule confidence for a pose to be considered.
    pub min_confidence: f32,
    /// Required tip-above-joint margin (normalized y) for an extended finger.
    pub finger_margin: f32,
    /// Required horizontal tip/joint margin for an extended thumb.
    pub thumb_margin: f32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            hold_frames: 6,
            cooldown_frames: 20,
            min_confidence: 0.78,
            finger_margin: 0.025,
            thumb_margin: 0.02,
        }
    }
}

// ── Finger state ───────────────────────────────────────────

/// Per-finger extended (true) / curled (false) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FingerState {
    pub thumb: bool,
    pub index: bool,
    pub middle: bool,
    pub ring: bool,
    pub pinky: bool,
}

impl FingerState {
    /// Compute finger state from a complete frame.
    pub fn from_frame(frame: &LandmarkFrame, config: &GestureConfig) -> Self {
        let m = config.finger_margin;
        Self {
            thumb: thumb_extended(frame, frame.handedness(), config.thumb_margin),
            index: finger_extended(frame, HandPoint::IndexTip, HandPoint::IndexPip, m),
            middle: finger_extended(frame, HandPoint::MiddleTip, HandPoint::MiddlePip, m),
            ring: finger_extended(frame, HandPoint::RingTip, HandPoint::RingPip, m),
            pinky: finger_extended(frame, HandPoint::PinkyTip, HandPoint::PinkyPip, m),
        }
    }

    pub fn extended_count(&self) -> usize {
        [self.thumb, self.index, self.middle, self.ring, self.pinky]
            .iter()
            .filter(|e| **e)
            .count()
    }

    /// Match the pose rules in priority order.
    pub fn classify(&self) -> ControlGesture {
        if self.extended_count() >= 4 && self.index && self.middle {
            return ControlGesture::OpenPalm;
        }
        if !self.index && !self.middle && !self.ring && !self.pinky {
            return ControlGesture::Fist;
        }
        if self.index && self.middle && !self.ring && !self.pinky {
            return ControlGesture::TwoFingers;
        }
        ControlGesture::None
    }
}

/// A finger is extended when its tip sits above its second joint.
/// Image y grows downward.
fn finger_extended(frame: &LandmarkFrame, tip: HandPoint, pip: HandPoint, margin: f32) -> bool {
    let tip_y = frame.point(tip)[1];
    let pip_y = frame.point(pip)[1];
    (pip_y - tip_y) > margin
}

/// Handedness-aware thumb extension check.
fn thumb_extended(frame: &LandmarkFrame, handedness: Option<Handedness>, margin: f32) -> bool {
    let tip_x = frame.point(HandPoint::ThumbTip)[0];
    let ip_x = frame.point(HandPoint::ThumbIp)[0];
    match handedness {
        Some(Handedness::Right) => (ip_x - tip_x) > margin,
        Some(Handedness::Left) => (tip_x - ip_x) > margin,
        None => (tip_x - ip_x).abs() > margin,
    }
}

/// Raw (undebounced) gesture and its rule confidence.
pub fn detect_control_gesture(frame: &LandmarkFrame, config: &GestureConfig) -> (ControlGesture, f32) {
    let gesture = FingerState::from_frame(frame, config).classify();
    (gesture, gesture.confidence())
}

// ── Debouncer ──────────────────────────────────────────────

/// Converts raw per-frame poses into debounced control events.
pub struct GestureDebouncer {
    pub config: GestureConfig,
    candidate: ControlGesture,
    candidate_frames: u32,
    cooldown_remaining: u32,
    confirmed_total: u64,
}

impl GestureDebouncer {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            candidate: ControlGesture::None,
            candidate_frames: 0,
            cooldown_remaining: 0,
            confirmed_total: 0,
        }
    }

    /// Process one frame and return the debounced event.
    pub fn update(&mut self, frame: Option<&LandmarkFrame>, motion: MotionState) -> GestureEvent {
        if self.cooldown_remaining > 0 {
            self.cooldown_remaining -= 1;
        }

        let frame = match frame {
            Some(f) if f.is_complete() => f,
            _ => {
                self.reset_candidate();
                return GestureEvent::none();
            }
        };

        let (mut raw, mut confidence) = detect_control_gesture(frame, &self.config);

        // Transitional poses are not intentional gestures.
        if !motion.is_settled() || confidence < self.config.min_confidence {
            raw = ControlGesture::None;
            confidence = 0.0;
        }

        if raw == ControlGesture::None {
            self.reset_candidate();
            return GestureEvent::none();
        }

        if raw == self.candidate {
            self.candidate_frames += 1;
        } else {
            self.candidate = raw;
            self.candidate_frames = 1;
        }

        let mut event = GestureEvent {
            gesture: raw,
            confidence,
            confirmed: false,
            action: Action::None,
        };

        if self.candidate_frames >= self.config.hold_frames && self.cooldown_remaining == 0 {
            event.confirmed = true;
            event.action = raw.action();
            self.cooldown_remaining = self.config.cooldown_frames;
            self.confirmed_total += 1;
            self.reset_candidate();
            info!("Gesture confirmed: {} -> {}", raw.as_str(), event.action.as_str());
        } else {
            debug!(
                "Gesture candidate {} held {} frame(s), cooldown {}",
                raw.as_str(),
                self.candidate_frames,
                self.cooldown_remaining,
            );
        }

        event
    }

    /// Whether a pose is currently being held (forming a gesture).
    pub fn is_forming(&self) -> bool {
        self.candidate != ControlGesture::None
    }

    /// Clear candidate and cooldown.
    pub fn reset(&mut self) {
        self.cooldown_remaining = 0;
        self.reset_candidate();
    }

    fn reset_candidate(&mut self) {
        self.candidate = ControlGesture::None;
        self.candidate_frames = 0;
    }

    /// Generate s-expression for status logging.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:candidate :{} :held {} :cooldown {} :confirmed {} :forming {})",
            self.candidate.as_str(),
            self.candidate_frames,
            self.cooldown_remaining,
            self.confirmed_total,
            flag(self.is_forming()),
        )
    }

    /// Generate s-expression for the active configuration.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:hold-frames {} :cooldown-frames {} :min-confidence {:.2} :finger-margin {:.3} :thumb-margin {:.3})",
            self.config.hold_frames,
            self.config.cooldown_frames,
            self.config.min_confidence,
            self.config.finger_margin,
            self.config.thumb_margin,
        )
    }
}

// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{make_fist, make_open_hand, make_two_fingers};

    fn hold(
        debouncer: &mut GestureDebouncer,
        frame: &LandmarkFrame,
        frames: u32,
        motion: MotionState,
    ) -> Vec<GestureEvent> {
        (0..frames)
            .map(|_| debouncer.update(Some(frame), motion))
            .collect()
    }

    #[test]
    fn test_raw_detection() {
        let cfg = GestureConfig::default();
        let right = Some(Handedness::Right);
        assert_eq!(
            detect_control_gesture(&make_open_hand(right), &cfg),
            (ControlGesture::OpenPalm, 0.92)
        );
        assert_eq!(
            detect_control_gesture(&make_fist(right), &cfg),
            (ControlGesture::Fist, 0.9)
        );
        assert_eq!(
            detect_control_gesture(&make_two_fingers(right), &cfg),
            (ControlGesture::TwoFingers, 0.88)
        );
    }

    #[test]
    fn test_thumb_handedness() {
        let cfg = GestureConfig::default();
        // Thumb tip sits left of its joint in the fixture.
        let right = FingerState::from_frame(&make_open_hand(Some(Handedness::Right)), &cfg);
        let left = FingerState::from_frame(&make_open_hand(Some(Handedness::Left)), &cfg);
        let unknown = FingerState::from_frame(&make_open_hand(None), &cfg);
        assert!(right.thumb);
        assert!(!left.thumb);
        assert!(unknown.thumb);
        // Four fingers still make an open palm.
        assert_eq!(left.classify(), ControlGesture::OpenPalm);
    }

    #[test]
    fn test_finger_rules() {
        let only_index = FingerState {
            index: true,
            ..FingerState::default()
        };
        assert_eq!(only_index.classify(), ControlGesture::None);

        let three = FingerState {
            index: true,
            middle: true,
            ring: true,
            ..FingerState::default()
        };
        assert_eq!(three.classify(), ControlGesture::None);

        let thumb_only = FingerState {
            thumb: true,
            ..FingerState::default()
        };
        assert_eq!(thumb_only.classify(), ControlGesture::Fist);
    }

    #[test]
    fn test_confirms_after_hold_frames() {
        let mut debouncer = GestureDebouncer::new(GestureConfig::default());
        let palm = make_open_hand(Some(Handedness::Right));
        let hold_frames = debouncer.config.hold_frames;

        let events = hold(&mut debouncer, &palm, hold_frames, MotionState::Stable);
        let confirmed: Vec<_> = events.iter().filter(|e| e.confirmed).collect();
        assert_eq!(confirmed.len(), 1, "events: {:?}", events);
        assert_eq!(confirmed[0].action, Action::TogglePause);
        assert!(events.last().unwrap().confirmed);
    }

    #[test]
    fn test_does_not_confirm_before_hold_frames() {
        let mut debouncer = GestureDebouncer::new(GestureConfig::default());
        let palm = make_open_hand(Some(Handedness::Right));
        let hold_frames = debouncer.config.hold_frames;

        let events = hold(&mut debouncer, &palm, hold_frames - 1, MotionState::Stable);
        assert!(events.iter().all(|e| !e.confirmed));
        assert!(events.iter().all(|e| e.gesture == ControlGesture::OpenPalm));
        assert!(debouncer.is_forming());
    }

    #[test]
    fn test_cooldown_enforced() {
        let mut debouncer = GestureDebouncer::new(GestureConfig::default());
        let palm = make_open_hand(Some(Handedness::Right));
        let hold_frames = debouncer.config.hold_frames;
        let cooldown = debouncer.config.cooldown_frames;

        let events = hold(&mut debouncer, &palm, hold_frames, MotionState::Stable);
        assert!(events.last().unwrap().confirmed);

        let during = hold(&mut debouncer, &palm, cooldown - 1, MotionState::Stable);
        assert!(
            during.iter().all(|e| !e.confirmed),
            "re-confirmed during cooldown: {:?}",
            during,
        );

        let next = debouncer.update(Some(&palm), MotionState::Stable);
        assert!(next.confirmed, "expected confirmation once cooldown elapsed");
    }

    #[test]
    fn test_moving_hand_suppresses_gesture() {
        let mut debouncer = GestureDebouncer::new(GestureConfig::default());
        let fist = make_fist(Some(Handedness::Right));

        for motion in [MotionState::Moving, MotionState::MovingFast, MotionState::NoHand] {
            let events = hold(&mut debouncer, &fist, 10, motion);
            assert!(events.iter().all(|e| e.gesture == ControlGesture::None));
        }

        let events = hold(&mut debouncer, &fist, 6, MotionState::Idle);
        assert_eq!(events.last().unwrap().action, Action::ConfirmSentence);
    }

    #[test]
    fn test_interruption_resets_hold() {
        let mut debouncer = GestureDebouncer::new(GestureConfig::default());
        let palm = make_open_hand(Some(Handedness::Right));
        let two = make_two_fingers(Some(Handedness::Right));

        hold(&mut debouncer, &palm, 5, MotionState::Stable);
        let switched = debouncer.update(Some(&two), MotionState::Stable);
        assert!(!switched.confirmed);
        assert_eq!(debouncer.candidate, ControlGesture::TwoFingers);

        let events = hold(&mut debouncer, &palm, 5, MotionState::Stable);
        assert!(events.iter().all(|e| !e.confirmed));
    }

    #[test]
    fn test_no_hand_resets_candidate() {
        let mut debouncer = GestureDebouncer::new(GestureConfig::default());
        let palm = make_open_hand(Some(Handedness::Right));

        hold(&mut debouncer, &palm, 5, MotionState::Stable);
        let event = debouncer.update(None, MotionState::NoHand);
        assert_eq!(event, GestureEvent::none());
        assert!(!debouncer.is_forming());

        let malformed = LandmarkFrame::new(vec![[0.1, 0.1, 0.0]; 3], None);
        hold(&mut debouncer, &palm, 5, MotionState::Stable);
        debouncer.update(Some(&malformed), MotionState::Stable);
        assert!(!debouncer.is_forming());
    }

    #[test]
    fn test_min_confidence_gate() {
        let mut cfg = GestureConfig::default();
        cfg.min_confidence = 0.95;
        let mut debouncer = GestureDebouncer::new(cfg);
        let palm = make_open_hand(Some(Handedness::Right));
        let events = hold(&mut debouncer, &palm, 10, MotionState::Stable);
        assert!(events.iter().all(|e| e.gesture == ControlGesture::None));
    }

    #[test]
    fn test_reset() {
        let mut debouncer = GestureDebouncer::new(GestureConfig::default());
        let palm = make_open_hand(Some(Handedness::Right));
        hold(&mut debouncer, &palm, 6, MotionState::Stable);
        assert!(debouncer.cooldown_remaining > 0);
        debouncer.reset();
        assert_eq!(debouncer.cooldown_remaining, 0);
        assert_eq!(debouncer.candidate, ControlGesture::None);
    }

    #[test]
    fn test_action_strings() {
        assert_eq!(ControlGesture::OpenPalm.as_str(), "open_palm");
        assert_eq!(ControlGesture::Fist.action(), Action::ConfirmSentence);
        assert_eq!(ControlGesture::TwoFingers.action().as_str(), "undo_last_word");
        assert!(Action::UndoLastWord.feedback().contains("last word"));
        assert_eq!(Action::None.feedback(), "");
    }

    #[test]
    fn test_status_sexp() {
        let debouncer = GestureDebouncer::new(GestureConfig::default());
        assert!(debouncer.status_sexp().contains(":candidate :none"));
        assert!(debouncer.config_sexp().contains(":hold-frames 6"));
        assert!(debouncer.config_sexp().contains(":cooldown-frames 20"));
    }
}
