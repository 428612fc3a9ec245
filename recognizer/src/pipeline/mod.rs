//! Per-frame processing: motion, gestures, classification, text.
//!
//! [`FramePipeline::process`] runs one frame through every core stage in
//! order.  Optional enhancement stages run first, each only while its
//! switch is on.  A panic anywhere in a frame is caught at the frame
//! boundary: it is logged and counted, transient per-frame state is
//! reset, and an empty outcome is returned.

pub mod stabilizer;
pub mod worker;

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace};

use crate::classify::features::pose_from_frame;
use crate::classify::{Classification, Classifier, Pose};
use crate::config::RecognizerConfig;
use crate::context::{Counter, RuntimeContext, Severity};
use crate::landmarks::LandmarkFrame;
use crate::quality::{Stage, StageSwitches};
use crate::sexp::flag;
use crate::text::{Symbol, TextAssembler};
use crate::tracking::{
    Action, ControlGesture, GestureDebouncer, GestureEvent, MotionSnapshot, MotionTracker,
};
use stabilizer::TokenStabilizer;

// ── Collaborator seams ─────────────────────────────────────

/// Receives every confirmed sentence (e.g. a speech synthesizer).
pub trait SentenceSink: Send {
    fn on_sentence(&mut self, sentence: &str);
}

/// An optional enhancement stage run ahead of the core stages.
pub trait StageHook: Send {
    fn stage(&self) -> Stage;
    fn apply(&mut self, frame: Option<&LandmarkFrame>);
}

/// Hook that only counts the frames it was given.
pub struct CountingHook {
    stage: Stage,
    count: Arc<AtomicU64>,
}

impl CountingHook {
    pub fn new(stage: Stage) -> (Self, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        (
            Self {
                stage,
                count: Arc::clone(&count),
            },
            count,
        )
    }
}

impl StageHook for CountingHook {
    fn stage(&self) -> Stage {
        self.stage
    }

    fn apply(&mut self, _frame: Option<&LandmarkFrame>) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Outcome ────────────────────────────────────────────────

/// Everything one frame produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub motion: MotionSnapshot,
    pub gesture: GestureEvent,
    pub classification: Option<Classification>,
    /// Symbol handed to the text assembler this frame.
    pub accepted: Option<Symbol>,
    /// Sentence confirmed this frame (gesture or idle).
    pub sentence: Option<String>,
    pub paused: bool,
    /// Optional stages that ran.
    pub stages_run: Vec<Stage>,
    /// The frame panicked and was discarded.
    pub faulted: bool,
}

impl FrameOutcome {
    fn empty(paused: bool) -> Self {
        Self {
            motion: MotionSnapshot::no_hand(),
            gesture: GestureEvent::none(),
            classification: None,
            accepted: None,
            sentence: None,
            paused,
            stages_run: Vec::new(),
            faulted: false,
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────

pub struct FramePipeline {
    motion: MotionTracker,
    gestures: GestureDebouncer,
    classifier: Classifier,
    stabilizer: TokenStabilizer,
    text: Arc<TextAssembler>,
    switches: Arc<StageSwitches>,
    context: Arc<RuntimeContext>,
    window: VecDeque<Pose>,
    hooks: Vec<Box<dyn StageHook>>,
    sinks: Vec<Box<dyn SentenceSink>>,
    paused: bool,
}

impl FramePipeline {
    pub fn new(
        config: &RecognizerConfig,
        classifier: Classifier,
        text: Arc<TextAssembler>,
        switches: Arc<StageSwitches>,
        context: Arc<RuntimeContext>,
    ) -> Self {
        Self {
            motion: MotionTracker::new(config.motion.clone()),
            gestures: GestureDebouncer::new(config.gesture.clone()),
            window: VecDeque::with_capacity(classifier.window_len()),
            classifier,
            stabilizer: TokenStabilizer::new(config.stabilizer.clone()),
            text,
            switches,
            context,
            hooks: Vec::new(),
            sinks: Vec::new(),
            paused: false,
        }
    }

    pub fn add_hook(&mut self, hook: Box<dyn StageHook>) {
        self.hooks.push(hook);
    }

    pub fn add_sink(&mut self, sink: Box<dyn SentenceSink>) {
        self.sinks.push(sink);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    #[cfg(test)]
    pub fn text(&self) -> &Arc<TextAssembler> {
        &self.text
    }

    /// Process a frame received now.
    pub fn process(&mut self, frame: Option<LandmarkFrame>) -> FrameOutcome {
        self.process_at(frame, Instant::now())
    }

    /// Process a frame received at `now`.  Never fails.
    pub fn process_at(&mut self, frame: Option<LandmarkFrame>, now: Instant) -> FrameOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_frame(frame.as_ref(), now)));
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.context.record_fault(
                    Severity::Error,
                    "pipeline",
                    format!("frame processing panicked: {}", message),
                );
                self.context.incr(Counter::FramesFaulted);
                self.reset_transient();
                let mut outcome = FrameOutcome::empty(self.paused);
                outcome.faulted = true;
                outcome
            }
        };
        self.context.incr(Counter::FramesProcessed);
        self.context.record_frame_time(now);
        outcome
    }

    /// Confirm whatever text is pending (end of stream) and hand it to
    /// the sinks.
    pub fn flush_pending(&mut self) -> Option<String> {
        let sentence = self.text.confirm_sentence();
        if sentence.is_some() {
            info!("Pending text confirmed at end of stream");
        }
        self.emit(&sentence);
        sentence
    }

    /// Drop per-frame temporal state (smoothing, holds, window).
    pub fn reset_transient(&mut self) {
        self.motion.reset();
        self.gestures.reset();
        self.stabilizer.reset();
        self.window.clear();
    }

    fn run_optional_stages(&mut self, frame: Option<&LandmarkFrame>) -> Vec<Stage> {
        let mut ran = Vec::new();
        for hook in self.hooks.iter_mut() {
            let stage = hook.stage();
            if self.switches.is_enabled(stage) {
                hook.apply(frame);
                ran.push(stage);
            }
        }
        ran
    }

    fn run_frame(&mut self, frame: Option<&LandmarkFrame>, now: Instant) -> FrameOutcome {
        let frame = frame.filter(|f| f.is_complete());
        let stages_run = self.run_optional_stages(frame);

        let motion = self.motion.update(frame);
        trace!(
            hand = motion.has_hand,
            velocity = motion.smoothed_velocity,
            stable_frames = motion.stable_frame_count,
            "Motion {}",
            motion.state.as_str(),
        );
        let mut outcome = FrameOutcome::empty(self.paused);
        outcome.motion = motion;
        outcome.stages_run = stages_run;

        let pose = frame.and_then(pose_from_frame);
        let Some(pose) = pose else {
            self.window.clear();
            self.stabilizer.interrupt();
            outcome.gesture = self.gestures.update(None, motion.state);
            outcome.sentence = self.idle_check(now);
            self.emit(&outcome.sentence);
            return outcome;
        };

        self.context.incr(Counter::HandFrames);
        let capacity = self.classifier.window_len().max(1);
        self.window.push_back(pose);
        while self.window.len() > capacity {
            self.window.pop_front();
        }

        let gesture = self.gestures.update(frame, motion.state);
        outcome.gesture = gesture;
        if gesture.confirmed {
            self.context.incr(Counter::GesturesConfirmed);
            outcome.sentence = self.apply_action(gesture.action);
            outcome.paused = self.paused;
        }

        let eligible =
            !self.paused && motion.state.is_settled() && gesture.gesture == ControlGesture::None;
        if eligible {
            if self.window.len() >= capacity {
                let window = self.window.make_contiguous();
                outcome.classification = self.classifier.classify(window);
            }
            let label = outcome.classification.as_ref().map(|c| c.label.as_str());
            if let Some(label) = self.stabilizer.update(label) {
                if let Some(symbol) = Symbol::parse(&label) {
                    self.context.incr(Counter::TokensAccepted);
                    let heuristic = outcome.classification.as_ref().map_or(false, |c| c.heuristic);
                    debug!(token = symbol.as_str(), heuristic, "Token accepted");
                    self.text.push_symbol_at(symbol.clone(), now);
                    outcome.accepted = Some(symbol);
                }
            }
        } else {
            self.stabilizer.interrupt();
        }

        // Only a settled hand with no classifier answer reads as "nothing";
        // a hand in motion is still signing.
        if eligible
            && outcome.classification.is_none()
            && outcome.accepted.is_none()
            && outcome.sentence.is_none()
        {
            outcome.sentence = self.idle_check(now);
        }
        self.emit(&outcome.sentence);
        outcome
    }

    /// Mark idleness and auto-confirm.  Paused text is left alone.
    fn idle_check(&mut self, now: Instant) -> Option<String> {
        if self.paused {
            return None;
        }
        self.text.push_symbol_at(Symbol::Nothing, now);
        self.text.confirm_if_idle()
    }

    fn apply_action(&mut self, action: Action) -> Option<String> {
        info!("{}", action.feedback());
        match action {
            Action::TogglePause => {
                self.paused = !self.paused;
                self.stabilizer.interrupt();
                info!("Token intake {}", if self.paused { "paused" } else { "resumed" });
                None
            }
            Action::ConfirmSentence => self.text.confirm_sentence(),
            Action::UndoLastWord => {
                let removed = self.text.undo_last_word();
                debug!("Undo removed {:?}", removed);
                None
            }
            Action::None => None,
        }
    }

    fn emit(&mut self, sentence: &Option<String>) {
        if let Some(sentence) = sentence {
            self.context.incr(Counter::SentencesConfirmed);
            for sink in self.sinks.iter_mut() {
                sink.on_sentence(sentence);
            }
        }
    }

    /// Generate s-expression of the tracker and debouncer settings.
    pub fn config_sexp(&self) -> String {
        format!(
            "(:motion {} :gesture {})",
            self.motion.config_sexp(),
            self.gestures.config_sexp(),
        )
    }

    /// Generate s-expression for status logging.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:paused {} :window {} :token-held {} :token-cooldown {} :motion {} :gesture {} :classifier {} :text {})",
            flag(self.paused),
            self.window.len(),
            self.stabilizer.held(),
            self.stabilizer.cooldown(),
            self.motion.status_sexp(),
            self.gestures.status_sexp(),
            self.classifier.status_sexp(),
            self.text.snapshot().status_sexp(),
        )
    }
}

// ── Tests ──────────────────────────────────────────────────
