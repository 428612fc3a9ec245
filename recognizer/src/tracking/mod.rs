//! Per-frame hand tracking: motion state and control gestures.
//!
//! The motion tracker runs first on every frame; its state gates the
//! gesture debouncer so poses caught mid-transition never fire.

pub mod gesture;
pub mod motion;

pub use gesture::{Action, ControlGesture, GestureConfig, GestureDebouncer, GestureEvent};
pub use motion::{MotionConfig, MotionSnapshot, MotionTracker};
