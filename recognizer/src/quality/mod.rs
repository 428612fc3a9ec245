//! Adaptive quality control for optional enhancement stages.

pub mod controller;
pub mod metrics;
pub mod stages;

pub use controller::{QualityChange, QualityConfig, QualityController};
pub use metrics::{FrameRate, MetricsSource, ProcessMetrics};
pub use stages::{Stage, StageSwitches, STAGE_COUNT};
