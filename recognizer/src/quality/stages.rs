//! Optional enhancement stages and their shared on/off switches.
//!
//! The frame worker reads a switch before entering each optional stage;
//! the quality controller flips them from its own thread.  The four core
//! stages (motion, gesture, classification, text) have no switch.

use std::sync::Mutex;

use crate::sexp::flag;

/// Optional enhancement stages, most expensive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    BackgroundBlur,
    FaceFocus,
    LightingAdjustment,
}

/// Number of optional stages.
pub const STAGE_COUNT: usize = 3;

impl Stage {
    /// Disable order under load.  Restoration runs in reverse.
    pub const PRIORITY: [Stage; STAGE_COUNT] = [
        Stage::BackgroundBlur,
        Stage::FaceFocus,
        Stage::LightingAdjustment,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackgroundBlur => "background-blur",
            Self::FaceFocus => "face-focus",
            Self::LightingAdjustment => "lighting",
        }
    }
}

/// Lock-protected enable flags, one per optional stage.
#[derive(Debug)]
pub struct StageSwitches {
    flags: Mutex<[bool; STAGE_COUNT]>,
}

impl Default for StageSwitches {
    fn default() -> Self {
        Self::new([true; STAGE_COUNT])
    }
}

impl StageSwitches {
    /// Initial flags indexed by `Stage::index()`.
    pub fn new(enabled: [bool; STAGE_COUNT]) -> Self {
        Self {
            flags: Mutex::new(enabled),
        }
    }

    fn with_flags<R>(&self, f: impl FnOnce(&mut [bool; STAGE_COUNT]) -> R) -> R {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut flags)
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.with_flags(|flags| flags[stage.index()])
    }

    /// Set a flag and return its previous value.
    pub fn set(&self, stage: Stage, enabled: bool) -> bool {
        self.with_flags(|flags| std::mem::replace(&mut flags[stage.index()], enabled))
    }

    pub fn snapshot(&self) -> [bool; STAGE_COUNT] {
        self.with_flags(|flags| *flags)
    }

    /// Generate s-expression of every stage flag.
    pub fn status_sexp(&self) -> String {
        let flags = self.snapshot();
        let parts: Vec<String> = Stage::PRIORITY
            .iter()
            .map(|s| format!(":{} {}", s.as_str(), flag(flags[s.index()])))
            .collect();
        format!("({})", parts.join(" "))
    }
}
