//! Shared runtime counters and fault history.
//!
//! One `RuntimeContext` is built at startup and handed (as an `Arc`) to
//! every component that reports into it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::quality::FrameRate;
use crate::sexp::escape_string;

/// Faults kept for inspection.
pub const FAULT_HISTORY: usize = 100;

// ── Counters ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    FramesReceived,
    FramesProcessed,
    FramesDropped,
    FramesFaulted,
    HandFrames,
    TokensAccepted,
    GesturesConfirmed,
    SentencesConfirmed,
}

const COUNTER_COUNT: usize = 8;

impl Counter {
    pub const ALL: [Counter; COUNTER_COUNT] = [
        Counter::FramesReceived,
        Counter::FramesProcessed,
        Counter::FramesDropped,
        Counter::FramesFaulted,
        Counter::HandFrames,
        Counter::TokensAccepted,
        Counter::GesturesConfirmed,
        Counter::SentencesConfirmed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FramesReceived => "frames-received",
            Self::FramesProcessed => "frames-processed",
            Self::FramesDropped => "frames-dropped",
            Self::FramesFaulted => "frames-faulted",
            Self::HandFrames => "hand-frames",
            Self::TokensAccepted => "tokens-accepted",
            Self::GesturesConfirmed => "gestures-confirmed",
            Self::SentencesConfirmed => "sentences-confirmed",
        }
    }
}

// ── Faults ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FaultRecord {
    pub at: Instant,
    pub severity: Severity,
    pub component: &'static str,
    pub message: String,
}

// ── Context ────────────────────────────────────────────────

pub struct RuntimeContext {
    counters: [AtomicU64; COUNTER_COUNT],
    faults: Mutex<VecDeque<FaultRecord>>,
    frame_rate: Mutex<FrameRate>,
    started: Instant,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            counters: Default::default(),
            faults: Mutex::new(VecDeque::with_capacity(FAULT_HISTORY)),
            frame_rate: Mutex::new(FrameRate::default()),
            started: Instant::now(),
        }
    }
}

impl RuntimeContext {
    pub fn incr(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stamp a processed frame for the frame-rate window.
    pub fn record_frame_time(&self, now: Instant) {
        self.frame_rate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(now);
    }

    /// Current worker frame rate (0 when unmeasured or stale).
    pub fn frame_rate(&self, now: Instant) -> f32 {
        self.frame_rate
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fps_at(now)
    }

    /// Log a fault and keep it in the bounded history.
    pub fn record_fault(&self, severity: Severity, component: &'static str, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Warning => warn!(component, "{}", message),
            Severity::Error => error!(component, "{}", message),
        }
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        faults.push_back(FaultRecord {
            at: Instant::now(),
            severity,
            component,
            message,
        });
        while faults.len() > FAULT_HISTORY {
            faults.pop_front();
        }
    }

    /// Copy of the fault history, oldest first.
    pub fn faults(&self) -> Vec<FaultRecord> {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Fault counts by severity.
    pub fn fault_summary(&self) -> BTreeMap<Severity, usize> {
        let mut summary = BTreeMap::new();
        for fault in self.faults.lock().unwrap_or_else(|e| e.into_inner()).iter() {
            *summary.entry(fault.severity).or_default() += 1;
        }
        summary
    }

    /// Generate s-expression of all counters.
    pub fn status_sexp(&self) -> String {
        let mut parts: Vec<String> = Counter::ALL
            .iter()
            .map(|c| format!(":{} {}", c.as_str(), self.get(*c)))
            .collect();
        parts.push(format!(":fps {:.1}", self.frame_rate(Instant::now())));
        parts.push(format!(":uptime-s {}", self.uptime().as_secs()));
        let last_fault = self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .map(|f| format!("\"{}\"", escape_string(&f.message)))
            .unwrap_or_else(|| "nil".to_string());
        parts.push(format!(":last-fault {}", last_fault));
        format!("({})", parts.join(" "))
    }
}
