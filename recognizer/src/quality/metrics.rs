//! Load and throughput measurement for the quality controller.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::context::RuntimeContext;

/// One controller input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerformanceSample {
    pub cpu_percent: f32,
    /// 0 when no frame rate could be measured.
    pub frames_per_second: f32,
}

/// Anything that can report current load.
pub trait MetricsSource: Send {
    fn sample(&mut self) -> PerformanceSample;
}

// ── Frame rate ─────────────────────────────────────────────

/// Rolling frame rate from the intervals between processed frames.
#[derive(Debug)]
pub struct FrameRate {
    intervals: VecDeque<f64>,
    window_size: usize,
    last: Option<Instant>,
    /// A reading older than this is reported as 0 (unmeasured).
    stale_after: Duration,
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(2))
    }
}

impl FrameRate {
    pub fn new(window_size: usize, stale_after: Duration) -> Self {
        Self {
            intervals: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            last: None,
            stale_after,
        }
    }

    /// Stamp a processed frame.
    pub fn record(&mut self, now: Instant) {
        if let Some(prev) = self.last {
            let dt = now.saturating_duration_since(prev).as_secs_f64().max(1e-6);
            self.intervals.push_back(dt);
            if self.intervals.len() > self.window_size {
                self.intervals.pop_front();
            }
        }
        self.last = Some(now);
    }

    /// Frames per second over the window as seen at `now`.
    pub fn fps_at(&self, now: Instant) -> f32 {
        let Some(last) = self.last else {
            return 0.0;
        };
        if self.intervals.is_empty() || now.saturating_duration_since(last) > self.stale_after {
            return 0.0;
        }
        let avg = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        if avg <= 0.0 {
            0.0
        } else {
            (1.0 / avg) as f32
        }
    }
}

// ── Process metrics ────────────────────────────────────────

/// CPU share of this process (across all cores) and the worker frame rate.
pub struct ProcessMetrics {
    context: Arc<RuntimeContext>,
    system: System,
    pid: Pid,
    cores: f32,
}

impl ProcessMetrics {
    pub fn new(context: Arc<RuntimeContext>) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f32;
        Self {
            context,
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
            cores,
        }
    }

    /// Process CPU since the previous refresh, scaled to 0..100 over all
    /// cores.  The first reading has no baseline and reports 0.
    fn cpu_percent(&mut self) -> f32 {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        match self.system.process(self.pid) {
            Some(process) => (process.cpu_usage() / self.cores).clamp(0.0, 100.0),
            None => 0.0,
        }
    }
}

impl MetricsSource for ProcessMetrics {
    fn sample(&mut self) -> PerformanceSample {
        let cpu_percent = self.cpu_percent();
        PerformanceSample {
            cpu_percent,
            frames_per_second: self.context.frame_rate(Instant::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_empty() {
        let fr = FrameRate::default();
        assert_eq!(fr.fps_at(Instant::now()), 0.0);
    }

    #[test]
    fn test_frame_rate_steady() {
        let mut fr = FrameRate::default();
        let t0 = Instant::now();
        for i in 0..11 {
            fr.record(t0 + Duration::from_millis(40 * i));
        }
        let fps = fr.fps_at(t0 + Duration::from_millis(400));
        assert!((fps - 25.0).abs() < 0.01, "fps {}", fps);
    }

    #[test]
    fn test_frame_rate_window_trim() {
        let mut fr = FrameRate::new(5, Duration::from_secs(2));
        let t0 = Instant::now();
        for i in 0..10 {
            fr.record(t0 + Duration::from_millis(100 * i));
        }
        // Faster frames push the slow ones out of the window.
        let mut t = t0 + Duration::from_millis(900);
        for _ in 0..5 {
            t += Duration::from_millis(50);
            fr.record(t);
        }
        assert_eq!(fr.intervals.len(), 5);
        assert!((fr.fps_at(t) - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_frame_rate_stale() {
        let mut fr = FrameRate::default();
        let t0 = Instant::now();
        fr.record(t0);
        fr.record(t0 + Duration::from_millis(50));
        assert!(fr.fps_at(t0 + Duration::from_millis(100)) > 0.0);
        assert_eq!(fr.fps_at(t0 + Duration::from_secs(10)), 0.0);
    }

    #[test]
    fn test_process_metrics_bounded() {
        let context = Arc::new(RuntimeContext::default());
        let mut metrics = ProcessMetrics::new(context);
        let first = metrics.sample();
        assert_eq!(first.frames_per_second, 0.0);
        // Burn a little CPU between readings.
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_add(i * i);
        }
        assert!(acc > 0);
        std::thread::sleep(Duration::from_millis(250));
        let second = metrics.sample();
        assert!(
            (0.0..=100.0).contains(&second.cpu_percent),
            "cpu {}",
            second.cpu_percent
        );
    }

    #[test]
    fn test_process_metrics_reports_worker_fps() {
        let context = Arc::new(RuntimeContext::default());
        let now = Instant::now();
        for i in 0..5 {
            context.record_frame_time(now + Duration::from_millis(50 * i));
        }
        let mut metrics = ProcessMetrics::new(Arc::clone(&context));
        // Frames were stamped at most ~200ms ahead; still fresh.
        let fps = metrics.sample().frames_per_second;
        assert!(fps > 0.0, "fps {}", fps);
    }
}
