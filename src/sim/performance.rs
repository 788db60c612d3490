//! Tick duration tracking
//!
//! Keeps a rolling window of tick durations and derives:
//! - P50/P95/P99 for the metrics attached to every state event
//! - A coarse status relative to the tick interval budget, used by the
//!   server loop to log sustained overload

use std::collections::VecDeque;
use std::time::Duration;

use crate::sim::constants::tick::DURATION_SAMPLE_WINDOW;

/// Index-floor percentile over an ascending slice.
///
/// Returns `sorted[min(floor(p / 100 * n), n - 1)]`, or 0 for an empty slice.
/// No interpolation; stress baselines are calibrated against this exact rule.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * sorted.len() as f64).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Load relative to the tick budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickLoadStatus {
    /// Average tick uses < 30% of the interval
    Excellent,
    Good,
    /// Average tick uses > 70% of the interval
    Warning,
    /// Average tick exceeds the interval; ticks will be lost to catch-up capping
    Overloaded,
}

impl TickLoadStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, TickLoadStatus::Warning | TickLoadStatus::Overloaded)
    }
}

/// Rolling tick duration window
#[derive(Debug, Clone)]
pub struct TickDurationTracker {
    samples: VecDeque<f64>,
    max_samples: usize,
    budget_ms: f64,
    status: TickLoadStatus,
}

impl TickDurationTracker {
    pub fn new(budget: Duration) -> Self {
        Self::with_window(budget, DURATION_SAMPLE_WINDOW)
    }

    pub fn with_window(budget: Duration, max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
            budget_ms: budget.as_secs_f64() * 1000.0,
            status: TickLoadStatus::Excellent,
        }
    }

    /// Record one tick's wall-clock duration
    pub fn record(&mut self, duration: Duration) {
        self.record_ms(duration.as_secs_f64() * 1000.0);
    }

    pub fn record_ms(&mut self, ms: f64) {
        self.samples.push_back(ms.max(0.0));
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        self.update_status();
    }

    fn update_status(&mut self) {
        if self.samples.len() < 10 || self.budget_ms <= 0.0 {
            return;
        }
        let ratio = self.average_ms() / self.budget_ms;
        self.status = if ratio < 0.3 {
            TickLoadStatus::Excellent
        } else if ratio < 0.7 {
            TickLoadStatus::Good
        } else if ratio < 1.0 {
            TickLoadStatus::Warning
        } else {
            TickLoadStatus::Overloaded
        };
    }

    pub fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// (P50, P95, P99) over the current window
    pub fn percentiles(&self) -> (f64, f64, f64) {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        (
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn status(&self) -> TickLoadStatus {
        self.status
    }

    pub fn budget_usage_percent(&self) -> f64 {
        if self.budget_ms <= 0.0 {
            return 0.0;
        }
        self.average_ms() / self.budget_ms * 100.0
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% of {:.0}ms budget",
            self.status,
            self.budget_usage_percent(),
            self.budget_ms
        )
    }
}
