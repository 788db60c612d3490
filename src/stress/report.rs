//! Stress run results, baselines and regression checks

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::sim::metrics::{Backpressure, SimulationMetrics};
use crate::sim::performance::percentile;
use crate::sim::time::GameTime;
use crate::stress::StressError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warn,
    Error,
}

/// One tick that ran over budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressIssue {
    pub tick_id: u64,
    pub duration_ms: f64,
    pub severity: IssueSeverity,
    pub message: String,
}

/// Queue and memory health sampled at a checkpoint tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressCheckpoint {
    pub tick_id: u64,
    pub game_time: GameTime,
    pub tick_duration_ms_p95: f64,
    pub queue_depth: u32,
    pub queue_dropped: u64,
    pub llm_fallback_rate: f64,
    pub backpressure: Backpressure,
    pub healthy: bool,
    pub heap_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl TimingStats {
    /// Index-floor percentiles over every sample; zeros when empty
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Self {
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            avg_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
        }
    }
}

/// Aggregate report for one stress run. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestResults {
    pub profile_name: String,
    pub agent_count: usize,
    pub total_ticks: u64,
    pub checkpoint_every_ticks: u64,
    pub simulated_minutes: u64,
    pub final_game_time: GameTime,
    pub elapsed_ms: f64,
    pub timing: TimingStats,
    /// Every overrun, including those past the issue cap
    pub overrun_count: u64,
    pub issues: Vec<StressIssue>,
    pub checkpoints: Vec<StressCheckpoint>,
    pub unhealthy_checkpoints: u32,
    pub elevated_checkpoints: u32,
    pub peak_heap_bytes: u64,
    pub conversations_completed: u64,
    /// Whether in-flight decisions settled before the final snapshot
    pub settled: bool,
    pub final_metrics: SimulationMetrics,
}

impl StressTestResults {
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .count()
    }
}

/// Reference numbers a later run is compared against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressBaseline {
    pub profile_name: String,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub peak_heap_bytes: u64,
    pub overrun_count: u64,
    pub queue_dropped: u64,
}

impl StressBaseline {
    pub fn from_results(results: &StressTestResults) -> Self {
        Self {
            profile_name: results.profile_name.clone(),
            p95_ms: results.timing.p95_ms,
            p99_ms: results.timing.p99_ms,
            peak_heap_bytes: results.peak_heap_bytes,
            overrun_count: results.overrun_count,
            queue_dropped: results.final_metrics.queue_dropped,
        }
    }

    pub fn load(path: &Path) -> Result<Self, StressError> {
        let text = std::fs::read_to_string(path).map_err(|e| StressError::Baseline {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| StressError::Baseline {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StressError> {
        let to_error = |reason: String| StressError::Baseline {
            path: path.display().to_string(),
            reason,
        };
        let text = serde_json::to_string_pretty(self).map_err(|e| to_error(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| to_error(e.to_string()))
    }
}

/// A metric that exceeded its baseline by more than the tolerance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Regression {
    pub metric: String,
    pub baseline: f64,
    pub actual: f64,
    pub limit: f64,
}

/// Compare a run against a baseline. `tolerance` is a fraction: 0.25 allows
/// each metric to grow by 25% before it is reported.
pub fn detect_regressions(results: &StressTestResults, baseline: &StressBaseline, tolerance: f64) -> Vec<Regression> {
    let tolerance = tolerance.max(0.0);
    let checks = [
        ("p95Ms", baseline.p95_ms, results.timing.p95_ms),
        ("p99Ms", baseline.p99_ms, results.timing.p99_ms),
        ("peakHeapBytes", baseline.peak_heap_bytes as f64, results.peak_heap_bytes as f64),
        ("overrunCount", baseline.overrun_count as f64, results.overrun_count as f64),
        ("queueDropped", baseline.queue_dropped as f64, results.final_metrics.queue_dropped as f64),
    ];

    checks
        .into_iter()
        .filter_map(|(metric, base, actual)| {
            let limit = base * (1.0 + tolerance);
            (actual > limit).then(|| Regression {
                metric: metric.to_string(),
                baseline: base,
                actual,
                limit,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(p95: f64, heap: u64, overruns: u64) -> StressTestResults {
        StressTestResults {
            profile_name: "unit".into(),
            agent_count: 4,
            total_ticks: 10,
            checkpoint_every_ticks: 5,
            simulated_minutes: 10,
            final_game_time: GameTime::from_total_minutes(10),
            elapsed_ms: 1.0,
            timing: TimingStats {
                p95_ms: p95,
                p99_ms: p95,
                ..TimingStats::default()
            },
            overrun_count: overruns,
            issues: Vec::new(),
            checkpoints: Vec::new(),
            unhealthy_checkpoints: 0,
            elevated_checkpoints: 0,
            peak_heap_bytes: heap,
            conversations_completed: 0,
            settled: true,
            final_metrics: SimulationMetrics::default(),
        }
    }

    #[test]
    fn test_timing_stats_index_floor() {
        let stats = TimingStats::from_samples(&[5.0, 1.0, 3.0, 2.0, 4.0]);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 5.0);
        assert_eq!(stats.avg_ms, 3.0);
        // floor(0.5 * 5) = 2, floor(0.95 * 5) = 4
        assert_eq!(stats.p50_ms, 3.0);
        assert_eq!(stats.p95_ms, 5.0);
        assert_eq!(stats.p99_ms, 5.0);

        assert_eq!(TimingStats::from_samples(&[]), TimingStats::default());
    }

    #[test]
    fn test_no_regression_within_tolerance() {
        let base = StressBaseline::from_results(&results(10.0, 1000, 2));
        assert!(detect_regressions(&results(12.0, 1100, 2), &base, 0.25).is_empty());
    }

    #[test]
    fn test_regressions_reported() {
        let base = StressBaseline::from_results(&results(10.0, 1000, 0));
        let found = detect_regressions(&results(20.0, 1000, 3), &base, 0.25);
        let names: Vec<&str> = found.iter().map(|r| r.metric.as_str()).collect();
        assert_eq!(names, vec!["p95Ms", "p99Ms", "overrunCount"]);
        assert_eq!(found[0].limit, 12.5);
    }

    #[test]
    fn test_baseline_file_roundtrip() {
        let path = std::env::temp_dir().join(format!("hamlet-baseline-{}.json", std::process::id()));
        let base = StressBaseline::from_results(&results(7.5, 4096, 1));
        base.save(&path).unwrap();
        assert_eq!(StressBaseline::load(&path).unwrap(), base);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            StressBaseline::load(Path::new("/nonexistent/baseline.json")),
            Err(StressError::Baseline { .. })
        ));
    }

    #[test]
    fn test_results_serialize_camel_case() {
        let value = serde_json::to_value(results(1.0, 1, 0)).unwrap();
        assert!(value["totalTicks"].is_u64());
        assert!(value["timing"]["p95Ms"].is_number());
        assert!(value["peakHeapBytes"].is_u64());
    }
}
