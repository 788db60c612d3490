//! Per-tick simulation metrics attached to state events

use serde::{Deserialize, Serialize};

/// Health classification of the decision request queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    #[default]
    Normal,
    Elevated,
    Critical,
}

impl Backpressure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backpressure::Normal => "normal",
            Backpressure::Elevated => "elevated",
            Backpressure::Critical => "critical",
        }
    }

    /// Numeric level for gauges (0 = normal, 2 = critical)
    pub fn level(&self) -> u8 {
        match self {
            Backpressure::Normal => 0,
            Backpressure::Elevated => 1,
            Backpressure::Critical => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    #[error("{field} must be a fraction in [0, 1], got {value}")]
    RateOutOfRange { field: &'static str, value: String },
    #[error("{field} must be non-negative and finite")]
    Negative { field: &'static str },
    #[error("tick duration percentiles must satisfy p50 <= p95 <= p99")]
    PercentileOrder,
}

/// Timing and queue health for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SimulationMetrics {
    pub tick_duration_ms_p50: f64,
    pub tick_duration_ms_p95: f64,
    pub tick_duration_ms_p99: f64,
    pub queue_depth: u32,
    pub queue_dropped: u64,
    pub llm_fallback_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_queue_max_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_queue_avg_wait_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_queue_avg_process_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_queue_backpressure: Option<Backpressure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_queue_healthy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_cache_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_cache_hit_rate: Option<f64>,
}

fn check_rate(field: &'static str, value: f64) -> Result<(), MetricsError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MetricsError::RateOutOfRange {
            field,
            value: value.to_string(),
        })
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), MetricsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(MetricsError::Negative { field })
    }
}

impl SimulationMetrics {
    pub fn validate(&self) -> Result<(), MetricsError> {
        check_non_negative("tickDurationMsP50", self.tick_duration_ms_p50)?;
        check_non_negative("tickDurationMsP95", self.tick_duration_ms_p95)?;
        check_non_negative("tickDurationMsP99", self.tick_duration_ms_p99)?;
        if self.tick_duration_ms_p50 > self.tick_duration_ms_p95
            || self.tick_duration_ms_p95 > self.tick_duration_ms_p99
        {
            return Err(MetricsError::PercentileOrder);
        }
        check_rate("llmFallbackRate", self.llm_fallback_rate)?;
        if let Some(rate) = self.path_cache_hit_rate {
            check_rate("pathCacheHitRate", rate)?;
        }
        if let Some(wait) = self.llm_queue_avg_wait_ms {
            check_non_negative("llmQueueAvgWaitMs", wait)?;
        }
        if let Some(process) = self.llm_queue_avg_process_ms {
            check_non_negative("llmQueueAvgProcessMs", process)?;
        }
        Ok(())
    }

    /// Queue is healthy unless explicitly reported otherwise
    pub fn is_healthy(&self) -> bool {
        self.llm_queue_healthy.unwrap_or(true)
    }

    pub fn backpressure(&self) -> Backpressure {
        self.llm_queue_backpressure.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SimulationMetrics {
        SimulationMetrics {
            tick_duration_ms_p50: 1.0,
            tick_duration_ms_p95: 2.0,
            tick_duration_ms_p99: 3.0,
            queue_depth: 4,
            queue_dropped: 1,
            llm_fallback_rate: 0.25,
            llm_queue_max_depth: Some(8),
            llm_queue_avg_wait_ms: Some(12.5),
            llm_queue_avg_process_ms: Some(40.0),
            llm_queue_backpressure: Some(Backpressure::Elevated),
            llm_queue_healthy: Some(false),
            path_cache_size: Some(10),
            path_cache_hit_rate: Some(0.5),
        }
    }

    #[test]
    fn test_valid_metrics() {
        assert!(sample().validate().is_ok());
        assert!(SimulationMetrics::default().validate().is_ok());
    }

    #[test]
    fn test_rate_out_of_range() {
        let mut m = sample();
        m.llm_fallback_rate = 1.5;
        assert!(matches!(m.validate(), Err(MetricsError::RateOutOfRange { .. })));

        let mut m = sample();
        m.path_cache_hit_rate = Some(-0.1);
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_percentile_order() {
        let mut m = sample();
        m.tick_duration_ms_p95 = 0.5;
        assert_eq!(m.validate(), Err(MetricsError::PercentileOrder));
    }

    #[test]
    fn test_nan_rejected() {
        let mut m = sample();
        m.tick_duration_ms_p50 = f64::NAN;
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["tickDurationMsP95"], 2.0);
        assert_eq!(json["llmQueueBackpressure"], "elevated");
        assert_eq!(json["llmQueueHealthy"], false);

        let bare = serde_json::to_value(SimulationMetrics::default()).unwrap();
        assert!(bare.get("llmQueueBackpressure").is_none());
        assert!(bare.get("pathCacheSize").is_none());
    }

    #[test]
    fn test_defaults_when_absent() {
        let m = SimulationMetrics::default();
        assert!(m.is_healthy());
        assert_eq!(m.backpressure(), Backpressure::Normal);
    }
}
