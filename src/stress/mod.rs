//! Load-validation harness
//!
//! Runs a fresh simulation for a simulated span as fast as it will go and
//! reports tick timing, overruns, queue health and memory.

pub mod harness;
pub mod report;

use crate::config::{parse_bool, parse_var};
use crate::sim::constants::{tick, time};

pub use harness::run_stress_test;
pub use report::{
    detect_regressions, IssueSeverity, Regression, StressBaseline, StressCheckpoint, StressIssue,
    StressTestResults, TimingStats,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StressError {
    #[error("durationDays must be positive, got {0}")]
    InvalidDuration(f64),
    #[error("agentCount must be a positive integer")]
    InvalidAgentCount,
    #[error("checkpointIntervalMinutes must be positive, got {0}")]
    InvalidCheckpointInterval(f64),
    #[error("overrunBudgetMs must be positive, got {0}")]
    InvalidOverrunBudget(f64),
    #[error("minutesPerTick must be at least 1")]
    InvalidMinutesPerTick,
    #[error("Baseline {path}: {reason}")]
    Baseline { path: String, reason: String },
}

const DEFAULT_REGRESSION_TOLERANCE: f64 = 0.25;

#[derive(Debug, Clone, PartialEq)]
pub struct StressProfile {
    pub profile_name: String,
    pub duration_days: f64,
    pub agent_count: usize,
    pub seed: u64,
    pub llm_enabled: bool,
    pub checkpoint_interval_minutes: f64,
    pub overrun_budget_ms: f64,
    /// Cap on stored issues; overruns past it are still counted
    pub max_recorded_issues: usize,
    pub minutes_per_tick: u32,
    /// Allowed growth per metric against a baseline, as a fraction
    pub regression_tolerance: f64,
}

impl Default for StressProfile {
    fn default() -> Self {
        Self {
            profile_name: "default".to_string(),
            duration_days: 1.0,
            agent_count: 12,
            seed: 1,
            llm_enabled: false,
            checkpoint_interval_minutes: 60.0,
            overrun_budget_ms: tick::DEFAULT_INTERVAL_MS as f64,
            max_recorded_issues: 100,
            minutes_per_tick: time::DEFAULT_MINUTES_PER_TICK,
            regression_tolerance: DEFAULT_REGRESSION_TOLERANCE,
        }
    }
}

impl StressProfile {
    /// Read `STRESS_*` variables over the defaults. Values are not range
    /// checked here; [`StressProfile::validate`] reports them.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<L: Fn(&str) -> Option<String>>(lookup: L) -> Self {
        let mut profile = Self::default();

        if let Some(name) = lookup("STRESS_PROFILE").filter(|n| !n.is_empty()) {
            profile.profile_name = name;
        }
        if let Some(v) = parse_var(&lookup, "STRESS_DURATION_DAYS", |_: &f64| true, "a number") {
            profile.duration_days = v;
        }
        if let Some(v) = parse_var(&lookup, "STRESS_AGENT_COUNT", |_: &usize| true, "an integer") {
            profile.agent_count = v;
        }
        if let Some(v) = parse_var(&lookup, "STRESS_SEED", |_: &u64| true, "an unsigned integer") {
            profile.seed = v;
        }
        if let Some(v) = parse_bool(&lookup, "STRESS_LLM_ENABLED") {
            profile.llm_enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "STRESS_CHECKPOINT_MINUTES", |_: &f64| true, "a number") {
            profile.checkpoint_interval_minutes = v;
        }
        if let Some(v) = parse_var(&lookup, "STRESS_OVERRUN_BUDGET_MS", |_: &f64| true, "a number") {
            profile.overrun_budget_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "STRESS_MAX_ISSUES", |_: &usize| true, "an integer") {
            profile.max_recorded_issues = v;
        }
        if let Some(v) = parse_var(&lookup, "STRESS_MINUTES_PER_TICK", |_: &u32| true, "an integer") {
            profile.minutes_per_tick = v;
        }
        if let Some(v) = parse_var(
            &lookup,
            "STRESS_TOLERANCE",
            |t: &f64| t.is_finite() && *t >= 0.0,
            "a non-negative number",
        ) {
            profile.regression_tolerance = v;
        }

        profile
    }

    pub fn validate(&self) -> Result<(), StressError> {
        if !(self.duration_days.is_finite() && self.duration_days > 0.0) {
            return Err(StressError::InvalidDuration(self.duration_days));
        }
        if self.agent_count == 0 {
            return Err(StressError::InvalidAgentCount);
        }
        if !(self.checkpoint_interval_minutes.is_finite() && self.checkpoint_interval_minutes > 0.0) {
            return Err(StressError::InvalidCheckpointInterval(self.checkpoint_interval_minutes));
        }
        if !(self.overrun_budget_ms.is_finite() && self.overrun_budget_ms > 0.0) {
            return Err(StressError::InvalidOverrunBudget(self.overrun_budget_ms));
        }
        if self.minutes_per_tick == 0 {
            return Err(StressError::InvalidMinutesPerTick);
        }
        Ok(())
    }

    /// `max(1, floor(days * 1440 / minutes_per_tick))`
    pub fn total_ticks(&self) -> u64 {
        let minutes = self.duration_days * time::MINUTES_PER_DAY as f64;
        ((minutes / self.minutes_per_tick.max(1) as f64).floor() as u64).max(1)
    }

    /// `max(1, floor(interval / minutes_per_tick))`
    pub fn checkpoint_every_ticks(&self) -> u64 {
        ((self.checkpoint_interval_minutes / self.minutes_per_tick.max(1) as f64).floor() as u64).max(1)
    }
}
