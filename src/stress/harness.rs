use std::sync::Arc;
use std::time::{Duration, Instant};

use memory_stats::memory_stats;
use tracing::{debug, info, warn};

use crate::sim::decision::DecisionProvider;
use crate::sim::orchestrator::{OrchestratorConfig, SimulationOrchestrator};
use crate::stress::report::{IssueSeverity, StressCheckpoint, StressIssue, StressTestResults, TimingStats};
use crate::stress::{StressError, StressProfile};

/// How long the harness waits for in-flight decisions after the last tick
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Overruns beyond this multiple of the budget are errors, not warnings
const ERROR_OVERRUN_FACTOR: f64 = 1.5;

/// Process resident memory, or the world estimate if that is larger or the
/// platform cannot report it
fn sample_heap(sim: &SimulationOrchestrator) -> u64 {
    let estimate = sim.estimated_heap_bytes() as u64;
    memory_stats()
        .map(|stats| stats.physical_mem as u64)
        .unwrap_or(0)
        .max(estimate)
}

/// `None` within budget; `Error` past 1.5x the budget, `Warn` otherwise
fn overrun_severity(ms: f64, budget_ms: f64) -> Option<IssueSeverity> {
    if ms <= budget_ms {
        None
    } else if ms > budget_ms * ERROR_OVERRUN_FACTOR {
        Some(IssueSeverity::Error)
    } else {
        Some(IssueSeverity::Warn)
    }
}

/// Run `profile` against a fresh orchestrator.
///
/// With decisions enabled and no `provider`, the local heuristic stands in
/// and synthesizes service latency. Ticks run back to back; a tick counts as
/// an overrun when it takes longer than `overrun_budget_ms`.
pub async fn run_stress_test(
    profile: &StressProfile,
    provider: Option<Arc<dyn DecisionProvider>>,
) -> Result<StressTestResults, StressError> {
    profile.validate()?;

    let total_ticks = profile.total_ticks();
    let checkpoint_every = profile.checkpoint_every_ticks();
    let budget_ms = profile.overrun_budget_ms;

    let config = OrchestratorConfig {
        seed: profile.seed,
        agent_count: profile.agent_count,
        minutes_per_tick: profile.minutes_per_tick,
        llm_enabled: profile.llm_enabled,
        tick_budget: Duration::from_secs_f64(budget_ms / 1000.0),
        ..OrchestratorConfig::default()
    };
    let mut sim = match provider {
        Some(provider) if profile.llm_enabled => SimulationOrchestrator::with_provider(config, provider),
        _ => SimulationOrchestrator::new(config),
    };

    info!(
        profile = %profile.profile_name,
        total_ticks,
        checkpoint_every,
        agents = profile.agent_count,
        seed = profile.seed,
        "Stress run starting"
    );

    let started = Instant::now();
    let mut durations = Vec::with_capacity(total_ticks.min(1 << 20) as usize);
    let mut issues = Vec::new();
    let mut overrun_count = 0u64;
    let mut checkpoints = Vec::new();
    let mut unhealthy_checkpoints = 0u32;
    let mut elevated_checkpoints = 0u32;
    let mut peak_heap_bytes = sample_heap(&sim);

    for tick_id in 1..=total_ticks {
        let tick_started = Instant::now();
        sim.tick(tick_id);
        let ms = tick_started.elapsed().as_secs_f64() * 1000.0;
        durations.push(ms);

        if let Some(severity) = overrun_severity(ms, budget_ms) {
            overrun_count += 1;
            if issues.len() < profile.max_recorded_issues {
                issues.push(StressIssue {
                    tick_id,
                    duration_ms: ms,
                    severity,
                    message: format!("Tick {} took {:.2}ms (budget {:.2}ms)", tick_id, ms, budget_ms),
                });
            }
        }

        if tick_id % checkpoint_every == 0 || tick_id == total_ticks {
            // Read-only projection; nothing is broadcast
            let delta = sim.create_delta_event(tick_id);
            let metrics = delta.metrics.unwrap_or_default();
            let heap_bytes = sample_heap(&sim);
            peak_heap_bytes = peak_heap_bytes.max(heap_bytes);

            let backpressure = metrics.backpressure();
            let healthy = metrics.is_healthy();
            if !healthy {
                unhealthy_checkpoints += 1;
            }
            if backpressure.level() > 0 {
                elevated_checkpoints += 1;
            }
            debug!(
                tick_id,
                game_time = %delta.game_time.label(),
                queue_depth = metrics.queue_depth,
                backpressure = backpressure.as_str(),
                heap_bytes,
                "Stress checkpoint"
            );

            checkpoints.push(StressCheckpoint {
                tick_id,
                game_time: delta.game_time,
                tick_duration_ms_p95: metrics.tick_duration_ms_p95,
                queue_depth: metrics.queue_depth,
                queue_dropped: metrics.queue_dropped,
                llm_fallback_rate: metrics.llm_fallback_rate,
                backpressure,
                healthy,
                heap_bytes,
            });

            // Let decision tasks on this runtime make progress
            tokio::task::yield_now().await;
        }
    }

    let settled = sim.wait_for_idle(SETTLE_TIMEOUT).await;
    let snapshot = sim.create_snapshot_event(sim.last_tick_id());
    let final_metrics = snapshot.metrics.unwrap_or_default();
    peak_heap_bytes = peak_heap_bytes.max(sample_heap(&sim));

    let results = StressTestResults {
        profile_name: profile.profile_name.clone(),
        agent_count: profile.agent_count,
        total_ticks,
        checkpoint_every_ticks: checkpoint_every,
        simulated_minutes: snapshot.game_time.total_minutes,
        final_game_time: snapshot.game_time,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        timing: TimingStats::from_samples(&durations),
        overrun_count,
        issues,
        checkpoints,
        unhealthy_checkpoints,
        elevated_checkpoints,
        peak_heap_bytes,
        conversations_completed: sim.conversations_completed(),
        settled,
        final_metrics,
    };

    if results.error_count() > 0 {
        warn!(
            errors = results.error_count(),
            overruns = overrun_count,
            "Stress run had ticks far over budget"
        );
    }
    info!(
        profile = %results.profile_name,
        ticks = total_ticks,
        p95_ms = results.timing.p95_ms,
        peak_heap_bytes,
        elapsed_ms = results.elapsed_ms,
        "Stress run complete"
    );

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::decision::HeuristicDecisionProvider;

    fn small_profile() -> StressProfile {
        StressProfile {
            profile_name: "small".into(),
            duration_days: 0.02,
            agent_count: 8,
            seed: 7,
            llm_enabled: false,
            ..StressProfile::default()
        }
    }

    #[tokio::test]
    async fn test_small_run_completes() {
        let results = run_stress_test(&small_profile(), None).await.unwrap();

        assert!(results.total_ticks > 0);
        assert_eq!(results.total_ticks, 28);
        assert!(results.timing.p95_ms >= 0.0);
        assert!(results.peak_heap_bytes > 0);
        assert!(!results.checkpoints.is_empty());
        assert_eq!(results.checkpoints.last().unwrap().tick_id, results.total_ticks);
        assert_eq!(results.final_metrics.queue_depth, 0);
        assert!(results.final_metrics.llm_fallback_rate >= 0.0);
        assert_eq!(results.simulated_minutes, 28);
        assert!(results.settled);
    }

    #[tokio::test]
    async fn test_invalid_profile_runs_nothing() {
        let profile = StressProfile {
            agent_count: 0,
            ..small_profile()
        };
        assert_eq!(
            run_stress_test(&profile, None).await.err(),
            Some(StressError::InvalidAgentCount)
        );
    }

    #[tokio::test]
    async fn test_issue_cap_keeps_counting() {
        let profile = StressProfile {
            overrun_budget_ms: 1e-9,
            max_recorded_issues: 3,
            ..small_profile()
        };
        let results = run_stress_test(&profile, None).await.unwrap();

        assert_eq!(results.issues.len(), 3);
        assert_eq!(results.overrun_count, results.total_ticks);
        assert!(results.issues.iter().all(|i| i.severity == IssueSeverity::Error));
    }

    #[test]
    fn test_overrun_severity_thresholds() {
        let budget = 200.0;
        assert_eq!(overrun_severity(150.0, budget), None);
        assert_eq!(overrun_severity(200.0, budget), None);
        assert_eq!(overrun_severity(240.0, budget), Some(IssueSeverity::Warn));
        assert_eq!(overrun_severity(300.0, budget), Some(IssueSeverity::Warn));
        assert_eq!(overrun_severity(320.0, budget), Some(IssueSeverity::Error));
    }

    #[tokio::test]
    async fn test_checkpoint_cadence() {
        let profile = StressProfile {
            checkpoint_interval_minutes: 10.0,
            ..small_profile()
        };
        let results = run_stress_test(&profile, None).await.unwrap();
        let ticks: Vec<u64> = results.checkpoints.iter().map(|c| c.tick_id).collect();
        assert_eq!(ticks, vec![10, 20, 28]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_injected_provider_settles() {
        let provider = HeuristicDecisionProvider::new(7)
            .with_latency(Duration::from_millis(1), Duration::from_millis(2))
            .with_failure_rate(0.0);
        let profile = StressProfile {
            llm_enabled: true,
            ..small_profile()
        };
        let results = run_stress_test(&profile, Some(Arc::new(provider))).await.unwrap();

        assert!(results.settled);
        assert!(results.final_metrics.llm_queue_backpressure.is_some());
        assert!(results.final_metrics.validate().is_ok());
    }
}
