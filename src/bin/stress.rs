//! Stress harness entry point
//!
//! Reads the profile from `STRESS_*` variables, prints the results as JSON and
//! exits non-zero when a baseline is given and the run regresses against it.
//!
//! - `STRESS_BASELINE`: baseline JSON to compare against
//! - `STRESS_TOLERANCE`: allowed growth per metric as a fraction (default 0.25)
//! - `STRESS_WRITE_BASELINE`: write this run's baseline to the given path

use std::path::PathBuf;

use tracing::{error, info, warn};

use hamlet_server::logging;
use hamlet_server::stress::{detect_regressions, run_stress_test, StressBaseline, StressProfile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _logs = logging::init_logging(100);

    let profile = StressProfile::from_env();
    if let Err(e) = profile.validate() {
        error!("Invalid stress profile: {}", e);
        anyhow::bail!("invalid stress profile: {}", e);
    }

    let results = run_stress_test(&profile, None).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);

    if let Some(path) = std::env::var("STRESS_WRITE_BASELINE").ok().map(PathBuf::from) {
        StressBaseline::from_results(&results).save(&path)?;
        info!("Baseline written to {}", path.display());
    }

    let Some(path) = std::env::var("STRESS_BASELINE").ok().map(PathBuf::from) else {
        return Ok(());
    };
    let tolerance = profile.regression_tolerance;

    let baseline = StressBaseline::load(&path)?;
    let regressions = detect_regressions(&results, &baseline, tolerance);
    if regressions.is_empty() {
        info!("No regressions against {} (tolerance {:.0}%)", path.display(), tolerance * 100.0);
        return Ok(());
    }

    for r in &regressions {
        warn!(
            "Regression in {}: {:.3} > {:.3} (baseline {:.3})",
            r.metric, r.actual, r.limit, r.baseline
        );
    }
    anyhow::bail!("{} metric(s) regressed against {}", regressions.len(), path.display())
}
