//! Decision service boundary
//!
//! Agents ask an external reasoning service what to do next. The service is
//! reached through [`DecisionProvider`], which returns a boxed future so the
//! orchestrator can spawn it without knowing the concrete client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::sim::constants::activity::{MAX_DURATION, MIN_DURATION};
use crate::sim::map::{LocationId, TilePos, TownMap};
use crate::sim::state::{ActivityKind, AgentId};
use crate::sim::time::GameTime;

/// How a decision request was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Ok,
    Fallback,
    Error,
    Dropped,
}

/// Last decision applied to an agent, exposed to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTrace {
    pub request_id: u64,
    pub tick_id: u64,
    pub outcome: DecisionOutcome,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Context sent to the decision service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub request_id: u64,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub tick_id: u64,
    pub game_time: GameTime,
    pub tile: TilePos,
    pub energy: f32,
    pub hunger: f32,
    pub mood: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_location: Option<String>,
    /// Names of places the agent may choose from
    pub locations: Vec<String>,
}

/// Structured answer from the decision service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub activity: String,
    #[serde(default)]
    pub location: Option<String>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default)]
    pub plan: Vec<String>,
    #[serde(default)]
    pub reflection: Option<String>,
}

/// Response checked against the map and duration bounds
#[derive(Debug, Clone, PartialEq)]
pub struct ValidDecision {
    pub kind: ActivityKind,
    pub location: Option<LocationId>,
    pub duration_minutes: u32,
    pub plan: Vec<String>,
    pub reflection: Option<String>,
}

impl DecisionResponse {
    /// Resolve names against the map. `home` stands in for the agent's own home.
    pub fn validate(&self, map: &TownMap, home: LocationId) -> Result<ValidDecision, String> {
        let kind = ActivityKind::parse(&self.activity)
            .ok_or_else(|| format!("unknown activity '{}'", self.activity))?;

        if !(MIN_DURATION..=MAX_DURATION).contains(&self.duration_minutes) {
            return Err(format!(
                "duration {} outside {}..={}",
                self.duration_minutes, MIN_DURATION, MAX_DURATION
            ));
        }

        let location = match (&self.location, kind.venue()) {
            (_, None) => None,
            (_, Some(crate::sim::map::LocationKind::Home)) => Some(home),
            (Some(name), Some(venue)) => {
                let loc = map
                    .locations()
                    .iter()
                    .find(|l| l.name.eq_ignore_ascii_case(name.trim()))
                    .ok_or_else(|| format!("unknown location '{}'", name))?;
                if loc.kind != venue {
                    return Err(format!("cannot {} at {}", kind.as_str(), loc.name));
                }
                Some(loc.id)
            }
            (None, Some(venue)) => Some(
                map.first_of_kind(venue)
                    .map(|l| l.id)
                    .ok_or_else(|| format!("no {:?} on map", venue))?,
            ),
        };

        Ok(ValidDecision {
            kind,
            location,
            duration_minutes: self.duration_minutes,
            plan: self.goal.iter().chain(self.plan.iter()).take(5).cloned().collect(),
            reflection: self.reflection.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    #[error("Decision request timed out")]
    Timeout,
    #[error("Decision provider failed: {0}")]
    Provider(String),
    #[error("No async runtime available to dispatch decision")]
    NoRuntime,
}

pub type DecisionFuture = Pin<Box<dyn Future<Output = Result<DecisionResponse, DecisionError>> + Send>>;

/// Black-box "decide next action" capability
pub trait DecisionProvider: Send + Sync {
    fn decide(&self, request: DecisionRequest) -> DecisionFuture;

    fn name(&self) -> &str {
        "provider"
    }
}

/// Local stand-in for the reasoning service
///
/// Picks an activity from the agent's needs after a synthetic delay. Each
/// request gets its own generator seeded from `seed` and the request id, so
/// answers do not depend on completion order.
#[derive(Debug, Clone)]
pub struct HeuristicDecisionProvider {
    pub seed: u64,
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Probability of a provider error
    pub failure_rate: f64,
}

impl HeuristicDecisionProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            min_latency: Duration::from_millis(5),
            max_latency: Duration::from_millis(40),
            failure_rate: 0.02,
        }
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max.max(min);
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn choose(request: &DecisionRequest, rng: &mut StdRng) -> DecisionResponse {
        let (activity, duration) = if request.energy < 0.3 {
            (ActivityKind::Sleep, 120)
        } else if request.hunger > 0.6 {
            (ActivityKind::Eat, 30)
        } else {
            let options = [
                (ActivityKind::Work, 90),
                (ActivityKind::Read, 45),
                (ActivityKind::Relax, 40),
                (ActivityKind::Shop, 20),
                (ActivityKind::Socialize, 30),
            ];
            options[rng.gen_range(0..options.len())]
        };
        DecisionResponse {
            activity: activity.as_str().to_string(),
            location: None,
            duration_minutes: duration,
            goal: None,
            plan: vec![format!("{} for a while", activity.as_str())],
            reflection: if rng.gen_bool(0.2) {
                Some(format!("{} feels {}", request.agent_name, mood_word(request.mood)))
            } else {
                None
            },
        }
    }
}

fn mood_word(mood: f32) -> &'static str {
    if mood > 0.7 {
        "cheerful"
    } else if mood > 0.4 {
        "content"
    } else {
        "restless"
    }
}

impl DecisionProvider for HeuristicDecisionProvider {
    fn decide(&self, request: DecisionRequest) -> DecisionFuture {
        let mut rng = StdRng::seed_from_u64(self.seed ^ request.request_id.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let span = self.max_latency.saturating_sub(self.min_latency);
        let delay = self.min_latency + span.mul_f64(rng.gen::<f64>());
        let fail = self.failure_rate > 0.0 && rng.gen::<f64>() < self.failure_rate;
        let response = Self::choose(&request, &mut rng);

        Box::pin(async move {
            tokio::time::sleep(delay).await;
            if fail {
                Err(DecisionError::Provider("synthetic failure".into()))
            } else {
                Ok(response)
            }
        })
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
