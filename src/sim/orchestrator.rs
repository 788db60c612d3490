//! Simulation orchestrator
//!
//! Single owner of world state. `tick` advances the world exactly once per new
//! tick id; everything a viewer sees is a projection of the state left by the
//! last completed tick.
//!
//! Running tick order:
//! 1. Absorb finished decisions, then expire overdue ones
//! 2. Advance the clock by `minutes_per_tick * speed`
//! 3. Per agent (index order): needs, activity countdown, next decision
//! 4. Plan routes for agents that need one
//! 5. Move walkers, start activities on arrival
//! 6. Conversations
//! 7. Dispatch queued decision requests

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::sim::constants::{movement, tick, time};
use crate::sim::control::{ControlEvent, ControlRejection, SimulationControls};
use crate::sim::decision::{
    DecisionOutcome, DecisionProvider, DecisionRequest, DecisionTrace, HeuristicDecisionProvider,
};
use crate::sim::decision_queue::{DecisionQueue, QueueConfig};
use crate::sim::events::{DomainEvent, LogLevel, StateEvent};
use crate::sim::map::{TilePos, TownMap};
use crate::sim::metrics::{Backpressure, SimulationMetrics};
use crate::sim::performance::TickDurationTracker;
use crate::sim::route::{CachedRouter, GridRouter, RouteFinder};
use crate::sim::state::{AgentFingerprint, AgentState, WorldState};
use crate::sim::systems::conversation::ConversationSystem;
use crate::sim::systems::{behavior, movement as walk, needs};
use crate::sim::time::GameTime;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub seed: u64,
    pub agent_count: usize,
    pub minutes_per_tick: u32,
    /// Ask the decision service instead of the local policy
    pub llm_enabled: bool,
    /// Wall-clock budget per tick, used for load status
    pub tick_budget: Duration,
    pub queue: QueueConfig,
    pub path_cache_entries: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            agent_count: 12,
            minutes_per_tick: time::DEFAULT_MINUTES_PER_TICK,
            llm_enabled: false,
            tick_budget: Duration::from_millis(tick::DEFAULT_INTERVAL_MS),
            queue: QueueConfig::default(),
            path_cache_entries: 4096,
        }
    }
}

/// Route request produced during a tick: (agent index, from, to)
type PendingRoute = (usize, TilePos, TilePos);

pub struct SimulationOrchestrator {
    config: OrchestratorConfig,
    rng: StdRng,
    world: WorldState,
    controls: SimulationControls,
    queue: DecisionQueue,
    provider: Option<Arc<dyn DecisionProvider>>,
    runtime: Option<Handle>,
    router: CachedRouter<Box<dyn RouteFinder>>,
    conversations: ConversationSystem,
    durations: TickDurationTracker,
    last_tick_id: u64,
    running_ticks: u64,
    last_events: Vec<DomainEvent>,
    last_metrics: SimulationMetrics,
    last_backpressure: Backpressure,
}

impl SimulationOrchestrator {
    /// Build with the default provider (the local heuristic) when decisions are enabled
    pub fn new(config: OrchestratorConfig) -> Self {
        let provider: Option<Arc<dyn DecisionProvider>> = if config.llm_enabled {
            Some(Arc::new(HeuristicDecisionProvider::new(config.seed)))
        } else {
            None
        };
        Self::build(config, provider, Box::new(GridRouter))
    }

    pub fn with_provider(config: OrchestratorConfig, provider: Arc<dyn DecisionProvider>) -> Self {
        Self::build(config, Some(provider), Box::new(GridRouter))
    }

    pub fn with_route_finder(
        config: OrchestratorConfig,
        provider: Option<Arc<dyn DecisionProvider>>,
        finder: Box<dyn RouteFinder>,
    ) -> Self {
        Self::build(config, provider, finder)
    }

    fn build(
        config: OrchestratorConfig,
        provider: Option<Arc<dyn DecisionProvider>>,
        finder: Box<dyn RouteFinder>,
    ) -> Self {
        let config = OrchestratorConfig {
            minutes_per_tick: config.minutes_per_tick.max(1),
            ..config
        };
        let mut rng = StdRng::seed_from_u64(config.seed);
        let world = WorldState::spawn(TownMap::standard(), config.agent_count, &mut rng);
        let runtime = Handle::try_current().ok();
        if config.llm_enabled && runtime.is_none() {
            warn!("No tokio runtime at construction; decision requests will fail over to fallback");
        }

        info!(
            seed = config.seed,
            agents = config.agent_count,
            minutes_per_tick = config.minutes_per_tick,
            llm_enabled = config.llm_enabled,
            provider = provider.as_ref().map(|p| p.name()).unwrap_or("none"),
            "Simulation created"
        );

        let mut orchestrator = Self {
            queue: DecisionQueue::new(config.queue),
            router: CachedRouter::new(finder, config.path_cache_entries),
            durations: TickDurationTracker::new(config.tick_budget),
            config,
            rng,
            world,
            controls: SimulationControls::default(),
            provider,
            runtime,
            conversations: ConversationSystem::new(),
            last_tick_id: 0,
            running_ticks: 0,
            last_events: Vec::new(),
            last_metrics: SimulationMetrics::default(),
            last_backpressure: Backpressure::Normal,
        };
        orchestrator.refresh_metrics();
        orchestrator
    }

    /// Advance the world for `tick_id`. Stale ids are ignored and return false.
    pub fn tick(&mut self, tick_id: u64) -> bool {
        if tick_id <= self.last_tick_id {
            debug!(tick_id, last = self.last_tick_id, "Ignoring stale tick");
            return false;
        }
        let started = Instant::now();

        self.last_events = if self.controls.paused {
            Vec::new()
        } else {
            self.run_tick(tick_id)
        };
        self.last_tick_id = tick_id;

        self.durations.record(started.elapsed());
        self.refresh_metrics();
        true
    }

    fn run_tick(&mut self, tick_id: u64) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        let mut routes: Vec<PendingRoute> = Vec::new();

        self.absorb_decisions(tick_id, &mut routes);

        let minutes = self.config.minutes_per_tick * self.controls.speed;
        self.world.total_minutes += minutes as u64;
        self.running_ticks += 1;
        let now = self.world.game_time();

        for i in 0..self.world.agents.len() {
            let agent = &mut self.world.agents[i];
            needs::update(agent, minutes, now.total_minutes);
            if matches!(agent.state, AgentState::Activity | AgentState::Sleeping) {
                behavior::advance_activity(agent, minutes, now);
            }
            if !agent.is_free() || agent.goal.is_some() {
                continue;
            }

            if self.config.llm_enabled {
                self.request_decision(i, tick_id, now);
            } else {
                let decision = behavior::choose_local(&self.world.agents[i], &self.world.map, now, &mut self.rng);
                let agent = &mut self.world.agents[i];
                if let Some(target) = behavior::begin(agent, decision, &self.world.map, &mut self.rng) {
                    routes.push((i, agent.tile, target));
                }
            }
        }

        self.plan_routes(routes, &mut events);

        let step = movement::TILES_PER_TICK * self.controls.speed;
        for agent in self.world.agents.iter_mut() {
            if walk::step(agent, step) {
                if let Some(goal) = agent.goal.take() {
                    if let Some(loc) = self.world.map.location(goal.location) {
                        events.push(DomainEvent::LocationArrival {
                            agent: agent.id,
                            location: loc.name.clone(),
                        });
                    }
                    behavior::start_activity(agent, goal.kind, Some(goal.location), goal.duration_minutes);
                }
            }
        }

        self.conversations
            .update(&mut self.world.agents, &self.world.map, now.total_minutes, &mut self.rng, &mut events);

        if self.config.llm_enabled {
            if let Some(provider) = &self.provider {
                self.queue.dispatch(provider, self.runtime.as_ref());
            }
        }
        self.queue.end_tick();

        let pressure = self.queue.backpressure();
        if pressure != self.last_backpressure {
            if pressure == Backpressure::Critical {
                warn!(tick_id, depth = self.queue.depth(), "Decision queue critical");
                events.push(DomainEvent::Log {
                    level: LogLevel::Warn,
                    message: format!("decision queue critical at depth {}", self.queue.depth()),
                });
            } else {
                debug!(tick_id, backpressure = pressure.as_str(), "Decision queue backpressure changed");
            }
            self.last_backpressure = pressure;
        }

        events
    }

    fn request_decision(&mut self, index: usize, tick_id: u64, now: GameTime) {
        let request_id = self.queue.next_request_id();
        let agent = &self.world.agents[index];
        let request = DecisionRequest {
            request_id,
            agent_id: agent.id,
            agent_name: agent.name.clone(),
            tick_id,
            game_time: now,
            tile: agent.tile,
            energy: agent.energy,
            hunger: agent.hunger,
            mood: agent.mood,
            current_location: self.world.map.location_at(agent.tile).map(|l| l.name.clone()),
            locations: self.world.map.locations().iter().map(|l| l.name.clone()).collect(),
        };

        match self.queue.enqueue(request, index, tick_id) {
            Ok(()) => {
                self.world.agents[index].pending_request = Some(request_id);
            }
            Err(full) => {
                debug!(request_id, depth = full.depth, "Decision request dropped");
                let agent = &mut self.world.agents[index];
                behavior::fallback(agent);
                agent.decision_trace = Some(DecisionTrace {
                    request_id,
                    tick_id,
                    outcome: DecisionOutcome::Dropped,
                    action: "wait".into(),
                    latency_ms: None,
                    detail: Some(full.to_string()),
                });
                self.queue.record_outcome(DecisionOutcome::Dropped);
            }
        }
    }

    fn absorb_decisions(&mut self, tick_id: u64, routes: &mut Vec<PendingRoute>) {
        for completion in self.queue.take_completions() {
            let Some(agent) = self.world.agents.get_mut(completion.agent_index) else {
                continue;
            };
            if agent.pending_request != Some(completion.request_id) {
                continue;
            }
            agent.pending_request = None;

            let (outcome, detail) = match completion.result {
                Ok(response) => match response.validate(&self.world.map, agent.home) {
                    Ok(valid) => {
                        if let Some(target) = behavior::begin(agent, valid, &self.world.map, &mut self.rng) {
                            routes.push((completion.agent_index, agent.tile, target));
                        }
                        (DecisionOutcome::Ok, None)
                    }
                    Err(reason) => {
                        behavior::fallback(agent);
                        (DecisionOutcome::Fallback, Some(reason))
                    }
                },
                Err(err) => {
                    behavior::fallback(agent);
                    (DecisionOutcome::Error, Some(err.to_string()))
                }
            };

            let action = agent
                .goal_label(&self.world.map)
                .or_else(|| agent.action_label(&self.world.map))
                .unwrap_or_else(|| "wait".into());
            agent.decision_trace = Some(DecisionTrace {
                request_id: completion.request_id,
                tick_id,
                outcome,
                action,
                latency_ms: Some(completion.wait_ms + completion.process_ms),
                detail,
            });
            self.queue.record_outcome(outcome);
        }

        for expired in self.queue.expire_overdue(tick_id) {
            let Some(agent) = self.world.agents.get_mut(expired.agent_index) else {
                continue;
            };
            if agent.pending_request != Some(expired.request_id) {
                continue;
            }
            agent.pending_request = None;
            behavior::fallback(agent);
            agent.decision_trace = Some(DecisionTrace {
                request_id: expired.request_id,
                tick_id,
                outcome: DecisionOutcome::Fallback,
                action: "wait".into(),
                latency_ms: None,
                detail: Some("overdue".into()),
            });
            self.queue.record_outcome(DecisionOutcome::Fallback);
        }
    }

    fn plan_routes(&mut self, routes: Vec<PendingRoute>, events: &mut Vec<DomainEvent>) {
        if routes.is_empty() {
            return;
        }
        let keys: Vec<(TilePos, TilePos)> = routes.iter().map(|(_, from, to)| (*from, *to)).collect();
        let planned = self.router.plan_batch(&self.world.map, &keys);

        for ((index, _, _), path) in routes.into_iter().zip(planned) {
            let agent = &mut self.world.agents[index];
            match path {
                Some(path) if !path.is_empty() => {
                    agent.path = path.into();
                    agent.state = AgentState::Walking;
                }
                Some(_) => {
                    if let Some(goal) = agent.goal.take() {
                        if let Some(loc) = self.world.map.location(goal.location) {
                            events.push(DomainEvent::LocationArrival {
                                agent: agent.id,
                                location: loc.name.clone(),
                            });
                        }
                        behavior::start_activity(agent, goal.kind, Some(goal.location), goal.duration_minutes);
                    }
                }
                None => {
                    debug!(agent = %agent.name, "No route to goal, waiting instead");
                    behavior::fallback(agent);
                }
            }
        }
    }

    fn refresh_metrics(&mut self) {
        let (p50, p95, p99) = self.durations.percentiles();
        let mut metrics = SimulationMetrics {
            tick_duration_ms_p50: p50,
            tick_duration_ms_p95: p95,
            tick_duration_ms_p99: p99,
            ..SimulationMetrics::default()
        };
        self.queue.fill_metrics(&mut metrics);
        metrics.path_cache_size = Some(self.router.size() as u32);
        metrics.path_cache_hit_rate = Some(self.router.hit_rate());
        self.last_metrics = metrics;
    }

    /// Apply an operator control. Rejections leave all state unchanged.
    pub fn apply_control(&mut self, event: &ControlEvent) -> Result<(), ControlRejection> {
        match self.controls.apply(event) {
            Ok(()) => {
                info!(
                    action = event.action.as_str(),
                    paused = self.controls.paused,
                    speed = self.controls.speed,
                    "Control applied"
                );
                Ok(())
            }
            Err(rejection) => {
                warn!(action = event.action.as_str(), %rejection, "Control rejected");
                Err(rejection)
            }
        }
    }

    /// Full world projection; carries no domain events
    pub fn create_snapshot_event(&self, tick_id: u64) -> StateEvent {
        StateEvent {
            tick_id,
            game_time: self.world.game_time(),
            agents: self.world.all_agent_data(),
            metrics: Some(self.last_metrics.clone()),
            events: None,
        }
    }

    /// Per-tick projection with the last tick's domain events
    pub fn create_delta_event(&self, tick_id: u64) -> StateEvent {
        StateEvent {
            tick_id,
            game_time: self.world.game_time(),
            agents: self.world.all_agent_data(),
            metrics: Some(self.last_metrics.clone()),
            events: if self.last_events.is_empty() {
                None
            } else {
                Some(self.last_events.clone())
            },
        }
    }

    /// Let in-flight decisions settle. Not for use from the tick loop.
    pub async fn wait_for_idle(&mut self, timeout: Duration) -> bool {
        let idle = self.queue.wait_for_idle(timeout).await;
        self.refresh_metrics();
        if !idle {
            warn!(depth = self.queue.depth(), "Timed out waiting for decisions to settle");
        }
        idle
    }

    pub fn agent_fingerprints(&self) -> Vec<AgentFingerprint> {
        self.world.fingerprints()
    }

    pub fn last_tick_id(&self) -> u64 {
        self.last_tick_id
    }

    /// Ticks that advanced the world (paused ticks excluded)
    pub fn running_ticks(&self) -> u64 {
        self.running_ticks
    }

    pub fn game_time(&self) -> GameTime {
        self.world.game_time()
    }

    pub fn is_paused(&self) -> bool {
        self.controls.paused
    }

    pub fn speed(&self) -> u32 {
        self.controls.speed
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.last_metrics
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn last_events(&self) -> &[DomainEvent] {
        &self.last_events
    }

    pub fn durations(&self) -> &TickDurationTracker {
        &self.durations
    }

    pub fn conversations_completed(&self) -> u64 {
        self.conversations.completed()
    }

    pub fn active_conversations(&self) -> usize {
        self.conversations.active().len()
    }

    pub fn decision_queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// World plus cache and queue footprint, in bytes
    pub fn estimated_heap_bytes(&self) -> usize {
        // Cached routes average a few dozen tiles
        let route_bytes = self.router.size() * 34 * std::mem::size_of::<TilePos>();
        let queue_bytes = self.queue.depth() * 512;
        self.world.estimated_heap_bytes() + route_bytes + queue_bytes
    }
}
