//! World session: the simulation plus its viewers behind one lock
//!
//! The tick callback and connection readers both take the session mutex
//! briefly and never hold it across an await.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use crate::metrics::Metrics;
use crate::net::connection::ClientSink;
use crate::net::sync::{FrameOutcome, SyncHub};
use crate::sim::orchestrator::SimulationOrchestrator;
use crate::sim::scheduler::{
    SchedulerConfig, SchedulerDriver, SchedulerError, SystemClock, TickScheduler, TokioTimer,
};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

pub type SharedSession = Arc<Mutex<WorldSession>>;

pub struct WorldSession {
    pub orchestrator: SimulationOrchestrator,
    pub hub: SyncHub,
    metrics: Arc<Metrics>,
    last_stats_log: Instant,
}

impl WorldSession {
    pub fn new(orchestrator: SimulationOrchestrator, metrics: Arc<Metrics>) -> Self {
        metrics.record_simulation(&orchestrator);
        Self {
            orchestrator,
            hub: SyncHub::new(),
            metrics,
            last_stats_log: Instant::now(),
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Advance the world and push the delta to joined viewers.
    /// Returns the number of viewers reached; stale ids reach none.
    pub fn on_tick(&mut self, tick_id: u64) -> usize {
        let started = Instant::now();
        if !self.orchestrator.tick(tick_id) {
            return 0;
        }

        let delta = self.orchestrator.create_delta_event(tick_id);
        let sent = self.hub.broadcast_delta(&delta);

        self.metrics.record_simulation(&self.orchestrator);
        self.metrics.record_hub(&self.hub);
        self.metrics.record_tick_time(started.elapsed());

        if self.last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
            self.last_stats_log = Instant::now();
            info!(
                tick_id,
                game_time = %self.orchestrator.game_time().label(),
                viewers = self.hub.joined_count(),
                queue_depth = self.orchestrator.decision_queue_depth(),
                load = %self.orchestrator.durations().status_message(),
                "Simulation stats"
            );
        }
        sent
    }

    pub fn connect(&mut self, sink: Arc<dyn ClientSink>) -> u64 {
        let id = self.hub.connect(sink);
        self.metrics.record_hub(&self.hub);
        id
    }

    pub fn handle_frame(&mut self, id: u64, frame: &[u8]) -> FrameOutcome {
        let outcome = self.hub.handle_frame(id, frame, &mut self.orchestrator);
        if let FrameOutcome::ControlAcked { accepted: true } = outcome {
            self.metrics.record_simulation(&self.orchestrator);
        }
        self.metrics.record_hub(&self.hub);
        outcome
    }

    pub fn disconnect(&mut self, id: u64) -> bool {
        let removed = self.hub.disconnect(id);
        self.metrics.record_hub(&self.hub);
        removed
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Wire a real-time scheduler to the session and start driving it
pub fn start_tick_loop(session: SharedSession, config: SchedulerConfig) -> Result<SchedulerDriver, SchedulerError> {
    let mut scheduler = TickScheduler::new(config, Arc::new(SystemClock::new()))?;
    scheduler.on_tick(move |tick_id| {
        session.lock().on_tick(tick_id);
    });
    Ok(SchedulerDriver::start(
        Arc::new(Mutex::new(scheduler)),
        Arc::new(TokioTimer),
    ))
}
