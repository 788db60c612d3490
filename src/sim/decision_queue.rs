//! Bounded queue of decision requests
//!
//! The tick path enqueues, dispatches and absorbs; spawned provider tasks only
//! report back through a crossbeam channel and a shared in-flight counter. The
//! bounded capacity is the backpressure mechanism: once `waiting + in_flight`
//! reaches capacity new requests are dropped and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::sim::constants::decision::{
    DEFAULT_MAX_IN_FLIGHT, DEFAULT_OVERDUE_TICKS, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TIMEOUT_MS,
    HIGH_WATER_RATIO, LOW_WATER_RATIO, SUSTAINED_DROP_TICKS,
};
use crate::sim::decision::{DecisionError, DecisionOutcome, DecisionProvider, DecisionRequest, DecisionResponse};
use crate::sim::metrics::{Backpressure, SimulationMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
    pub max_in_flight: usize,
    /// Running ticks a request may stay unresolved before it is abandoned
    pub overdue_ticks: u64,
    pub request_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            overdue_ticks: DEFAULT_OVERDUE_TICKS,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Result of one provider call, delivered back to the tick path
#[derive(Debug)]
pub struct Completion {
    pub request_id: u64,
    pub agent_index: usize,
    pub result: Result<DecisionResponse, DecisionError>,
    /// Time spent waiting in the queue before dispatch
    pub wait_ms: f64,
    /// Time spent in the provider call
    pub process_ms: f64,
}

/// Request abandoned because it outlived `overdue_ticks`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expired {
    pub request_id: u64,
    pub agent_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Decision queue full ({depth}/{capacity})")]
pub struct QueueFull {
    pub depth: usize,
    pub capacity: usize,
}

struct Waiting {
    request: DecisionRequest,
    agent_index: usize,
    enqueued_tick: u64,
    enqueued_at: Instant,
}

struct InFlight {
    agent_index: usize,
    enqueued_tick: u64,
}

/// State shared with spawned provider tasks
#[derive(Default)]
struct Shared {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Cumulative counters
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub max_depth: usize,
    pub resolved: u64,
    pub non_ok: u64,
    wait_ms_sum: f64,
    wait_count: u64,
    process_ms_sum: f64,
    process_count: u64,
}

impl QueueStats {
    pub fn avg_wait_ms(&self) -> f64 {
        if self.wait_count == 0 {
            0.0
        } else {
            self.wait_ms_sum / self.wait_count as f64
        }
    }

    pub fn avg_process_ms(&self) -> f64 {
        if self.process_count == 0 {
            0.0
        } else {
            self.process_ms_sum / self.process_count as f64
        }
    }

    /// Share of resolved requests that did not end `ok`
    pub fn fallback_rate(&self) -> f64 {
        if self.resolved == 0 {
            0.0
        } else {
            (self.non_ok as f64 / self.resolved as f64).clamp(0.0, 1.0)
        }
    }
}

pub struct DecisionQueue {
    config: QueueConfig,
    waiting: VecDeque<Waiting>,
    in_flight: HashMap<u64, InFlight>,
    ready: Vec<Completion>,
    next_request_id: u64,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    shared: Arc<Shared>,
    stats: QueueStats,
    dropped_this_tick: u32,
    drop_streak: u32,
}

impl DecisionQueue {
    pub fn new(config: QueueConfig) -> Self {
        let config = QueueConfig {
            capacity: config.capacity.max(1),
            max_in_flight: config.max_in_flight.max(1),
            overdue_ticks: config.overdue_ticks.max(1),
            ..config
        };
        let (tx, rx) = unbounded();
        Self {
            config,
            waiting: VecDeque::with_capacity(config.capacity),
            in_flight: HashMap::new(),
            ready: Vec::new(),
            next_request_id: 1,
            tx,
            rx,
            shared: Arc::new(Shared::default()),
            stats: QueueStats::default(),
            dropped_this_tick: 0,
            drop_streak: 0,
        }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Requests waiting or in flight
    #[inline]
    pub fn depth(&self) -> usize {
        self.waiting.len() + self.in_flight.len()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    pub fn drop_streak(&self) -> u32 {
        self.drop_streak
    }

    /// Reserve the next request id
    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Add a request. Fails without queuing when the queue is at capacity.
    pub fn enqueue(&mut self, request: DecisionRequest, agent_index: usize, tick_id: u64) -> Result<(), QueueFull> {
        let depth = self.depth();
        if depth >= self.config.capacity {
            self.stats.dropped += 1;
            self.dropped_this_tick += 1;
            return Err(QueueFull {
                depth,
                capacity: self.config.capacity,
            });
        }
        self.waiting.push_back(Waiting {
            request,
            agent_index,
            enqueued_tick: tick_id,
            enqueued_at: Instant::now(),
        });
        self.stats.enqueued += 1;
        self.stats.max_depth = self.stats.max_depth.max(self.depth());
        Ok(())
    }

    /// Start provider calls for waiting requests, up to `max_in_flight`.
    ///
    /// Without a runtime the request completes immediately with
    /// [`DecisionError::NoRuntime`].
    pub fn dispatch(&mut self, provider: &Arc<dyn DecisionProvider>, runtime: Option<&Handle>) -> usize {
        let mut started = 0;
        while self.shared.in_flight.load(Ordering::Acquire) < self.config.max_in_flight {
            let Some(item) = self.waiting.pop_front() else {
                break;
            };
            let request_id = item.request.request_id;
            let agent_index = item.agent_index;
            let wait_ms = item.enqueued_at.elapsed().as_secs_f64() * 1000.0;

            let Some(handle) = runtime else {
                self.ready.push(Completion {
                    request_id,
                    agent_index,
                    result: Err(DecisionError::NoRuntime),
                    wait_ms,
                    process_ms: 0.0,
                });
                continue;
            };

            self.in_flight.insert(
                request_id,
                InFlight {
                    agent_index,
                    enqueued_tick: item.enqueued_tick,
                },
            );
            self.shared.in_flight.fetch_add(1, Ordering::AcqRel);

            let future = provider.decide(item.request);
            let timeout = self.config.request_timeout;
            let tx = self.tx.clone();
            let shared = self.shared.clone();
            handle.spawn(async move {
                let started_at = Instant::now();
                let result = match tokio::time::timeout(timeout, future).await {
                    Ok(result) => result,
                    Err(_) => Err(DecisionError::Timeout),
                };
                let _ = tx.send(Completion {
                    request_id,
                    agent_index,
                    result,
                    wait_ms,
                    process_ms: started_at.elapsed().as_secs_f64() * 1000.0,
                });
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                shared.idle.notify_waiters();
            });
            started += 1;
        }
        if started > 0 {
            debug!(started, depth = self.depth(), "Dispatched decision requests");
        }
        started
    }

    /// Move finished provider calls out of the channel. Late completions for
    /// requests already expired are discarded.
    fn collect(&mut self) {
        for completion in self.rx.try_iter() {
            if self.in_flight.remove(&completion.request_id).is_some() {
                self.stats.wait_ms_sum += completion.wait_ms;
                self.stats.wait_count += 1;
                self.stats.process_ms_sum += completion.process_ms;
                self.stats.process_count += 1;
                self.ready.push(completion);
            } else {
                debug!(request_id = completion.request_id, "Discarding late decision");
            }
        }
    }

    /// Completions ready to apply, ordered by request id
    pub fn take_completions(&mut self) -> Vec<Completion> {
        self.collect();
        let mut ready = std::mem::take(&mut self.ready);
        ready.sort_by_key(|c| c.request_id);
        ready
    }

    /// Abandon requests older than `overdue_ticks`, ordered by request id
    pub fn expire_overdue(&mut self, tick_id: u64) -> Vec<Expired> {
        let limit = self.config.overdue_ticks;
        let mut expired = Vec::new();

        self.waiting.retain(|w| {
            if tick_id.saturating_sub(w.enqueued_tick) > limit {
                expired.push(Expired {
                    request_id: w.request.request_id,
                    agent_index: w.agent_index,
                });
                false
            } else {
                true
            }
        });

        let overdue: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| tick_id.saturating_sub(f.enqueued_tick) > limit)
            .map(|(id, _)| *id)
            .collect();
        for id in overdue {
            if let Some(f) = self.in_flight.remove(&id) {
                expired.push(Expired {
                    request_id: id,
                    agent_index: f.agent_index,
                });
            }
        }

        expired.sort_by_key(|e| e.request_id);
        if !expired.is_empty() {
            warn!(count = expired.len(), tick_id, "Decision requests overdue");
        }
        expired
    }

    /// Count one resolution toward the fallback rate
    pub fn record_outcome(&mut self, outcome: DecisionOutcome) {
        self.stats.resolved += 1;
        if outcome != DecisionOutcome::Ok {
            self.stats.non_ok += 1;
        }
    }

    /// Close the tick's drop window
    pub fn end_tick(&mut self) {
        if self.dropped_this_tick > 0 {
            self.drop_streak += 1;
        } else {
            self.drop_streak = 0;
        }
        self.dropped_this_tick = 0;
        self.stats.max_depth = self.stats.max_depth.max(self.depth());
    }

    pub fn backpressure(&self) -> Backpressure {
        let ratio = self.depth() as f64 / self.config.capacity as f64;
        if ratio >= HIGH_WATER_RATIO || self.drop_streak >= SUSTAINED_DROP_TICKS {
            Backpressure::Critical
        } else if ratio >= LOW_WATER_RATIO || self.drop_streak > 0 {
            Backpressure::Elevated
        } else {
            Backpressure::Normal
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.backpressure() != Backpressure::Critical && self.drop_streak == 0
    }

    /// No provider call is running
    pub fn is_idle(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire) == 0
    }

    /// Wait until no provider call is running. Returns false on timeout.
    pub async fn wait_for_idle(&mut self, timeout: Duration) -> bool {
        let shared = self.shared.clone();
        let deadline = tokio::time::Instant::now() + timeout;
        let idle = loop {
            let notified = shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if shared.in_flight.load(Ordering::Acquire) == 0 {
                break true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break shared.in_flight.load(Ordering::Acquire) == 0;
            }
        };
        self.collect();
        idle
    }

    pub fn fill_metrics(&self, metrics: &mut SimulationMetrics) {
        metrics.queue_depth = self.depth() as u32;
        metrics.queue_dropped = self.stats.dropped;
        metrics.llm_fallback_rate = self.stats.fallback_rate();
        metrics.llm_queue_max_depth = Some(self.stats.max_depth as u32);
        metrics.llm_queue_avg_wait_ms = Some(self.stats.avg_wait_ms());
        metrics.llm_queue_avg_process_ms = Some(self.stats.avg_process_ms());
        metrics.llm_queue_backpressure = Some(self.backpressure());
        metrics.llm_queue_healthy = Some(self.is_healthy());
    }
}

impl Default for DecisionQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
