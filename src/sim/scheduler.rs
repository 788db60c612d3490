//! Fixed-step tick scheduler with bounded catch-up
//!
//! Wall-clock time is accumulated into a remainder and converted into tick ids.
//! A single call never processes more than `max_catch_up_ticks`; if the cap is
//! hit with a full interval still pending, the remainder is clamped to
//! `interval - 1` and the excess is discarded. A stalled process therefore
//! resumes at normal cadence instead of replaying its backlog.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sim::constants::tick::{DEFAULT_INTERVAL_MS, DEFAULT_MAX_CATCH_UP};

/// Monotonic time source, measured from an arbitrary origin
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Real monotonic clock
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Sleep source used by the driver loop
pub trait Timer: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Tick interval must be positive")]
    InvalidInterval,
    #[error("Max catch-up ticks must be positive")]
    InvalidCatchUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub max_catch_up_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_INTERVAL_MS,
            max_catch_up_ticks: DEFAULT_MAX_CATCH_UP,
        }
    }
}

/// Handle returned by [`TickScheduler::on_tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickSubscription(u64);

pub type TickCallback = Box<dyn FnMut(u64) + Send>;

pub struct TickScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    tick_id: u64,
    remainder_ms: u64,
    last_sample: Option<Duration>,
    callbacks: Vec<(TickSubscription, TickCallback)>,
    next_subscription: u64,
}

impl TickScheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Result<Self, SchedulerError> {
        if config.tick_interval_ms == 0 {
            return Err(SchedulerError::InvalidInterval);
        }
        if config.max_catch_up_ticks == 0 {
            return Err(SchedulerError::InvalidCatchUp);
        }
        Ok(Self {
            config,
            clock,
            tick_id: 0,
            remainder_ms: 0,
            last_sample: None,
            callbacks: Vec::new(),
            next_subscription: 0,
        })
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.config.tick_interval_ms)
    }

    /// Last assigned tick id (0 before the first tick)
    #[inline]
    pub fn current_tick_id(&self) -> u64 {
        self.tick_id
    }

    pub fn remainder_ms(&self) -> u64 {
        self.remainder_ms
    }

    /// Register a callback invoked with each new tick id
    pub fn on_tick<F>(&mut self, callback: F) -> TickSubscription
    where
        F: FnMut(u64) + Send + 'static,
    {
        let subscription = TickSubscription(self.next_subscription);
        self.next_subscription += 1;
        self.callbacks.push((subscription, Box::new(callback)));
        subscription
    }

    /// Remove a callback. Returns false if it was already removed.
    pub fn off_tick(&mut self, subscription: TickSubscription) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(s, _)| *s != subscription);
        self.callbacks.len() != before
    }

    /// Convert elapsed milliseconds into ticks, returning how many were processed
    pub fn process_elapsed(&mut self, elapsed_ms: u64) -> u32 {
        let interval = self.config.tick_interval_ms;
        let cap = self.config.max_catch_up_ticks;

        self.remainder_ms = self.remainder_ms.saturating_add(elapsed_ms);

        let mut processed = 0;
        while self.remainder_ms >= interval && processed < cap {
            self.tick_id += 1;
            let tick_id = self.tick_id;
            for (_, callback) in self.callbacks.iter_mut() {
                callback(tick_id);
            }
            self.remainder_ms -= interval;
            processed += 1;
        }

        if processed == cap && self.remainder_ms >= interval {
            debug!(
                discarded_ms = self.remainder_ms - (interval - 1),
                "Catch-up cap reached, discarding backlog"
            );
            self.remainder_ms = interval - 1;
        }

        processed
    }

    /// Start measuring elapsed time from now
    pub fn reset_clock(&mut self) {
        self.last_sample = Some(self.clock.now());
    }

    /// Read the clock and process the time elapsed since the previous sample
    pub fn sample_clock(&mut self) -> u32 {
        let now = self.clock.now();
        let elapsed = match self.last_sample {
            Some(last) => now.saturating_sub(last),
            None => Duration::ZERO,
        };
        self.last_sample = Some(now);
        self.process_elapsed(elapsed.as_millis() as u64)
    }
}

/// Background task that drives a scheduler from a timer
pub struct SchedulerDriver {
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerDriver {
    /// Spawn the driver loop. Must be called from within a tokio runtime.
    pub fn start(scheduler: Arc<Mutex<TickScheduler>>, timer: Arc<dyn Timer>) -> Self {
        let interval = {
            let mut s = scheduler.lock();
            s.reset_clock();
            s.interval()
        };

        let running = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(Notify::new());

        let handle = {
            let running = running.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                info!(interval_ms = interval.as_millis() as u64, "Tick scheduler started");
                loop {
                    tokio::select! {
                        _ = timer.sleep(interval) => {}
                        _ = stop.notified() => break,
                    }
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    let processed = scheduler.lock().sample_clock();
                    if processed > 1 {
                        debug!(processed, "Processed catch-up ticks");
                    }
                }
                info!("Tick scheduler stopped");
            })
        };

        Self {
            running,
            stop,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Halt the loop. No tick starts after this returns.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stop.notify_one();
    }

    /// Stop and wait for the loop task to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
