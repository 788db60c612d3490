//! Prometheus-compatible metrics endpoint
//!
//! Exposes simulation and viewer metrics in Prometheus format, plus JSON,
//! a health probe and the recent log tail.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::logging::LogBuffer;
use crate::net::sync::SyncHub;
use crate::sim::orchestrator::SimulationOrchestrator;
use crate::sim::performance::TickLoadStatus;
use crate::sim::state::AgentState;
use crate::sim::time::GameTime;

/// Rolling window for callback timing percentiles
const TICK_HISTORY: usize = 1000;

/// Metrics registry for the simulation server
#[derive(Debug)]
pub struct Metrics {
    // Agent counts by state
    pub agents_total: AtomicU64,
    pub agents_idle: AtomicU64,
    pub agents_walking: AtomicU64,
    pub agents_conversing: AtomicU64,
    pub agents_activity: AtomicU64,
    pub agents_sleeping: AtomicU64,

    // Tick callback timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,
    pub tick_id: AtomicU64,

    // Load status (0=Excellent, 1=Good, 2=Warning, 3=Overloaded)
    pub performance_status: AtomicU64,
    pub budget_usage_percent: AtomicU64,

    // Simulation controls and clock
    pub paused: AtomicU64,
    pub speed: AtomicU64,
    pub game_minutes: AtomicU64,

    // Decision queue
    pub queue_depth: AtomicU64,
    pub queue_dropped: AtomicU64,
    pub llm_fallback_bp: AtomicU64, // Stored as rate * 10000
    pub queue_backpressure: AtomicU64, // 0=normal, 1=elevated, 2=critical
    pub queue_healthy: AtomicU64,

    // Route cache
    pub path_cache_size: AtomicU64,
    pub path_cache_hit_bp: AtomicU64, // Stored as rate * 10000

    // Conversations
    pub conversations_active: AtomicU64,
    pub conversations_completed: AtomicU64,

    // Viewers
    pub connections_active: AtomicU64,
    pub connections_joined: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub joins_rejected: AtomicU64,
    pub controls_forwarded: AtomicU64,
    pub deltas_sent: AtomicU64,

    start_time: Instant,

    tick_history: RwLock<VecDeque<u64>>,
}

fn basis_points(rate: f64) -> u64 {
    (rate.clamp(0.0, 1.0) * 10_000.0).round() as u64
}

fn status_code(status: TickLoadStatus) -> u64 {
    match status {
        TickLoadStatus::Excellent => 0,
        TickLoadStatus::Good => 1,
        TickLoadStatus::Warning => 2,
        TickLoadStatus::Overloaded => 3,
    }
}

fn status_name(code: u64) -> &'static str {
    match code {
        0 => "excellent",
        1 => "good",
        2 => "warning",
        _ => "overloaded",
    }
}

fn backpressure_name(code: u64) -> &'static str {
    match code {
        0 => "normal",
        1 => "elevated",
        _ => "critical",
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            agents_total: AtomicU64::new(0),
            agents_idle: AtomicU64::new(0),
            agents_walking: AtomicU64::new(0),
            agents_conversing: AtomicU64::new(0),
            agents_activity: AtomicU64::new(0),
            agents_sleeping: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            tick_id: AtomicU64::new(0),
            performance_status: AtomicU64::new(0),
            budget_usage_percent: AtomicU64::new(0),
            paused: AtomicU64::new(0),
            speed: AtomicU64::new(1),
            game_minutes: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            queue_dropped: AtomicU64::new(0),
            llm_fallback_bp: AtomicU64::new(0),
            queue_backpressure: AtomicU64::new(0),
            queue_healthy: AtomicU64::new(1),
            path_cache_size: AtomicU64::new(0),
            path_cache_hit_bp: AtomicU64::new(0),
            conversations_active: AtomicU64::new(0),
            conversations_completed: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_joined: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            joins_rejected: AtomicU64::new(0),
            controls_forwarded: AtomicU64::new(0),
            deltas_sent: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(TICK_HISTORY)),
        }
    }

    /// Record one tick callback's wall time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > TICK_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f64 * 0.95) as usize;
            let p99_idx = (sorted.len() as f64 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Copy the orchestrator's projection into the gauges
    pub fn record_simulation(&self, sim: &SimulationOrchestrator) {
        let (mut idle, mut walking, mut conversing, mut activity, mut sleeping) = (0, 0, 0, 0, 0);
        for agent in &sim.world().agents {
            match agent.state {
                AgentState::Idle => idle += 1,
                AgentState::Walking => walking += 1,
                AgentState::Conversing => conversing += 1,
                AgentState::Activity => activity += 1,
                AgentState::Sleeping => sleeping += 1,
            }
        }
        self.agents_total.store(sim.world().agents.len() as u64, Ordering::Relaxed);
        self.agents_idle.store(idle, Ordering::Relaxed);
        self.agents_walking.store(walking, Ordering::Relaxed);
        self.agents_conversing.store(conversing, Ordering::Relaxed);
        self.agents_activity.store(activity, Ordering::Relaxed);
        self.agents_sleeping.store(sleeping, Ordering::Relaxed);

        self.tick_id.store(sim.last_tick_id(), Ordering::Relaxed);
        self.paused.store(sim.is_paused() as u64, Ordering::Relaxed);
        self.speed.store(sim.speed() as u64, Ordering::Relaxed);
        self.game_minutes.store(sim.game_time().total_minutes, Ordering::Relaxed);

        let durations = sim.durations();
        self.performance_status.store(status_code(durations.status()), Ordering::Relaxed);
        self.budget_usage_percent
            .store(durations.budget_usage_percent().round() as u64, Ordering::Relaxed);

        let m = sim.metrics();
        self.queue_depth.store(m.queue_depth as u64, Ordering::Relaxed);
        self.queue_dropped.store(m.queue_dropped, Ordering::Relaxed);
        self.llm_fallback_bp.store(basis_points(m.llm_fallback_rate), Ordering::Relaxed);
        self.queue_backpressure.store(m.backpressure().level() as u64, Ordering::Relaxed);
        self.queue_healthy.store(m.is_healthy() as u64, Ordering::Relaxed);
        self.path_cache_size.store(m.path_cache_size.unwrap_or(0) as u64, Ordering::Relaxed);
        self.path_cache_hit_bp
            .store(basis_points(m.path_cache_hit_rate.unwrap_or(0.0)), Ordering::Relaxed);

        self.conversations_active.store(sim.active_conversations() as u64, Ordering::Relaxed);
        self.conversations_completed.store(sim.conversations_completed(), Ordering::Relaxed);
    }

    /// Copy connection counts and hub counters
    pub fn record_hub(&self, hub: &SyncHub) {
        let stats = hub.stats();
        self.connections_active.store(hub.connection_count() as u64, Ordering::Relaxed);
        self.connections_joined.store(hub.joined_count() as u64, Ordering::Relaxed);
        self.frames_received.store(stats.frames_received, Ordering::Relaxed);
        self.frames_dropped.store(stats.frames_dropped, Ordering::Relaxed);
        self.joins_rejected.store(stats.joins_rejected, Ordering::Relaxed);
        self.controls_forwarded.store(stats.controls_forwarded, Ordering::Relaxed);
        self.deltas_sent.store(stats.deltas_sent, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn game_time(&self) -> GameTime {
        GameTime::from_total_minutes(self.game_minutes.load(Ordering::Relaxed))
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        // Agents
        metric!("hamlet_agents_total", "Number of simulated agents", "gauge",
            self.agents_total.load(Ordering::Relaxed));
        output.push_str("# HELP hamlet_agents Agents by state\n# TYPE hamlet_agents gauge\n");
        for (state, value) in [
            ("idle", &self.agents_idle),
            ("walking", &self.agents_walking),
            ("conversing", &self.agents_conversing),
            ("activity", &self.agents_activity),
            ("sleeping", &self.agents_sleeping),
        ] {
            output.push_str(&format!(
                "hamlet_agents{{state=\"{}\"}} {}\n",
                state,
                value.load(Ordering::Relaxed)
            ));
        }

        // Tick timing
        metric!("hamlet_tick_time_microseconds", "Last tick callback time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("hamlet_tick_time_p95_microseconds", "95th percentile tick callback time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("hamlet_tick_time_p99_microseconds", "99th percentile tick callback time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("hamlet_tick_time_max_microseconds", "Maximum tick callback time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("hamlet_tick_count", "Total tick callbacks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("hamlet_tick_id", "Last tick id applied to the world", "gauge",
            self.tick_id.load(Ordering::Relaxed));

        // Budget
        metric!("hamlet_performance_status", "Load status (0=Excellent, 3=Overloaded)", "gauge",
            self.performance_status.load(Ordering::Relaxed));
        metric!("hamlet_budget_usage_percent", "Tick budget usage percentage", "gauge",
            self.budget_usage_percent.load(Ordering::Relaxed));
        output.push_str(&format!(
            "# HELP hamlet_performance_state Human-readable load state\n# TYPE hamlet_performance_state gauge\nhamlet_performance_state{{state=\"{}\"}} 1\n",
            status_name(self.performance_status.load(Ordering::Relaxed))
        ));

        // Controls and clock
        metric!("hamlet_paused", "Simulation paused (0/1)", "gauge",
            self.paused.load(Ordering::Relaxed));
        metric!("hamlet_speed", "Simulation speed multiplier", "gauge",
            self.speed.load(Ordering::Relaxed));
        metric!("hamlet_game_minutes_total", "Simulated minutes since start", "counter",
            self.game_minutes.load(Ordering::Relaxed));

        // Decision queue
        metric!("hamlet_decision_queue_depth", "Decision requests queued or in flight", "gauge",
            self.queue_depth.load(Ordering::Relaxed));
        metric!("hamlet_decision_queue_dropped_total", "Decision requests dropped at enqueue", "counter",
            self.queue_dropped.load(Ordering::Relaxed));
        metric!("hamlet_decision_queue_healthy", "Decision queue healthy (0/1)", "gauge",
            self.queue_healthy.load(Ordering::Relaxed));

        #[cfg(feature = "metrics_extended")]
        {
            metric!("hamlet_llm_fallback_rate", "Share of decisions that fell back", "gauge",
                self.llm_fallback_bp.load(Ordering::Relaxed) as f64 / 10_000.0);
            metric!("hamlet_decision_queue_backpressure", "Backpressure level (0=normal, 2=critical)", "gauge",
                self.queue_backpressure.load(Ordering::Relaxed));
            metric!("hamlet_path_cache_size", "Cached routes", "gauge",
                self.path_cache_size.load(Ordering::Relaxed));
            metric!("hamlet_path_cache_hit_rate", "Route cache hit rate", "gauge",
                self.path_cache_hit_bp.load(Ordering::Relaxed) as f64 / 10_000.0);
        }

        // Conversations
        metric!("hamlet_conversations_active", "Conversations in progress", "gauge",
            self.conversations_active.load(Ordering::Relaxed));
        metric!("hamlet_conversations_completed_total", "Conversations finished", "counter",
            self.conversations_completed.load(Ordering::Relaxed));

        // Viewers
        metric!("hamlet_connections_active", "Open viewer connections", "gauge",
            self.connections_active.load(Ordering::Relaxed));
        metric!("hamlet_connections_joined", "Viewer connections past the join handshake", "gauge",
            self.connections_joined.load(Ordering::Relaxed));
        metric!("hamlet_frames_received_total", "Inbound viewer frames", "counter",
            self.frames_received.load(Ordering::Relaxed));
        metric!("hamlet_frames_dropped_total", "Inbound frames dropped as invalid", "counter",
            self.frames_dropped.load(Ordering::Relaxed));
        metric!("hamlet_joins_rejected_total", "Joins rejected for protocol mismatch", "counter",
            self.joins_rejected.load(Ordering::Relaxed));
        metric!("hamlet_controls_forwarded_total", "Control messages forwarded to the simulation", "counter",
            self.controls_forwarded.load(Ordering::Relaxed));
        metric!("hamlet_deltas_sent_total", "Delta messages delivered", "counter",
            self.deltas_sent.load(Ordering::Relaxed));
        metric!("hamlet_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON form of the same gauges
    pub fn to_json(&self) -> String {
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);
        let status = load(&self.performance_status);
        let backpressure = load(&self.queue_backpressure);

        serde_json::json!({
            "agents": {
                "total": load(&self.agents_total),
                "idle": load(&self.agents_idle),
                "walking": load(&self.agents_walking),
                "conversing": load(&self.agents_conversing),
                "activity": load(&self.agents_activity),
                "sleeping": load(&self.agents_sleeping),
            },
            "performance": {
                "tick_time_us": load(&self.tick_time_us),
                "tick_time_p95_us": load(&self.tick_time_p95_us),
                "tick_time_p99_us": load(&self.tick_time_p99_us),
                "tick_time_max_us": load(&self.tick_time_max_us),
                "tick_count": load(&self.tick_count),
                "tick_id": load(&self.tick_id),
                "status": status,
                "status_name": status_name(status),
                "budget_percent": load(&self.budget_usage_percent),
            },
            "simulation": {
                "paused": load(&self.paused) == 1,
                "speed": load(&self.speed),
                "game_time": self.game_time(),
            },
            "decisions": {
                "queue_depth": load(&self.queue_depth),
                "queue_dropped": load(&self.queue_dropped),
                "fallback_rate": load(&self.llm_fallback_bp) as f64 / 10_000.0,
                "backpressure": backpressure_name(backpressure),
                "healthy": load(&self.queue_healthy) == 1,
            },
            "paths": {
                "cache_size": load(&self.path_cache_size),
                "hit_rate": load(&self.path_cache_hit_bp) as f64 / 10_000.0,
            },
            "conversations": {
                "active": load(&self.conversations_active),
                "completed": load(&self.conversations_completed),
            },
            "network": {
                "connections": load(&self.connections_active),
                "joined": load(&self.connections_joined),
                "frames_received": load(&self.frames_received),
                "frames_dropped": load(&self.frames_dropped),
                "joins_rejected": load(&self.joins_rejected),
                "controls_forwarded": load(&self.controls_forwarded),
                "deltas_sent": load(&self.deltas_sent),
            },
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }

    /// Body for `/health`
    pub fn health_json(&self) -> String {
        serde_json::json!({
            "ok": true,
            "tickId": self.tick_id.load(Ordering::Relaxed),
            "gameTime": self.game_time(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Route one raw request. Paths match exactly, query strings ignored.
fn route_request(request: &str, metrics: &Metrics, logs: &LogBuffer) -> String {
    let mut parts = request.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default();

    if method != "GET" {
        return "HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    }

    match path {
        "/health" | "/" => http_response("application/json", &metrics.health_json()),
        "/metrics/json" => http_response("application/json", &metrics.to_json()),
        "/metrics" => http_response("text/plain; version=0.0.4", &metrics.to_prometheus()),
        "/debug/logs" => http_response("application/json", &logs.to_json()),
        _ => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    }
}

/// Start the health/metrics/debug HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, logs: LogBuffer, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();
        let logs = logs.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = route_request(&request, &metrics, &logs);

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::orchestrator::OrchestratorConfig;

    fn body(response: &str) -> &str {
        response.split("\r\n\r\n").nth(1).unwrap_or_default()
    }

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.agents_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.speed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        let p95 = metrics.tick_time_p95_us.load(Ordering::Relaxed);
        let p99 = metrics.tick_time_p99_us.load(Ordering::Relaxed);
        assert!(p95 > 0 && p95 <= p99);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_record_simulation() {
        let mut sim = SimulationOrchestrator::new(OrchestratorConfig {
            agent_count: 6,
            ..OrchestratorConfig::default()
        });
        for tick_id in 1..=5 {
            sim.tick(tick_id);
        }

        let metrics = Metrics::new();
        metrics.record_simulation(&sim);

        assert_eq!(metrics.agents_total.load(Ordering::Relaxed), 6);
        let by_state: u64 = [
            &metrics.agents_idle,
            &metrics.agents_walking,
            &metrics.agents_conversing,
            &metrics.agents_activity,
            &metrics.agents_sleeping,
        ]
        .iter()
        .map(|v| v.load(Ordering::Relaxed))
        .sum();
        assert_eq!(by_state, 6);
        assert_eq!(metrics.tick_id.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.game_time(), sim.game_time());
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.agents_total.store(12, Ordering::Relaxed);
        metrics.agents_walking.store(3, Ordering::Relaxed);

        let output = metrics.to_prometheus();
        assert!(output.contains("hamlet_agents_total 12"));
        assert!(output.contains("hamlet_agents{state=\"walking\"} 3"));
        assert!(output.contains("hamlet_performance_state{state=\"excellent\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.agents_total.store(100, Ordering::Relaxed);
        metrics.queue_backpressure.store(2, Ordering::Relaxed);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["agents"]["total"], 100);
        assert_eq!(value["decisions"]["backpressure"], "critical");
        assert_eq!(value["simulation"]["game_time"]["hour"], 8);
    }

    #[test]
    fn test_routes() {
        let metrics = Metrics::new();
        metrics.tick_id.store(42, Ordering::Relaxed);
        let logs = LogBuffer::new(4);

        let health = route_request("GET /health HTTP/1.1\r\n\r\n", &metrics, &logs);
        let value: serde_json::Value = serde_json::from_str(body(&health)).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["tickId"], 42);
        assert_eq!(value["gameTime"]["day"], 1);

        let json = route_request("GET /metrics/json HTTP/1.1\r\n\r\n", &metrics, &logs);
        assert!(json.contains("application/json"));
        assert!(serde_json::from_str::<serde_json::Value>(body(&json)).is_ok());

        let text = route_request("GET /metrics HTTP/1.1\r\n\r\n", &metrics, &logs);
        assert!(text.contains("text/plain"));
        assert!(body(&text).contains("hamlet_tick_id 42"));

        let debug = route_request("GET /debug/logs HTTP/1.1\r\n\r\n", &metrics, &logs);
        assert!(body(&debug).contains("\"lines\""));

        let missing = route_request("GET /nope HTTP/1.1\r\n\r\n", &metrics, &logs);
        assert!(missing.starts_with("HTTP/1.1 404"));

        let post = route_request("POST /metrics HTTP/1.1\r\n\r\n", &metrics, &logs);
        assert!(post.starts_with("HTTP/1.1 405"));
    }
}
