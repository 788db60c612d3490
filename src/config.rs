use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::sim::constants::{decision, tick, time};
use crate::sim::decision_queue::QueueConfig;
use crate::sim::orchestrator::OrchestratorConfig;
use crate::sim::scheduler::SchedulerConfig;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// WebTransport port
    pub port: u16,
    /// Port for health, metrics and debug endpoints
    pub metrics_port: u16,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,

    // Scheduler
    pub tick_interval_ms: u64,
    pub max_catch_up_ticks: u32,

    // Simulation
    pub sim_seed: u64,
    pub agent_count: usize,
    pub minutes_per_tick: u32,

    // Decision service
    pub llm_enabled: bool,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_endpoint: Option<String>,
    pub llm_timeout_ms: u64,
    pub decision_queue_capacity: usize,

    /// Lines kept for `/debug/logs`
    pub log_buffer_lines: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            metrics_port: 9090,
            tls_cert_path: None,
            tls_key_path: None,
            tick_interval_ms: tick::DEFAULT_INTERVAL_MS,
            max_catch_up_ticks: tick::DEFAULT_MAX_CATCH_UP,
            sim_seed: 1,
            agent_count: 12,
            minutes_per_tick: time::DEFAULT_MINUTES_PER_TICK,
            llm_enabled: false,
            llm_api_key: None,
            llm_model: "claude-3-5-haiku-latest".to_string(),
            llm_endpoint: None,
            llm_timeout_ms: decision::DEFAULT_REQUEST_TIMEOUT_MS,
            decision_queue_capacity: decision::DEFAULT_QUEUE_CAPACITY,
            log_buffer_lines: 500,
        }
    }
}

/// Parse `name` through `lookup`; invalid or out-of-range values are logged and ignored
pub(crate) fn parse_var<T, L, V>(lookup: &L, name: &str, valid: V, expected: &str) -> Option<T>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
    V: Fn(&T) -> bool,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) if valid(&parsed) => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} must be {}, using default", name, expected);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

pub(crate) fn parse_bool<L: Fn(&str) -> Option<String>>(lookup: &L, name: &str) -> Option<bool> {
    let raw = lookup(name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::load_from(|name| std::env::var(name).ok())
    }

    pub fn load_from<L: Fn(&str) -> Option<String>>(lookup: L) -> Self {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "BIND_ADDRESS", |_: &IpAddr| true, "an IP address") {
            config.bind_address = v;
        }
        if let Some(v) = parse_var(&lookup, "PORT", |p: &u16| *p > 0, "> 0") {
            config.port = v;
        }
        if let Some(v) = parse_var(&lookup, "METRICS_PORT", |p: &u16| *p > 0, "> 0") {
            config.metrics_port = v;
        }
        config.tls_cert_path = lookup("TLS_CERT_PATH").or(config.tls_cert_path);
        config.tls_key_path = lookup("TLS_KEY_PATH").or(config.tls_key_path);

        if let Some(v) = parse_var(&lookup, "TICK_INTERVAL_MS", |v: &u64| (10..=10_000).contains(v), "10-10000") {
            config.tick_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_CATCH_UP_TICKS", |v: &u32| (1..=100).contains(v), "1-100") {
            config.max_catch_up_ticks = v;
        }
        if let Some(v) = parse_var(&lookup, "SIM_SEED", |_: &u64| true, "an unsigned integer") {
            config.sim_seed = v;
        }
        if let Some(v) = parse_var(&lookup, "AGENT_COUNT", |v: &usize| (1..=10_000).contains(v), "1-10000") {
            config.agent_count = v;
        }
        if let Some(v) = parse_var(&lookup, "MINUTES_PER_TICK", |v: &u32| (1..=60).contains(v), "1-60") {
            config.minutes_per_tick = v;
        }

        if let Some(v) = parse_bool(&lookup, "LLM_ENABLED") {
            config.llm_enabled = v;
        }
        config.llm_api_key = lookup("LLM_API_KEY").filter(|k| !k.is_empty());
        if let Some(model) = lookup("LLM_MODEL").filter(|m| !m.is_empty()) {
            config.llm_model = model;
        }
        config.llm_endpoint = lookup("LLM_ENDPOINT").filter(|e| !e.is_empty());
        if let Some(v) = parse_var(&lookup, "LLM_TIMEOUT_MS", |v: &u64| *v >= 100, ">= 100") {
            config.llm_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "DECISION_QUEUE_CAPACITY", |v: &usize| (1..=100_000).contains(v), "1-100000") {
            config.decision_queue_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "LOG_BUFFER_LINES", |v: &usize| (1..=100_000).contains(v), "1-100000") {
            config.log_buffer_lines = v;
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.port == self.metrics_port {
            return Err("metrics_port must differ from port".to_string());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be at least 1".to_string());
        }
        if self.max_catch_up_ticks == 0 {
            return Err("max_catch_up_ticks must be at least 1".to_string());
        }
        if self.agent_count == 0 {
            return Err("agent_count must be at least 1".to_string());
        }
        if self.minutes_per_tick == 0 {
            return Err("minutes_per_tick must be at least 1".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_ms: self.tick_interval_ms,
            max_catch_up_ticks: self.max_catch_up_ticks,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            seed: self.sim_seed,
            agent_count: self.agent_count,
            minutes_per_tick: self.minutes_per_tick,
            llm_enabled: self.llm_enabled,
            tick_budget: Duration::from_millis(self.tick_interval_ms),
            queue: QueueConfig {
                capacity: self.decision_queue_capacity,
                request_timeout: Duration::from_millis(self.llm_timeout_ms),
                ..QueueConfig::default()
            },
            ..OrchestratorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.tick_interval_ms, 200);
        assert_eq!(config.max_catch_up_ticks, 5);
        assert!(!config.llm_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_env() {
        let config = ServerConfig::load_from(env(&[
            ("PORT", "5000"),
            ("TICK_INTERVAL_MS", "100"),
            ("SIM_SEED", "99"),
            ("AGENT_COUNT", "25"),
            ("LLM_ENABLED", "true"),
            ("LLM_API_KEY", "k"),
            ("DECISION_QUEUE_CAPACITY", "8"),
        ]));
        assert_eq!(config.port, 5000);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.sim_seed, 99);
        assert_eq!(config.agent_count, 25);
        assert!(config.llm_enabled);
        assert_eq!(config.llm_api_key.as_deref(), Some("k"));

        let sim = config.orchestrator_config();
        assert_eq!(sim.seed, 99);
        assert_eq!(sim.queue.capacity, 8);
        assert_eq!(sim.tick_budget, Duration::from_millis(100));
        assert_eq!(config.scheduler_config().tick_interval_ms, 100);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::load_from(env(&[
            ("PORT", "0"),
            ("TICK_INTERVAL_MS", "fast"),
            ("AGENT_COUNT", "0"),
            ("LLM_ENABLED", "maybe"),
            ("BIND_ADDRESS", "not-an-ip"),
        ]));
        let defaults = ServerConfig::default();
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.tick_interval_ms, defaults.tick_interval_ms);
        assert_eq!(config.agent_count, defaults.agent_count);
        assert_eq!(config.llm_enabled, defaults.llm_enabled);
        assert_eq!(config.bind_address, defaults.bind_address);
    }

    #[test]
    fn test_validate_tls_pair() {
        let config = ServerConfig::load_from(env(&[("TLS_CERT_PATH", "cert.pem")]));
        assert!(config.validate().is_err());
    }
}
