//! Hamlet Server Library
//!
//! A tick-driven town simulation streamed to viewers over WebTransport.
//!
//! # Features
//!
//! - `metrics_extended` - Decision queue and path cache series in the Prometheus output (enabled by default)
//! - `llm` - HTTP decision client for agent reasoning (requires an API key at runtime)

pub mod config;
pub mod logging;
pub mod metrics;
pub mod net;
pub mod sim;
pub mod stress;
pub mod util;
