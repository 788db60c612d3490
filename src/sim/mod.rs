//! Town simulation core
//!
//! Everything here runs on the tick path except provider futures spawned by
//! the decision queue.

pub mod constants;
pub mod time;
pub mod metrics;
pub mod performance;
pub mod scheduler;
pub mod map;
pub mod state;
pub mod route;
pub mod control;
pub mod events;
pub mod decision;
pub mod decision_queue;
pub mod conversation;
pub mod systems;
pub mod orchestrator;

#[cfg(feature = "llm")]
pub mod llm;

pub use control::{ControlAction, ControlEvent, ControlRejection};
pub use decision::{DecisionOutcome, DecisionProvider, HeuristicDecisionProvider};
pub use events::{DomainEvent, StateEvent};
pub use metrics::{Backpressure, SimulationMetrics};
pub use orchestrator::{OrchestratorConfig, SimulationOrchestrator};
pub use scheduler::{SchedulerConfig, SchedulerDriver, TickScheduler};
pub use time::GameTime;
