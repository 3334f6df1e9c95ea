//! Scheduling for the pipeline.
//!
//! The orchestrator owns two independent loops:
//! - **Poll**: fetches every feed and hands new matches to the intake
//! - **Reconcile**: pushes unfinished releases through the downloader
//!
//! The loops share nothing but the store. Both passes can also be
//! triggered out of cycle.

mod runner;
mod types;

pub use runner::Orchestrator;
pub use types::{OrchestratorError, OrchestratorSettings, OrchestratorStatus};
