//! Orchestration engine for Bastion Core.
//!
//! This module contains the request path:
//! - Flow Registry: resolves a flow name to an ordered pipeline list
//! - Orchestrator: runs the flow's pipelines and merges their verdicts
//! - Event Emitter: publishes records for non-ALLOW outcomes

mod events;
mod flow;
mod orchestrator;

pub use events::*;
pub use flow::*;
pub use orchestrator::*;
