//! Detection pipelines.
//!
//! Each pipeline implements one detection strategy behind a common contract;
//! the orchestrator treats all kinds identically. Pipeline kinds are a fixed
//! enumeration ([`PipelineId`]) and the registry maps each kind to at most
//! one live instance, so dispatch never goes through string keys.

mod code_analysis;
mod llm;
mod ml;
mod rule;
mod similarity;

pub use code_analysis::*;
pub use llm::*;
pub use ml::*;
pub use rule::*;
pub use similarity::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{PipelineId, PipelineResult};
use crate::manager::BackendError;

/// Typed failure of one pipeline execution.
///
/// The orchestrator converts every variant into an indeterminate result for
/// that pipeline alone; it never aborts the request or sibling pipelines.
#[derive(Debug, Error)]
pub enum PipelineExecutionError {
    /// The manager this pipeline depends on has no active backend.
    #[error("no active {manager} backend available")]
    NoActiveBackend { manager: &'static str },

    /// The backend call failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Anything else that went wrong inside the pipeline.
    #[error("internal pipeline fault: {0}")]
    Internal(String),
}

/// Per-request context handed to every pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Caller-supplied correlation identifier.
    pub task_id: Option<String>,
    /// Overall request deadline. Pipelines are additionally bounded by their
    /// own per-pipeline deadline, enforced by the orchestrator.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    /// Time left before the overall deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Contract implemented by every detection pipeline.
#[async_trait]
pub trait DetectionPipeline: Send + Sync {
    /// Which pipeline kind this is.
    fn id(&self) -> PipelineId;

    /// Human-readable name.
    fn display_name(&self) -> &str;

    /// Short description for the flow listing.
    fn description(&self) -> &str;

    /// Whether this pipeline is ready to execute. Disabled pipelines are not
    /// registered, so this is informational on live instances.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Run the detection strategy against the input.
    ///
    /// Must fail only with [`PipelineExecutionError`]; the orchestrator
    /// enforces the execution deadline externally.
    async fn execute(
        &self,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<PipelineResult, PipelineExecutionError>;
}

/// Live registry of pipeline instances, one slot per kind.
#[derive(Default)]
pub struct PipelineRegistry {
    rule: Option<Arc<dyn DetectionPipeline>>,
    similarity: Option<Arc<dyn DetectionPipeline>>,
    code_analysis: Option<Arc<dyn DetectionPipeline>>,
    ml: Option<Arc<dyn DetectionPipeline>>,
    llm: Option<Arc<dyn DetectionPipeline>>,
}

impl PipelineRegistry {
    fn slot(&self, id: PipelineId) -> &Option<Arc<dyn DetectionPipeline>> {
        match id {
            PipelineId::Rule => &self.rule,
            PipelineId::Similarity => &self.similarity,
            PipelineId::CodeAnalysis => &self.code_analysis,
            PipelineId::Ml => &self.ml,
            PipelineId::Llm => &self.llm,
        }
    }

    /// Register a pipeline in its kind's slot, replacing any previous one.
    pub fn register(&mut self, pipeline: Arc<dyn DetectionPipeline>) {
        let slot = match pipeline.id() {
            PipelineId::Rule => &mut self.rule,
            PipelineId::Similarity => &mut self.similarity,
            PipelineId::CodeAnalysis => &mut self.code_analysis,
            PipelineId::Ml => &mut self.ml,
            PipelineId::Llm => &mut self.llm,
        };
        tracing::info!(pipeline = %pipeline.id(), "Pipeline registered");
        *slot = Some(pipeline);
    }

    /// Look up the live instance for a pipeline kind.
    pub fn get(&self, id: PipelineId) -> Option<Arc<dyn DetectionPipeline>> {
        self.slot(id).as_ref().map(Arc::clone)
    }

    /// Registered pipeline kinds in canonical execution order.
    pub fn registered_ids(&self) -> Vec<PipelineId> {
        PipelineId::ALL
            .into_iter()
            .filter(|id| self.slot(*id).is_some())
            .collect()
    }
}
