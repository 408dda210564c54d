//! LLM reasoning detection pipeline.
//!
//! Sends the input to the LLM manager's active reasoning backend and maps
//! the model's assessment into a pipeline result. A non-ALLOW assessment is
//! surfaced as one synthetic triggered rule carrying the model's rationale.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{PipelineId, PipelineResult, RuleAction, TriggeredRule, Verdict};
use crate::manager::{BackendRegistry, LlmBackend};
use crate::pipeline::{DetectionPipeline, PipelineExecutionError, RequestContext};

pub struct LlmPipeline {
    manager: Arc<BackendRegistry<dyn LlmBackend>>,
}

impl LlmPipeline {
    pub fn new(manager: Arc<BackendRegistry<dyn LlmBackend>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl DetectionPipeline for LlmPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Llm
    }

    fn display_name(&self) -> &str {
        "LLM Pipeline"
    }

    fn description(&self) -> &str {
        "Asks a reasoning model to assess the input"
    }

    fn is_enabled(&self) -> bool {
        self.manager.has_active()
    }

    async fn execute(
        &self,
        text: &str,
        _ctx: &RequestContext,
    ) -> Result<PipelineResult, PipelineExecutionError> {
        // Resolved per request so a backend switch applies immediately.
        let backend = self
            .manager
            .resolve_active()
            .ok_or(PipelineExecutionError::NoActiveBackend { manager: "llm" })?;

        let assessment = backend.assess(text).await?;

        let triggered = match assessment.verdict {
            Verdict::Allow => Vec::new(),
            verdict => vec![TriggeredRule {
                rule_id: "llm.assessment".to_string(),
                name: "Reasoning model assessment".to_string(),
                detail: assessment.reason,
                matched: String::new(),
                action: if verdict == Verdict::Block {
                    RuleAction::Block
                } else {
                    RuleAction::Notify
                },
                severity: None,
                category: None,
            }],
        };

        Ok(PipelineResult::completed(
            self.id(),
            self.display_name(),
            assessment.verdict,
            triggered,
        ))
    }
}
