//! Similarity-based detection pipeline.
//!
//! Looks the input up in a vector index of known-bad prompts through the
//! similarity manager's active backend and applies score thresholds to the
//! hits. The backend is resolved per execution, so a manager switch applies
//! to the next request without restarting the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Thresholds;
use crate::domain::{PipelineId, PipelineResult, RuleAction, TriggeredRule, Verdict};
use crate::manager::{BackendRegistry, SearchBackend, SimilarityHit};
use crate::pipeline::{DetectionPipeline, PipelineExecutionError, RequestContext};

pub struct SimilarityPipeline {
    manager: Arc<BackendRegistry<dyn SearchBackend>>,
    thresholds: Thresholds,
}

impl SimilarityPipeline {
    pub fn new(manager: Arc<BackendRegistry<dyn SearchBackend>>, thresholds: Thresholds) -> Self {
        Self {
            manager,
            thresholds,
        }
    }

    /// Keep the highest-scoring hit per category.
    fn dedupe(hits: Vec<SimilarityHit>) -> Vec<SimilarityHit> {
        let mut by_category: HashMap<String, SimilarityHit> = HashMap::new();
        for hit in hits {
            match by_category.get(&hit.category) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    by_category.insert(hit.category.clone(), hit);
                }
            }
        }
        let mut deduped: Vec<SimilarityHit> = by_category.into_values().collect();
        deduped.sort_by(|a, b| b.score.total_cmp(&a.score));
        deduped
    }
}

#[async_trait]
impl DetectionPipeline for SimilarityPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Similarity
    }

    fn display_name(&self) -> &str {
        "Similarity Pipeline"
    }

    fn description(&self) -> &str {
        "Finds known-bad prompts similar to the input via vector search"
    }

    fn is_enabled(&self) -> bool {
        self.manager.has_active()
    }

    async fn execute(
        &self,
        text: &str,
        _ctx: &RequestContext,
    ) -> Result<PipelineResult, PipelineExecutionError> {
        let backend = self
            .manager
            .resolve_active()
            .ok_or(PipelineExecutionError::NoActiveBackend {
                manager: "similarity",
            })?;

        let hits = backend.search(text).await?;

        let mut triggered = Vec::new();
        for hit in Self::dedupe(hits) {
            let verdict = self.thresholds.classify(hit.score);
            let action = match verdict {
                Verdict::Block => RuleAction::Block,
                Verdict::Notify => RuleAction::Notify,
                Verdict::Allow => continue,
            };
            triggered.push(TriggeredRule {
                rule_id: format!("similarity.{}", hit.category),
                name: "Similar known-bad prompt".to_string(),
                detail: format!("Similarity score {:.3} to stored prompt", hit.score),
                matched: hit.content,
                action,
                severity: None,
                category: Some(hit.category),
            });
        }

        let verdict = triggered
            .iter()
            .map(|r| r.action.verdict())
            .max()
            .unwrap_or(Verdict::Allow);

        Ok(PipelineResult::completed(
            self.id(),
            self.display_name(),
            verdict,
            triggered,
        ))
    }
}
