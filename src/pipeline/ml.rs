//! ML classifier detection pipeline.
//!
//! Model inference lives behind the [`InferenceBackend`] trait; the pipeline
//! only turns the returned score into a verdict via configured thresholds.
//! The default implementation calls an HTTP scoring service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::domain::{PipelineId, PipelineResult, RuleAction, TriggeredRule, Verdict};
use crate::manager::BackendError;
use crate::pipeline::{DetectionPipeline, PipelineExecutionError, RequestContext};

/// Scoring collaborator: maps text to a risk score in `[0, 1]`.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn score(&self, text: &str) -> Result<f64, BackendError>;
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
    #[serde(default)]
    label: Option<String>,
}

/// Client for an HTTP scoring service.
pub struct HttpScorer {
    client: Client,
    url: String,
}

impl HttpScorer {
    pub fn new(url: String, timeout_secs: u64) -> Result<Arc<Self>, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;
        Ok(Arc::new(Self { client, url }))
    }
}

#[async_trait]
impl InferenceBackend for HttpScorer {
    async fn score(&self, text: &str) -> Result<f64, BackendError> {
        let response = self
            .client
            .post(&self.url)
            .json(&ScoreRequest { text })
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BackendError::Response(format!(
                "scoring service returned {}",
                response.status()
            )));
        }

        let parsed: ScoreResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Response(e.to_string()))?;

        if let Some(label) = parsed.label {
            tracing::debug!(score = parsed.score, label = %label, "Classifier response");
        }

        Ok(parsed.score)
    }
}

pub struct MlPipeline {
    scorer: Arc<dyn InferenceBackend>,
    thresholds: Thresholds,
}

impl MlPipeline {
    pub fn new(scorer: Arc<dyn InferenceBackend>, thresholds: Thresholds) -> Self {
        Self { scorer, thresholds }
    }
}

#[async_trait]
impl DetectionPipeline for MlPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Ml
    }

    fn display_name(&self) -> &str {
        "ML Pipeline"
    }

    fn description(&self) -> &str {
        "Applies thresholds to a trained classifier's risk score"
    }

    async fn execute(
        &self,
        text: &str,
        _ctx: &RequestContext,
    ) -> Result<PipelineResult, PipelineExecutionError> {
        let score = self.scorer.score(text).await?;
        let verdict = self.thresholds.classify(score);

        let triggered = match verdict {
            Verdict::Allow => Vec::new(),
            Verdict::Notify | Verdict::Block => vec![TriggeredRule {
                rule_id: "ml.classifier_score".to_string(),
                name: "Classifier risk score".to_string(),
                detail: format!("Risk score {:.3} crossed the {} threshold", score, verdict),
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
            verdict,
            triggered,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedScorer(f64);

    #[async_trait]
    impl InferenceBackend for FixedScorer {
        async fn score(&self, _text: &str) -> Result<f64, BackendError> {
            Ok(self.0)
        }
    }

    fn pipeline(score: f64) -> MlPipeline {
        MlPipeline::new(
            Arc::new(FixedScorer(score)),
            Thresholds {
                notify_threshold: 0.7,
                block_threshold: 0.87,
            },
        )
    }

    #[tokio::test]
    async fn test_score_below_notify_allows() {
        let result = pipeline(0.5)
            .execute("input", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(result.status.verdict(), Some(Verdict::Allow));
        assert!(result.triggered_rules.is_empty());
    }

    #[tokio::test]
    async fn test_score_between_thresholds_notifies() {
        let result = pipeline(0.75)
            .execute("input", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(result.status.verdict(), Some(Verdict::Notify));
        assert_eq!(result.triggered_rules.len(), 1);
    }

    #[tokio::test]
    async fn test_score_at_block_threshold_blocks() {
        let result = pipeline(0.87)
            .execute("input", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(result.status.verdict(), Some(Verdict::Block));
    }

    #[tokio::test]
    async fn test_scorer_failure_propagates_as_execution_error() {
        struct FailingScorer;

        #[async_trait]
        impl InferenceBackend for FailingScorer {
            async fn score(&self, _text: &str) -> Result<f64, BackendError> {
                Err(BackendError::Request("connection refused".to_string()))
            }
        }

        let p = MlPipeline::new(Arc::new(FailingScorer), Thresholds::default());
        let err = p
            .execute("input", &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineExecutionError::Backend(_)));
    }
}
