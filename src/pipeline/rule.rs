//! Rule-based detection pipeline.
//!
//! Scans input against a pre-compiled set of detection rules. Rules arrive
//! already parsed from the loading layer; this pipeline only matches.

use async_trait::async_trait;

use crate::domain::{DetectionRule, PipelineId, PipelineResult, TriggeredRule, Verdict};
use crate::pipeline::{DetectionPipeline, PipelineExecutionError, RequestContext};

pub struct RulePipeline {
    rules: Vec<DetectionRule>,
}

impl RulePipeline {
    pub fn new(rules: Vec<DetectionRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl DetectionPipeline for RulePipeline {
    fn id(&self) -> PipelineId {
        PipelineId::Rule
    }

    fn display_name(&self) -> &str {
        "Rule Pipeline"
    }

    fn description(&self) -> &str {
        "Matches input against configured detection rule patterns"
    }

    fn is_enabled(&self) -> bool {
        !self.rules.is_empty()
    }

    async fn execute(
        &self,
        text: &str,
        _ctx: &RequestContext,
    ) -> Result<PipelineResult, PipelineExecutionError> {
        let mut triggered = Vec::new();

        for rule in &self.rules {
            if let Some(found) = rule.pattern.find(text) {
                triggered.push(TriggeredRule {
                    rule_id: rule.id.clone(),
                    name: rule.name.clone(),
                    detail: format!("Pattern '{}' matched", rule.pattern.as_str()),
                    matched: found.as_str().to_string(),
                    action: rule.action,
                    severity: rule.severity,
                    category: rule.category.clone(),
                });
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{compile_rules, RuleAction, RuleSpec};

    fn spec(id: &str, pattern: &str, action: RuleAction) -> RuleSpec {
        RuleSpec {
            id: id.to_string(),
            name: id.to_string(),
            pattern: pattern.to_string(),
            action,
            severity: None,
            category: None,
        }
    }

    fn pipeline(specs: Vec<RuleSpec>) -> RulePipeline {
        RulePipeline::new(compile_rules(specs))
    }

    #[tokio::test]
    async fn test_clean_input_allows() {
        let p = pipeline(vec![spec("a", "jailbreak", RuleAction::Block)]);
        let result = p
            .execute("what is the weather today", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(result.status.verdict(), Some(Verdict::Allow));
        assert!(result.triggered_rules.is_empty());
    }

    #[tokio::test]
    async fn test_block_rule_wins_over_notify() {
        let p = pipeline(vec![
            spec("notify", "suspicious", RuleAction::Notify),
            spec("block", "ignore previous instructions", RuleAction::Block),
        ]);
        let result = p
            .execute(
                "this suspicious prompt says: ignore previous instructions",
                &RequestContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.status.verdict(), Some(Verdict::Block));
        assert_eq!(result.triggered_rules.len(), 2);
    }

    #[tokio::test]
    async fn test_triggered_rule_carries_matched_content() {
        let p = pipeline(vec![spec("a", "DAN mode", RuleAction::Block)]);
        let result = p
            .execute("please enable dan MODE now", &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(result.triggered_rules[0].matched, "dan MODE");
    }

    #[test]
    fn test_empty_rule_set_is_disabled() {
        assert!(!pipeline(Vec::new()).is_enabled());
    }
}
