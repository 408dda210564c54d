//! Verdict and rule types shared by all detection pipelines.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Final classification of a piece of input text.
///
/// Ordered by severity: `Block > Notify > Allow`. The aggregate verdict of a
/// request is the maximum over its pipeline verdicts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Input passed all checks.
    Allow,
    /// Input should be flagged but not stopped.
    Notify,
    /// Input must not reach the downstream model.
    Block,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Allow => write!(f, "allow"),
            Verdict::Notify => write!(f, "notify"),
            Verdict::Block => write!(f, "block"),
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(Verdict::Allow),
            "notify" => Ok(Verdict::Notify),
            "block" => Ok(Verdict::Block),
            _ => Err(format!("Unknown verdict: {}", s)),
        }
    }
}

/// Action attached to a detection rule.
///
/// A rule that did not trigger is simply absent, so there is no `Allow`
/// variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Notify,
    Block,
}

impl RuleAction {
    /// The verdict this action maps to when the rule triggers.
    pub fn verdict(self) -> Verdict {
        match self {
            RuleAction::Notify => Verdict::Notify,
            RuleAction::Block => Verdict::Block,
        }
    }
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleAction::Notify => write!(f, "notify"),
            RuleAction::Block => write!(f, "block"),
        }
    }
}

/// Severity classification for a triggered rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A detection rule that fired against the input.
///
/// Rule-based pipelines produce one entry per matching rule. Pipelines
/// without discrete rules (similarity, ML, LLM) synthesize a single entry
/// explaining their non-ALLOW verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TriggeredRule {
    /// Stable identifier of the rule.
    pub rule_id: String,
    /// Human-readable rule name.
    pub name: String,
    /// Free-text explanation of why the rule fired.
    pub detail: String,
    /// The raw content that matched.
    pub matched: String,
    /// What the rule asks the gateway to do.
    pub action: RuleAction,
    /// Optional severity classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Optional category code (e.g. a taxonomy label).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_severity_ordering() {
        assert!(Verdict::Block > Verdict::Notify);
        assert!(Verdict::Notify > Verdict::Allow);
        assert_eq!(
            [Verdict::Notify, Verdict::Allow, Verdict::Block]
                .into_iter()
                .max(),
            Some(Verdict::Block)
        );
    }

    #[test]
    fn test_verdict_serialization() {
        let json = serde_json::to_string(&Verdict::Notify).unwrap();
        assert_eq!(json, "\"notify\"");
    }

    #[test]
    fn test_rule_action_maps_to_verdict() {
        assert_eq!(RuleAction::Block.verdict(), Verdict::Block);
        assert_eq!(RuleAction::Notify.verdict(), Verdict::Notify);
    }
}
