//! Per-pipeline and aggregate result types.
//!
//! Every pipeline kind reports through the same `PipelineResult` shape, so
//! the merge into an `AggregateResult` never branches on pipeline kind.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{TriggeredRule, Verdict};

/// Fixed enumeration of detection pipeline kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineId {
    Rule,
    Similarity,
    CodeAnalysis,
    Ml,
    Llm,
}

impl PipelineId {
    /// All pipeline kinds in canonical execution order.
    pub const ALL: [PipelineId; 5] = [
        PipelineId::Similarity,
        PipelineId::CodeAnalysis,
        PipelineId::Rule,
        PipelineId::Ml,
        PipelineId::Llm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineId::Rule => "rule",
            PipelineId::Similarity => "similarity",
            PipelineId::CodeAnalysis => "code_analysis",
            PipelineId::Ml => "ml",
            PipelineId::Llm => "llm",
        }
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rule" => Ok(PipelineId::Rule),
            "similarity" => Ok(PipelineId::Similarity),
            "code_analysis" => Ok(PipelineId::CodeAnalysis),
            "ml" => Ok(PipelineId::Ml),
            "llm" => Ok(PipelineId::Llm),
            _ => Err(format!("Unknown pipeline: {}", s)),
        }
    }
}

/// Outcome of one pipeline execution.
///
/// `Indeterminate` marks an execution failure (timeout, dead backend,
/// internal fault). It contributes nothing to the aggregate verdict but
/// stays visible to the caller and the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Allow,
    Notify,
    Block,
    Indeterminate,
}

impl PipelineStatus {
    /// The verdict this status contributes to the aggregate, if any.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            PipelineStatus::Allow => Some(Verdict::Allow),
            PipelineStatus::Notify => Some(Verdict::Notify),
            PipelineStatus::Block => Some(Verdict::Block),
            PipelineStatus::Indeterminate => None,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, PipelineStatus::Indeterminate)
    }
}

impl From<Verdict> for PipelineStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allow => PipelineStatus::Allow,
            Verdict::Notify => PipelineStatus::Notify,
            Verdict::Block => PipelineStatus::Block,
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Allow => write!(f, "allow"),
            PipelineStatus::Notify => write!(f, "notify"),
            PipelineStatus::Block => write!(f, "block"),
            PipelineStatus::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Result of a single pipeline run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PipelineResult {
    /// Which pipeline produced this result.
    pub pipeline: PipelineId,
    /// Display name of the pipeline.
    pub name: String,
    /// Outcome of the run.
    pub status: PipelineStatus,
    /// Rules that fired, in detection order.
    pub triggered_rules: Vec<TriggeredRule>,
    /// Extra detail, e.g. the failure reason for an indeterminate result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PipelineResult {
    /// A completed result carrying a verdict and the rules behind it.
    pub fn completed(
        pipeline: PipelineId,
        name: impl Into<String>,
        verdict: Verdict,
        triggered_rules: Vec<TriggeredRule>,
    ) -> Self {
        Self {
            pipeline,
            name: name.into(),
            status: verdict.into(),
            triggered_rules,
            detail: None,
        }
    }

    /// A clean pass with no findings.
    pub fn clear(pipeline: PipelineId, name: impl Into<String>) -> Self {
        Self::completed(pipeline, name, Verdict::Allow, Vec::new())
    }

    /// An indeterminate result synthesized from an execution failure.
    pub fn indeterminate(
        pipeline: PipelineId,
        name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            name: name.into(),
            status: PipelineStatus::Indeterminate,
            triggered_rules: Vec::new(),
            detail: Some(detail.into()),
        }
    }
}

/// Aggregate outcome of one request through one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AggregateResult {
    /// Maximum-severity verdict across all completed pipeline results.
    pub verdict: Verdict,
    /// True when every pipeline in the flow came back indeterminate. The
    /// verdict is then `Allow` by policy, but the request should be alerted
    /// on rather than trusted.
    pub degraded: bool,
    /// Per-pipeline results in the flow's declared order.
    pub results: Vec<PipelineResult>,
}

impl AggregateResult {
    /// Merge ordered pipeline results into the aggregate.
    ///
    /// The verdict is the maximum severity among non-indeterminate results;
    /// an empty or all-indeterminate list yields `Allow`, with `degraded`
    /// set in the all-indeterminate case.
    pub fn merge(results: Vec<PipelineResult>) -> Self {
        let verdict = results
            .iter()
            .filter_map(|r| r.status.verdict())
            .max()
            .unwrap_or(Verdict::Allow);

        let degraded =
            !results.is_empty() && results.iter().all(|r| r.status.is_indeterminate());

        Self {
            verdict,
            degraded,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(id: PipelineId, verdict: Verdict) -> PipelineResult {
        PipelineResult::completed(id, id.as_str(), verdict, Vec::new())
    }

    #[test]
    fn test_merge_takes_max_severity() {
        let agg = AggregateResult::merge(vec![
            completed(PipelineId::Rule, Verdict::Notify),
            completed(PipelineId::Similarity, Verdict::Block),
            completed(PipelineId::Llm, Verdict::Allow),
        ]);
        assert_eq!(agg.verdict, Verdict::Block);
        assert!(!agg.degraded);
        assert_eq!(agg.results.len(), 3);
    }

    #[test]
    fn test_merge_empty_is_allow() {
        let agg = AggregateResult::merge(Vec::new());
        assert_eq!(agg.verdict, Verdict::Allow);
        assert!(!agg.degraded);
    }

    #[test]
    fn test_merge_ignores_indeterminate() {
        let agg = AggregateResult::merge(vec![
            PipelineResult::indeterminate(PipelineId::Llm, "llm", "timeout"),
            completed(PipelineId::Rule, Verdict::Notify),
        ]);
        assert_eq!(agg.verdict, Verdict::Notify);
        assert!(!agg.degraded);
    }

    #[test]
    fn test_merge_all_indeterminate_is_degraded_allow() {
        let agg = AggregateResult::merge(vec![
            PipelineResult::indeterminate(PipelineId::Llm, "llm", "timeout"),
            PipelineResult::indeterminate(PipelineId::Ml, "ml", "backend down"),
        ]);
        assert_eq!(agg.verdict, Verdict::Allow);
        assert!(agg.degraded);
    }

    #[test]
    fn test_merge_preserves_declared_order() {
        let agg = AggregateResult::merge(vec![
            completed(PipelineId::Similarity, Verdict::Allow),
            completed(PipelineId::Rule, Verdict::Allow),
        ]);
        assert_eq!(agg.results[0].pipeline, PipelineId::Similarity);
        assert_eq!(agg.results[1].pipeline, PipelineId::Rule);
    }

    #[test]
    fn test_pipeline_id_round_trip() {
        for id in PipelineId::ALL {
            assert_eq!(id.as_str().parse::<PipelineId>(), Ok(id));
        }
    }
}
