//! Static-analysis detection pipeline.
//!
//! Delegates to an external static-analysis tool and adapts its
//! pass/fail-with-findings report into triggered rules. The tool itself is
//! behind the [`StaticAnalyzer`] trait; the default implementation shells
//! out to a configured program that reads source from stdin and prints a
//! JSON report on stdout.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::{PipelineId, PipelineResult, RuleAction, Severity, TriggeredRule, Verdict};
use crate::pipeline::{DetectionPipeline, PipelineExecutionError, RequestContext};

/// One finding reported by the analyzer.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerFinding {
    /// Analyzer-side rule identifier.
    pub rule_id: String,
    /// What the analyzer found.
    pub message: String,
    /// Offending source excerpt, when the analyzer provides one.
    #[serde(default)]
    pub snippet: Option<String>,
    /// Whether the finding should block execution (vs. flag it).
    #[serde(default)]
    pub blocking: bool,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Report produced by one analyzer invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisReport {
    /// True when the source passed with no findings of consequence.
    pub passed: bool,
    #[serde(default)]
    pub findings: Vec<AnalyzerFinding>,
}

/// External static-analysis invocation.
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    async fn analyze(&self, source: &str) -> Result<AnalysisReport, PipelineExecutionError>;
}

/// Runs a configured external analyzer process per request.
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
}

impl CommandAnalyzer {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait]
impl StaticAnalyzer for CommandAnalyzer {
    async fn analyze(&self, source: &str) -> Result<AnalysisReport, PipelineExecutionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineExecutionError::Internal(format!(
                    "failed to spawn analyzer '{}': {}",
                    self.program, e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes()).await.map_err(|e| {
                PipelineExecutionError::Internal(format!("failed to feed analyzer: {}", e))
            })?;
        }

        let output = child.wait_with_output().await.map_err(|e| {
            PipelineExecutionError::Internal(format!("analyzer did not complete: {}", e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineExecutionError::Internal(format!(
                "analyzer exited with {}: {}",
                output.status, stderr
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            PipelineExecutionError::Internal(format!("malformed analyzer report: {}", e))
        })
    }
}

pub struct CodeAnalysisPipeline {
    analyzer: Arc<dyn StaticAnalyzer>,
}

impl CodeAnalysisPipeline {
    pub fn new(analyzer: Arc<dyn StaticAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl DetectionPipeline for CodeAnalysisPipeline {
    fn id(&self) -> PipelineId {
        PipelineId::CodeAnalysis
    }

    fn display_name(&self) -> &str {
        "Code Analysis Pipeline"
    }

    fn description(&self) -> &str {
        "Runs code destined for execution through an external static analyzer"
    }

    async fn execute(
        &self,
        text: &str,
        _ctx: &RequestContext,
    ) -> Result<PipelineResult, PipelineExecutionError> {
        let report = self.analyzer.analyze(text).await?;

        if report.passed && report.findings.is_empty() {
            return Ok(PipelineResult::clear(self.id(), self.display_name()));
        }

        let triggered: Vec<TriggeredRule> = report
            .findings
            .into_iter()
            .map(|finding| TriggeredRule {
                rule_id: format!("code_analysis.{}", finding.rule_id),
                name: finding.rule_id,
                detail: finding.message,
                matched: finding.snippet.unwrap_or_default(),
                action: if finding.blocking {
                    RuleAction::Block
                } else {
                    RuleAction::Notify
                },
                severity: finding.severity,
                category: finding.category,
            })
            .collect();

        // A failed report with no findings still means the analyzer refused
        // the source; surface that as a notify so it stays visible.
        let verdict = triggered
            .iter()
            .map(|r| r.action.verdict())
            .max()
            .unwrap_or(if report.passed {
                Verdict::Allow
            } else {
                Verdict::Notify
            });

        Ok(PipelineResult::completed(
            self.id(),
            self.display_name(),
            verdict,
            triggered,
        ))
    }
}
