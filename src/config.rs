//! Configuration module for Bastion Core.
//!
//! Loads configuration from YAML files and environment variables.

use std::collections::HashMap;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

use crate::domain::{PipelineId, RuleSpec, Verdict};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub safety: SafetyConfig,
    pub similarity: SimilarityConfig,
    pub llm: LlmConfig,
    pub ml: MlConfig,
    pub code_analysis: CodeAnalysisConfig,
    pub events: EventsConfig,
    /// Named flows mapping to ordered pipeline lists.
    pub flows: Vec<FlowSpec>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Score thresholds applied to pipelines that produce a numeric score.
///
/// Comparison is inclusive: `score >= block_threshold` blocks, otherwise
/// `score >= notify_threshold` notifies.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub notify_threshold: f64,
    pub block_threshold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            notify_threshold: 0.7,
            block_threshold: 0.87,
        }
    }
}

impl Thresholds {
    /// Map a score to a verdict.
    pub fn classify(&self, score: f64) -> Verdict {
        if score >= self.block_threshold {
            Verdict::Block
        } else if score >= self.notify_threshold {
            Verdict::Notify
        } else {
            Verdict::Allow
        }
    }
}

/// Safety policy configuration: detection rules and pipeline deadlines.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Pre-parsed detection rules for the rule pipeline.
    pub rules: Vec<RuleSpec>,
    /// Default per-pipeline deadline in seconds.
    pub pipeline_timeout_secs: u64,
    /// Per-pipeline deadline overrides, keyed by pipeline identifier.
    pub pipeline_timeout_overrides: HashMap<PipelineId, u64>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            pipeline_timeout_secs: 10,
            pipeline_timeout_overrides: HashMap::new(),
        }
    }
}

/// Built-in prompt-injection rules used when no rule set is configured.
fn default_rules() -> Vec<RuleSpec> {
    use crate::domain::RuleAction;

    let block = |id: &str, name: &str, pattern: &str| RuleSpec {
        id: id.to_string(),
        name: name.to_string(),
        pattern: pattern.to_string(),
        action: RuleAction::Block,
        severity: None,
        category: Some("prompt_injection".to_string()),
    };
    let notify = |id: &str, name: &str, pattern: &str| RuleSpec {
        id: id.to_string(),
        name: name.to_string(),
        pattern: pattern.to_string(),
        action: RuleAction::Notify,
        severity: None,
        category: Some("prompt_injection".to_string()),
    };

    vec![
        block(
            "injection.ignore_instructions",
            "Instruction override",
            r"(ignore|disregard) (all |your )?(previous |prior )?instructions",
        ),
        block("injection.jailbreak", "Jailbreak keyword", r"\bjailbreak\b"),
        block("injection.dan_mode", "DAN mode", r"\bDAN mode\b"),
        notify(
            "injection.persona_swap",
            "Persona swap",
            r"you are now|new persona",
        ),
    ]
}

/// HTTP endpoint for a similarity search backend.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchEndpoint {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_timeout() -> u64 {
    10
}

/// Similarity pipeline and manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub enabled: bool,
    /// Backend activated at startup.
    pub default_backend: String,
    /// Index queried for similar prompts.
    pub index: String,
    pub thresholds: Thresholds,
    pub opensearch: Option<SearchEndpoint>,
    pub elasticsearch: Option<SearchEndpoint>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_backend: "opensearch".to_string(),
            index: "similarity-prompt-index".to_string(),
            thresholds: Thresholds::default(),
            opensearch: None,
            elasticsearch: None,
        }
    }
}

/// OpenAI-compatible endpoint (also covers Ollama, Groq, etc. via `base_url`).
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiEndpoint {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

fn default_openai_model() -> String {
    "gpt-4".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Anthropic Messages API endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicEndpoint {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

fn default_anthropic_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

/// LLM pipeline and manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    /// Backend activated at startup.
    pub default_backend: String,
    /// Request timeout for backend calls, in seconds.
    pub timeout_secs: u64,
    pub openai: Option<OpenAiEndpoint>,
    pub anthropic: Option<AnthropicEndpoint>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_backend: "openai".to_string(),
            timeout_secs: 30,
            openai: None,
            anthropic: None,
        }
    }
}

/// ML classifier pipeline configuration. The classifier itself runs behind a
/// scoring service; the gateway only applies thresholds to its score.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MlConfig {
    pub enabled: bool,
    pub scoring_url: Option<String>,
    pub thresholds: Thresholds,
    pub timeout_secs: u64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scoring_url: None,
            thresholds: Thresholds::default(),
            timeout_secs: 10,
        }
    }
}

/// Static-analysis pipeline configuration. `program` is an external analyzer
/// invoked per request; its JSON findings are adapted into triggered rules.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CodeAnalysisConfig {
    pub enabled: bool,
    pub program: Option<String>,
    pub args: Vec<String>,
}

/// Event emission configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// When set, events are POSTed to this URL; otherwise they are logged.
    pub webhook_url: Option<String>,
    /// Emit ALLOW results too (audit-all deployments).
    pub emit_allowed: bool,
}

/// Declarative flow definition: a name plus ordered pipeline identifiers.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    pub pipelines: Vec<String>,
}

impl Config {
    /// Load configuration from files and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (BASTION_*)
    /// 2. config/local.yaml (if exists)
    /// 3. config/default.yaml
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            // Start with default config
            .add_source(File::with_name("config/default").required(false))
            // Layer on local overrides
            .add_source(File::with_name("config/local").required(false))
            // Layer on environment variables with BASTION_ prefix
            .add_source(
                Environment::with_prefix("BASTION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
