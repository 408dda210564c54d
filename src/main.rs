//! Bastion Core - LLM Protection Gateway
//!
//! This service sits between a client application and a downstream model,
//! classifying untrusted text as allow/notify/block by running it through
//! an ordered set of detection pipelines.

use std::sync::Arc;

use tokio::net::TcpListener;

mod api;
mod config;
mod domain;
mod engine;
mod error;
mod logging;
mod manager;
mod pipeline;

use crate::api::build_router;
use crate::config::Config;
use crate::domain::compile_rules;
use crate::engine::{
    EventEmitter, FlowRegistry, LogEmitter, Orchestrator, TimeoutPolicy, WebhookEmitter,
};
use crate::manager::{
    AnthropicBackend, BackendRegistry, ElasticsearchBackend, LlmBackend, Managers,
    OpenAiBackend, OpenSearchBackend, SearchBackend,
};
use crate::pipeline::{
    CodeAnalysisPipeline, CommandAnalyzer, HttpScorer, LlmPipeline, MlPipeline,
    PipelineRegistry, RulePipeline, SimilarityPipeline,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The orchestration engine.
    pub orchestrator: Arc<Orchestrator>,
    /// Backend managers, addressable by identifier.
    pub managers: Managers,
}

/// Build the similarity manager from configuration. Backends that fail to
/// construct are skipped so a partially configured deployment still starts.
fn build_similarity_manager(config: &Config) -> Arc<BackendRegistry<dyn SearchBackend>> {
    let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();

    if let Some(endpoint) = &config.similarity.opensearch {
        match OpenSearchBackend::new(endpoint, config.similarity.index.clone()) {
            Ok(backend) => backends.push(backend),
            Err(e) => tracing::warn!(error = %e, "Failed to initialize OpenSearch backend"),
        }
    }
    if let Some(endpoint) = &config.similarity.elasticsearch {
        match ElasticsearchBackend::new(endpoint, config.similarity.index.clone()) {
            Ok(backend) => backends.push(backend),
            Err(e) => tracing::warn!(error = %e, "Failed to initialize Elasticsearch backend"),
        }
    }

    let manager = Arc::new(BackendRegistry::new(
        "similarity",
        "Similarity Manager",
        backends,
    ));
    manager.activate_default(&config.similarity.default_backend);
    manager
}

/// Build the LLM manager from configuration.
fn build_llm_manager(config: &Config) -> Arc<BackendRegistry<dyn LlmBackend>> {
    let mut backends: Vec<Arc<dyn LlmBackend>> = Vec::new();

    if let Some(endpoint) = &config.llm.openai {
        match OpenAiBackend::new(endpoint, config.llm.timeout_secs) {
            Ok(backend) => backends.push(backend),
            Err(e) => tracing::warn!(error = %e, "Failed to initialize OpenAI backend"),
        }
    }
    if let Some(endpoint) = &config.llm.anthropic {
        match AnthropicBackend::new(endpoint, config.llm.timeout_secs) {
            Ok(backend) => backends.push(backend),
            Err(e) => tracing::warn!(error = %e, "Failed to initialize Anthropic backend"),
        }
    }

    let manager = Arc::new(BackendRegistry::new("llm", "LLM Manager", backends));
    manager.activate_default(&config.llm.default_backend);
    manager
}

/// Build the pipeline registry. Only pipelines that are enabled and fully
/// configured are registered; flows referencing the others fail fast.
fn build_pipelines(config: &Config, managers: &Managers) -> PipelineRegistry {
    let mut registry = PipelineRegistry::default();

    let rules = compile_rules(config.safety.rules.clone());
    if rules.is_empty() {
        tracing::warn!("No detection rules configured, rule pipeline disabled");
    } else {
        registry.register(Arc::new(RulePipeline::new(rules)));
    }

    if config.similarity.enabled && managers.similarity.has_active() {
        registry.register(Arc::new(SimilarityPipeline::new(
            Arc::clone(&managers.similarity),
            config.similarity.thresholds,
        )));
    } else {
        tracing::info!("Similarity pipeline disabled");
    }

    if config.code_analysis.enabled {
        match &config.code_analysis.program {
            Some(program) => {
                registry.register(Arc::new(CodeAnalysisPipeline::new(Arc::new(
                    CommandAnalyzer::new(program.clone(), config.code_analysis.args.clone()),
                ))));
            }
            None => {
                tracing::warn!("Code analysis enabled but no analyzer program configured");
            }
        }
    }

    if config.ml.enabled {
        match &config.ml.scoring_url {
            Some(url) => match HttpScorer::new(url.clone(), config.ml.timeout_secs) {
                Ok(scorer) => {
                    registry.register(Arc::new(MlPipeline::new(scorer, config.ml.thresholds)));
                }
                Err(e) => tracing::warn!(error = %e, "Failed to initialize ML scorer"),
            },
            None => {
                tracing::warn!("ML pipeline enabled but no scoring URL configured");
            }
        }
    }

    if config.llm.enabled && managers.llm.has_active() {
        registry.register(Arc::new(LlmPipeline::new(Arc::clone(&managers.llm))));
    } else {
        tracing::info!("LLM pipeline disabled");
    }

    registry
}

/// Build the event emitter: webhook when configured, structured log otherwise.
fn build_emitter(config: &Config) -> Arc<dyn EventEmitter> {
    if let Some(url) = &config.events.webhook_url {
        match WebhookEmitter::new(url.clone(), config.events.emit_allowed) {
            Ok(emitter) => {
                tracing::info!(webhook = %url, "Webhook event emitter enabled");
                return Arc::new(emitter);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to initialize webhook emitter, falling back to log");
            }
        }
    }
    Arc::new(LogEmitter)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file loaded ({e})");
    }

    // Initialize logging
    logging::init();

    tracing::info!("Starting Bastion Core v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        flows = config.flows.len(),
        "Configuration loaded"
    );

    // Build backend managers
    let managers = Managers {
        similarity: build_similarity_manager(&config),
        llm: build_llm_manager(&config),
    };

    // Probe every registered backend in the background; failures are
    // informational, the gate still serves with degraded pipelines.
    {
        let similarity = Arc::clone(&managers.similarity);
        let llm = Arc::clone(&managers.llm);
        tokio::spawn(async move {
            similarity.probe_all().await;
            llm.probe_all().await;
        });
    }

    // Build pipelines and flows
    let pipelines = Arc::new(build_pipelines(&config, &managers));
    tracing::info!(
        pipelines = ?pipelines.registered_ids(),
        "Pipelines registered"
    );

    let flows = Arc::new(FlowRegistry::from_specs(
        &config.flows,
        &pipelines.registered_ids(),
    ));

    // Build the orchestrator
    let orchestrator = Arc::new(Orchestrator::new(
        flows,
        pipelines,
        build_emitter(&config),
        TimeoutPolicy::from_config(&config.safety),
    ));

    // Build application state and router
    let state = AppState {
        orchestrator,
        managers,
    };
    let app = build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(address = %addr, "Server listening");
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
