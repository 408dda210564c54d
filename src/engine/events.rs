//! Event emission for non-ALLOW outcomes.
//!
//! The orchestrator emits exactly one record per request whose aggregate
//! verdict is NOTIFY or BLOCK. Emission is fire-and-forget: no retries, and
//! a failed delivery never affects the request.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{AggregateResult, PipelineResult, Verdict};
use crate::manager::BackendError;

/// Record published for one gated request.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    /// Unique event identifier.
    pub id: Uuid,
    /// Emitting service name.
    pub service: String,
    /// Emitting service version.
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied correlation identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Flow the request ran through.
    pub flow: String,
    /// Aggregate verdict.
    pub status: Verdict,
    /// True when every pipeline came back indeterminate.
    pub degraded: bool,
    /// Per-pipeline results in execution order.
    pub results: Vec<PipelineResult>,
}

impl EventRecord {
    pub fn new(flow: &str, task_id: Option<String>, aggregate: &AggregateResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            task_id,
            flow: flow.to_string(),
            status: aggregate.verdict,
            degraded: aggregate.degraded,
            results: aggregate.results.clone(),
        }
    }
}

/// Sink for event records.
#[async_trait]
pub trait EventEmitter: Send + Sync {
    /// Publish one record. Implementations must not block the request path;
    /// slow transports should hand off internally.
    async fn emit(&self, record: EventRecord);

    /// Whether ALLOW results should be emitted too (audit-all deployments).
    fn emit_allowed(&self) -> bool {
        false
    }
}

/// Emitter that writes records to the structured log. Always available.
pub struct LogEmitter;

#[async_trait]
impl EventEmitter for LogEmitter {
    async fn emit(&self, record: EventRecord) {
        match serde_json::to_string(&record) {
            Ok(payload) => {
                tracing::info!(
                    event_id = %record.id,
                    flow = %record.flow,
                    status = %record.status,
                    event = %payload,
                    "Gate event"
                );
            }
            Err(e) => {
                tracing::error!(event_id = %record.id, error = %e, "Failed to serialize event");
            }
        }
    }
}

/// Emitter that POSTs records to a configured webhook.
pub struct WebhookEmitter {
    client: Client,
    url: String,
    emit_allowed: bool,
}

impl WebhookEmitter {
    pub fn new(url: String, emit_allowed: bool) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url,
            emit_allowed,
        })
    }
}

#[async_trait]
impl EventEmitter for WebhookEmitter {
    async fn emit(&self, record: EventRecord) {
        // Delivery happens off the request path; the outcome is only logged.
        let client = self.client.clone();
        let url = self.url.clone();
        let event_id = record.id;

        tokio::spawn(async move {
            match client.post(&url).json(&record).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(event_id = %event_id, "Event delivered");
                }
                Ok(response) => {
                    tracing::warn!(
                        event_id = %event_id,
                        status = %response.status(),
                        "Event delivery rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(event_id = %event_id, error = %e, "Event delivery failed");
                }
            }
        });
    }

    fn emit_allowed(&self) -> bool {
        self.emit_allowed
    }
}
