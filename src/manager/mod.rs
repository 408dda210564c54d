//! Backend managers.
//!
//! A manager holds a set of interchangeable backends for one capability
//! (similarity search, LLM reasoning) and tracks which one is active. The
//! active pointer can be switched at runtime without restarting the service;
//! pipelines resolve it on every execution, so a switch takes effect on the
//! very next request.

mod llm;
mod search;

pub use llm::*;
pub use search::*;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::error::{BastionError, BastionResult};

/// Errors produced by backend clients.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("not configured: {0}")]
    Config(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected response: {0}")]
    Response(String),
}

/// Common capability surface of every managed backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable identifier used for registration and switching.
    fn identifier(&self) -> &str;

    /// Human-readable name.
    fn display_name(&self) -> &str;

    /// Short description for the admin surface.
    fn description(&self) -> &str;

    /// Liveness probe. A switch to this backend only succeeds if it passes.
    async fn ping(&self) -> Result<(), BackendError>;
}

/// The currently active backend, published as one immutable snapshot so
/// readers never observe a torn id/handle pair.
struct ActiveEntry<B: ?Sized> {
    id: String,
    backend: Arc<B>,
}

/// Registry of interchangeable backends for one capability.
///
/// The backend set is fixed at construction; only the active pointer
/// changes afterwards. Reads are wait-free; switches are serialized and
/// validate the target eagerly, so the registry never points at a backend
/// that is unregistered or known-dead.
pub struct BackendRegistry<B: Backend + ?Sized> {
    id: &'static str,
    name: &'static str,
    backends: HashMap<String, Arc<B>>,
    active: ArcSwapOption<ActiveEntry<B>>,
    switch_lock: tokio::sync::Mutex<()>,
}

impl<B: Backend + ?Sized> BackendRegistry<B> {
    /// Create a registry over the given backends. No backend is active yet;
    /// call [`activate_default`](Self::activate_default).
    pub fn new(id: &'static str, name: &'static str, backends: Vec<Arc<B>>) -> Self {
        let mut map = HashMap::with_capacity(backends.len());
        for backend in backends {
            let backend_id = backend.identifier().to_string();
            tracing::info!(manager = id, backend = %backend_id, "Backend registered");
            map.insert(backend_id, backend);
        }
        Self {
            id,
            name,
            backends: map,
            active: ArcSwapOption::empty(),
            switch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    /// Activate the configured default backend without a liveness probe.
    ///
    /// Falls back to an arbitrary registered backend when the configured one
    /// is missing, matching startup behavior where a partially configured
    /// deployment should still come up.
    pub fn activate_default(&self, default_id: &str) {
        if let Some(backend) = self.backends.get(default_id) {
            self.active.store(Some(Arc::new(ActiveEntry {
                id: default_id.to_string(),
                backend: Arc::clone(backend),
            })));
            tracing::info!(manager = self.id, backend = %default_id, "Active backend set");
        } else if let Some((id, backend)) = self.backends.iter().next() {
            tracing::warn!(
                manager = self.id,
                configured = %default_id,
                fallback = %id,
                "Configured default backend not registered, falling back"
            );
            self.active.store(Some(Arc::new(ActiveEntry {
                id: id.clone(),
                backend: Arc::clone(backend),
            })));
        } else {
            tracing::warn!(manager = self.id, "No backends registered, manager disabled");
        }
    }

    /// Identifiers of all registered backends.
    pub fn list_backends(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Identifier of the active backend, if any.
    pub fn active_backend(&self) -> Option<String> {
        self.active.load().as_ref().map(|entry| entry.id.clone())
    }

    /// Whether this manager has an active backend and is usable.
    pub fn has_active(&self) -> bool {
        self.active.load().is_some()
    }

    /// Resolve the active backend handle for one operation.
    ///
    /// Called per execution rather than cached, so concurrent switches take
    /// effect on the next request while in-flight operations keep the handle
    /// they resolved.
    pub fn resolve_active(&self) -> Option<Arc<B>> {
        self.active
            .load()
            .as_ref()
            .map(|entry| Arc::clone(&entry.backend))
    }

    /// Switch the active backend.
    ///
    /// Fails with `UnknownBackend` for unregistered identifiers and with
    /// `BackendUnavailable` when the target fails its liveness probe; the
    /// active pointer is untouched in both cases. Concurrent readers observe
    /// either the old or the new backend, never a mix.
    pub async fn switch_active(&self, backend_id: &str) -> BastionResult<()> {
        let _guard = self.switch_lock.lock().await;

        let backend = self
            .backends
            .get(backend_id)
            .ok_or_else(|| BastionError::UnknownBackend(backend_id.to_string()))?;

        backend
            .ping()
            .await
            .map_err(|e| BastionError::BackendUnavailable {
                id: backend_id.to_string(),
                reason: e.to_string(),
            })?;

        self.active.store(Some(Arc::new(ActiveEntry {
            id: backend_id.to_string(),
            backend: Arc::clone(backend),
        })));

        tracing::info!(manager = self.id, backend = %backend_id, "Active backend switched");
        Ok(())
    }

    /// Probe every registered backend and log the outcome. Used at startup;
    /// failures are informational only.
    pub async fn probe_all(&self) {
        for (id, backend) in &self.backends {
            match backend.ping().await {
                Ok(()) => {
                    tracing::info!(manager = self.id, backend = %id, "Backend reachable")
                }
                Err(e) => {
                    tracing::warn!(manager = self.id, backend = %id, error = %e, "Backend unreachable")
                }
            }
        }
    }

    /// Snapshot of this manager for the admin surface.
    pub fn state(&self) -> ManagerState {
        let backends: Vec<BackendInfo> = self
            .list_backends()
            .into_iter()
            .filter_map(|id| self.backends.get(&id))
            .map(|b| BackendInfo {
                id: b.identifier().to_string(),
                name: b.display_name().to_string(),
                description: b.description().to_string(),
            })
            .collect();

        ManagerState {
            id: self.id.to_string(),
            name: self.name.to_string(),
            enabled: self.has_active(),
            active_backend: self.active_backend(),
            backends,
        }
    }
}

/// The two managers of this deployment, addressable by identifier.
#[derive(Clone)]
pub struct Managers {
    pub similarity: Arc<BackendRegistry<dyn SearchBackend>>,
    pub llm: Arc<BackendRegistry<dyn LlmBackend>>,
}

impl Managers {
    /// States of all managers, in a stable order.
    pub fn states(&self) -> Vec<ManagerState> {
        vec![self.similarity.state(), self.llm.state()]
    }

    /// State of one manager by identifier.
    pub fn state(&self, manager_id: &str) -> Option<ManagerState> {
        match manager_id {
            id if id == self.similarity.id() => Some(self.similarity.state()),
            id if id == self.llm.id() => Some(self.llm.state()),
            _ => None,
        }
    }

    /// Switch the active backend of one manager.
    pub async fn switch(&self, manager_id: &str, backend_id: &str) -> BastionResult<()> {
        match manager_id {
            id if id == self.similarity.id() => self.similarity.switch_active(backend_id).await,
            id if id == self.llm.id() => self.llm.switch_active(backend_id).await,
            _ => Err(BastionError::UnknownManager(manager_id.to_string())),
        }
    }
}

/// One registered backend, as reported by the admin surface.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BackendInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Snapshot of one manager's state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ManagerState {
    pub id: String,
    pub name: String,
    /// False when no backend is registered or active.
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_backend: Option<String>,
    pub backends: Vec<BackendInfo>,
}
