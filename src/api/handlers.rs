//! HTTP request handlers.
//!
//! Thin wrappers that delegate straight into the orchestration core.

use axum::{
    extract::{Path, State},
    Json,
};

use std::time::{Duration, Instant};

use crate::api::types::*;
use crate::config::FlowSpec;
use crate::error::{BastionError, BastionResult};
use crate::pipeline::RequestContext;
use crate::AppState;

/// Run input text through a flow.
///
/// POST /v1/flow/run
#[utoipa::path(
    post,
    path = "/v1/flow/run",
    request_body = RunFlowRequest,
    responses(
        (status = 200, description = "Flow complete", body = RunFlowResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Unknown flow or pipeline")
    ),
    tag = "flow"
)]
pub async fn run_flow(
    State(state): State<AppState>,
    Json(request): Json<RunFlowRequest>,
) -> BastionResult<Json<RunFlowResponse>> {
    if request.prompt.trim().is_empty() {
        return Err(BastionError::BadRequest("Prompt is required".to_string()));
    }

    tracing::info!(
        flow = %request.flow,
        task_id = ?request.task_id,
        prompt_len = request.prompt.len(),
        "Running flow"
    );

    let ctx = RequestContext {
        task_id: request.task_id.clone(),
        deadline: request
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms)),
    };
    let result = state
        .orchestrator
        .run(&request.flow, &request.prompt, &ctx)
        .await?;

    Ok(Json(RunFlowResponse {
        result,
        task_id: request.task_id,
    }))
}

/// List all flows and their pipelines.
///
/// GET /v1/flow/list
#[utoipa::path(
    get,
    path = "/v1/flow/list",
    responses(
        (status = 200, description = "List of flows", body = FlowsResponse)
    ),
    tag = "flow"
)]
pub async fn list_flows(State(state): State<AppState>) -> Json<FlowsResponse> {
    let registry = state.orchestrator.pipelines();

    let flows = state
        .orchestrator
        .flows()
        .list()
        .into_iter()
        .map(|flow| FlowInfo {
            flow_name: flow.name,
            pipelines: flow
                .pipelines
                .iter()
                .map(|id| match registry.get(*id) {
                    Some(pipeline) => PipelineInfo {
                        id: *id,
                        name: pipeline.display_name().to_string(),
                        enabled: pipeline.is_enabled(),
                        description: pipeline.description().to_string(),
                    },
                    None => PipelineInfo {
                        id: *id,
                        name: id.to_string(),
                        enabled: false,
                        description: "Not registered".to_string(),
                    },
                })
                .collect(),
        })
        .collect();

    Json(FlowsResponse { flows })
}

/// Replace all flow definitions.
///
/// POST /v1/flow/reload
#[utoipa::path(
    post,
    path = "/v1/flow/reload",
    request_body = ReloadFlowsRequest,
    responses(
        (status = 200, description = "Flows reloaded", body = ReloadFlowsResponse)
    ),
    tag = "flow"
)]
pub async fn reload_flows(
    State(state): State<AppState>,
    Json(request): Json<ReloadFlowsRequest>,
) -> Json<ReloadFlowsResponse> {
    let specs: Vec<FlowSpec> = request
        .flows
        .into_iter()
        .map(|f| FlowSpec {
            name: f.name,
            pipelines: f.pipelines,
        })
        .collect();

    let registered = state.orchestrator.pipelines().registered_ids();
    state.orchestrator.flows().reload(&specs, &registered);

    Json(ReloadFlowsResponse {
        flows: state.orchestrator.flows().list().len(),
    })
}

/// List all managers with their backends.
///
/// GET /v1/manager/list
#[utoipa::path(
    get,
    path = "/v1/manager/list",
    responses(
        (status = 200, description = "List of managers", body = ManagersListResponse)
    ),
    tag = "manager"
)]
pub async fn list_managers(State(state): State<AppState>) -> Json<ManagersListResponse> {
    Json(ManagersListResponse {
        managers: state.managers.states(),
    })
}

/// Get one manager's state.
///
/// GET /v1/manager/{id}
#[utoipa::path(
    get,
    path = "/v1/manager/{id}",
    params(
        ("id" = String, Path, description = "Manager identifier")
    ),
    responses(
        (status = 200, description = "Manager state", body = crate::manager::ManagerState),
        (status = 404, description = "Manager not found")
    ),
    tag = "manager"
)]
pub async fn get_manager(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> BastionResult<Json<crate::manager::ManagerState>> {
    state
        .managers
        .state(&id)
        .map(Json)
        .ok_or(BastionError::UnknownManager(id))
}

/// Switch a manager's active backend.
///
/// POST /v1/manager/switch
#[utoipa::path(
    post,
    path = "/v1/manager/switch",
    request_body = SwitchBackendRequest,
    responses(
        (status = 200, description = "Backend switched", body = SwitchBackendResponse),
        (status = 404, description = "Unknown manager or backend"),
        (status = 409, description = "Backend failed its liveness probe")
    ),
    tag = "manager"
)]
pub async fn switch_backend(
    State(state): State<AppState>,
    Json(request): Json<SwitchBackendRequest>,
) -> BastionResult<Json<SwitchBackendResponse>> {
    state
        .managers
        .switch(&request.manager_id, &request.backend_id)
        .await?;

    tracing::info!(
        manager = %request.manager_id,
        backend = %request.backend_id,
        "Active backend switched via API"
    );

    Ok(Json(SwitchBackendResponse {
        manager_id: request.manager_id,
        active_backend: request.backend_id,
    }))
}

/// Health check endpoint.
///
/// GET /v1/health
#[utoipa::path(
    get,
    path = "/v1/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
