//! Route definitions for the API.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::handlers;
use crate::AppState;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::run_flow,
        handlers::list_flows,
        handlers::reload_flows,
        handlers::list_managers,
        handlers::get_manager,
        handlers::switch_backend,
        handlers::health_check,
    ),
    components(schemas(
        crate::api::types::RunFlowRequest,
        crate::api::types::RunFlowResponse,
        crate::api::types::FlowsResponse,
        crate::api::types::FlowInfo,
        crate::api::types::PipelineInfo,
        crate::api::types::ReloadFlowsRequest,
        crate::api::types::FlowSpecBody,
        crate::api::types::ReloadFlowsResponse,
        crate::api::types::ManagersListResponse,
        crate::api::types::SwitchBackendRequest,
        crate::api::types::SwitchBackendResponse,
        crate::api::types::HealthResponse,
        crate::domain::Verdict,
        crate::domain::PipelineId,
        crate::domain::PipelineStatus,
        crate::domain::PipelineResult,
        crate::domain::AggregateResult,
        crate::domain::TriggeredRule,
        crate::domain::RuleAction,
        crate::domain::Severity,
        crate::manager::ManagerState,
        crate::manager::BackendInfo,
    )),
    tags(
        (name = "flow", description = "Flow execution and listing"),
        (name = "manager", description = "Backend manager administration"),
        (name = "health", description = "Health and status endpoints")
    ),
    info(
        title = "Bastion Core API",
        version = "0.1.0",
        description = "LLM protection gateway - classifies untrusted text through detection pipelines",
        license(name = "MIT")
    )
)]
pub struct ApiDoc;

/// Build the API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Flow execution and administration
        .route("/v1/flow/run", post(handlers::run_flow))
        .route("/v1/flow/list", get(handlers::list_flows))
        .route("/v1/flow/reload", post(handlers::reload_flows))
        // Manager administration
        .route("/v1/manager/list", get(handlers::list_managers))
        .route("/v1/manager/{id}", get(handlers::get_manager))
        .route("/v1/manager/switch", post(handlers::switch_backend))
        // Health
        .route("/v1/health", get(handlers::health_check))
        .with_state(state)
        // OpenAPI docs
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
