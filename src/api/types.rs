//! API request and response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{AggregateResult, PipelineId};
use crate::engine::DEFAULT_FLOW;
use crate::manager::ManagerState;

// ==================== Run Flow ====================

/// Request to gate one piece of input text.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RunFlowRequest {
    /// The untrusted text to classify.
    pub prompt: String,
    /// Flow to run the text through.
    #[serde(default = "default_flow_name")]
    pub flow: String,
    /// Caller-supplied correlation identifier, echoed in the response and
    /// the event stream.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Overall deadline for this request in milliseconds. Pipelines still
    /// running when it expires are recorded as indeterminate.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_flow_name() -> String {
    DEFAULT_FLOW.to_string()
}

/// Response from running a flow.
#[derive(Debug, Serialize, ToSchema)]
pub struct RunFlowResponse {
    #[serde(flatten)]
    pub result: AggregateResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

// ==================== Flows ====================

/// One pipeline inside a flow listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct PipelineInfo {
    pub id: PipelineId,
    pub name: String,
    pub enabled: bool,
    pub description: String,
}

/// One flow with its pipelines in execution order.
#[derive(Debug, Serialize, ToSchema)]
pub struct FlowInfo {
    pub flow_name: String,
    pub pipelines: Vec<PipelineInfo>,
}

/// Response for listing flows.
#[derive(Debug, Serialize, ToSchema)]
pub struct FlowsResponse {
    pub flows: Vec<FlowInfo>,
}

/// One flow definition in a reload request.
#[derive(Debug, Deserialize, ToSchema)]
pub struct FlowSpecBody {
    pub name: String,
    pub pipelines: Vec<String>,
}

/// Request to replace all flow definitions.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReloadFlowsRequest {
    pub flows: Vec<FlowSpecBody>,
}

/// Response after reloading flows.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadFlowsResponse {
    pub flows: usize,
}

// ==================== Managers ====================

/// Response for listing managers.
#[derive(Debug, Serialize, ToSchema)]
pub struct ManagersListResponse {
    pub managers: Vec<ManagerState>,
}

/// Request to switch a manager's active backend.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SwitchBackendRequest {
    pub manager_id: String,
    pub backend_id: String,
}

/// Response after a successful switch.
#[derive(Debug, Serialize, ToSchema)]
pub struct SwitchBackendResponse {
    pub manager_id: String,
    pub active_backend: String,
}

// ==================== Health ====================

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Timestamp.
    pub timestamp: String,
}
