use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tierflow_core::{
    events::Event,
    storage::ReportStore,
    WorkflowExecutionReport, WorkflowId, WorkflowSpec,
};

/// List registered functions and the tier each runs on
pub async fn list_functions(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ListFunctionsResponse>> {
    let functions = state
        .registry
        .functions()
        .into_iter()
        .map(|(name, tier)| FunctionInfo {
            name,
            tier: tier.0,
        })
        .collect();

    Ok(Json(ListFunctionsResponse { functions }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub tier: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFunctionsResponse {
    pub functions: Vec<FunctionInfo>,
}

/// Execute a workflow and wait for its report
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteWorkflowRequest>,
) -> ApiResult<Json<WorkflowExecutionReport>> {
    let workflow_id = req
        .workflow_id
        .map(WorkflowId::new)
        .unwrap_or_else(WorkflowId::generate);

    tracing::info!(
        "Received workflow {} ({} stages): workflow_id={}",
        req.workflow.name,
        req.workflow.stages.len(),
        workflow_id
    );

    let report = state
        .engine
        .execute(workflow_id, &req.workflow)
        .await
        .map_err(ApiError::bad_request)?;

    Ok(Json(report))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteWorkflowRequest {
    /// Caller-chosen run id; generated when absent
    pub workflow_id: Option<String>,
    pub workflow: WorkflowSpec,
}

/// List finished runs
pub async fn list_runs(State(state): State<Arc<AppState>>) -> ApiResult<Json<ListRunsResponse>> {
    let runs = state.reports.list().await?;
    Ok(Json(ListRunsResponse { runs }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListRunsResponse {
    pub runs: Vec<WorkflowExecutionReport>,
}

/// Get the report of a finished run
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<WorkflowExecutionReport>> {
    let report = state
        .reports
        .get(&WorkflowId::new(workflow_id.clone()))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Run {}", workflow_id)))?;

    Ok(Json(report))
}

/// Get events for a run
pub async fn get_run_events(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<GetRunEventsResponse>> {
    let events = state
        .event_log
        .get_run_events(&WorkflowId::new(workflow_id))
        .await?;

    Ok(Json(GetRunEventsResponse { events }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetRunEventsResponse {
    pub events: Vec<Event>,
}
