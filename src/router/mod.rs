//! HTTP surface: register managers, dispatch invocations, start workflows,
//! and query pool status.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::Configuration;
use crate::dispatcher::Dispatcher;
use crate::driver::ContainerDriver;
use crate::error::{ControllerError, Result};
use crate::manager::{FunctionManager, ManagerParams, ManagerRegistry, Registration};
use crate::workflow::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ManagerRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<Orchestrator>,
    pub driver: Arc<dyn ContainerDriver>,
    pub config: Arc<Configuration>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/create_manager", post(create_manager))
        .route("/dispatch/:function_name", post(dispatch))
        .route("/dispatch_workflow", post(dispatch_workflow))
        .route("/manager_status/:function_name", get(manager_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct CreateManagerRequest {
    function_name: Option<String>,
    image_name: Option<String>,
    container_port: Option<u16>,
    #[allow(dead_code)]
    host_storage_path: Option<String>,
    idle_timeout: Option<u64>,
    min_idle_containers: Option<usize>,
}

async fn create_manager(
    State(state): State<AppState>,
    Json(body): Json<CreateManagerRequest>,
) -> Result<impl IntoResponse> {
    let function_name = body
        .function_name
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ControllerError::BadRequest("function_name is required".into()))?;

    let defaults = &state.config.managers;
    let params = ManagerParams {
        function_name: function_name.clone(),
        image_name: body.image_name.unwrap_or_else(|| function_name.clone()),
        container_port: body.container_port.unwrap_or(defaults.container_port),
        idle_timeout: Duration::from_secs(body.idle_timeout.unwrap_or(defaults.idle_timeout_secs)),
        min_idle_containers: body.min_idle_containers.unwrap_or(defaults.min_idle_containers),
    };

    let driver = state.driver.clone();
    match state
        .registry
        .create_or_get(&function_name, || FunctionManager::new(params, defaults, driver))
    {
        Registration::Created(manager) => {
            info!("created manager for '{}'", function_name);
            tokio::spawn(manager.run_eviction_loop());
            Ok((StatusCode::CREATED, Json(json!({ "status": "created", "function": function_name }))))
        }
        Registration::AlreadyExists(_) => Ok((
            StatusCode::OK,
            Json(json!({ "status": "exists", "function": function_name })),
        )),
    }
}

async fn dispatch(
    State(state): State<AppState>,
    Path(function_name): Path<String>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let log_root = state.config.perf.log_dir.clone();
    match state.dispatcher.dispatch_with_denoising(&function_name, payload, &log_root).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "result": outcome.result,
                "container": outcome.container_id,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct DispatchWorkflowRequest {
    workflow_name: String,
    payload: Value,
}

async fn dispatch_workflow(
    State(state): State<AppState>,
    Json(body): Json<DispatchWorkflowRequest>,
) -> Result<impl IntoResponse> {
    state.orchestrator.start(&body.workflow_name, body.payload)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "started", "workflow": body.workflow_name })),
    ))
}

async fn manager_status(
    State(state): State<AppState>,
    Path(function_name): Path<String>,
) -> Result<impl IntoResponse> {
    let manager = state
        .registry
        .get(&function_name)
        .ok_or_else(|| ControllerError::UnknownFunction(function_name.clone()))?;

    let status = manager.status();
    let containers: Vec<Value> = status
        .containers
        .iter()
        .map(|(id, port)| json!({ "id": id, "host_port": port }))
        .collect();

    Ok(Json(json!({
        "function": function_name,
        "total": status.total,
        "idle": status.idle,
        "busy": status.busy,
        "containers": containers,
    })))
}
