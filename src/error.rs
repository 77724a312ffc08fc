use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("resource exhausted for function {function}: {message}")]
    ResourceExhausted { function: String, message: String },

    #[error("health check failed for container {container_id}: {message}")]
    HealthCheckFailed { container_id: String, message: String },

    #[error("worker init failed: {0}")]
    WorkerInitError(String),

    #[error("worker run failed: {0}")]
    WorkerRunError(String),

    #[error("sampler error: {0}")]
    SamplerError(String),

    #[error("failed to parse performance report: {0}")]
    ParseError(String),

    #[error("workflow stage failed: {0}")]
    WorkflowStageError(String),

    #[error("container driver error: {0}")]
    Driver(#[from] crate::driver::DriverError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ControllerError::UnknownFunction(name) => {
                (StatusCode::NOT_FOUND, format!("unknown function: {name}"))
            }
            ControllerError::UnknownWorkflow(name) => {
                (StatusCode::NOT_FOUND, format!("unknown workflow: {name}"))
            }
            ControllerError::ResourceExhausted { .. } => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            ControllerError::HealthCheckFailed { .. } => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            ControllerError::WorkerInitError(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ControllerError::WorkerRunError(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ControllerError::SamplerError(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ControllerError::ParseError(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ControllerError::WorkflowStageError(_) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            ControllerError::Driver(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            ControllerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ControllerError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "status": "error",
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
