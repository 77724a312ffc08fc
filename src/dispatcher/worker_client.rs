//! Minimal HTTP client for the worker contract (`/init`, `/run`, `/status`).

use std::time::Duration;

use serde_json::Value;

use crate::error::{ControllerError, Result};

const INIT_TIMEOUT: Duration = Duration::from_secs(5);
const RUN_TIMEOUT: Duration = Duration::from_secs(600);

pub struct WorkerClient {
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// `POST /init {action}`. Failures are the caller's to log as non-fatal.
    pub async fn init(&self, host_port: u16, action: &str) -> Result<()> {
        let url = format!("http://127.0.0.1:{host_port}/init");
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "action": action }))
            .timeout(INIT_TIMEOUT)
            .send()
            .await
            .map_err(|e| ControllerError::WorkerInitError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ControllerError::WorkerInitError(format!(
                "worker returned {}",
                resp.status()
            )));
        }

        Ok(())
    }

    /// `POST /run <payload>`, returning the top-level `result` value.
    pub async fn run(&self, host_port: u16, payload: &Value) -> Result<Value> {
        let url = format!("http://127.0.0.1:{host_port}/run");
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .timeout(RUN_TIMEOUT)
            .send()
            .await
            .map_err(|e| ControllerError::WorkerRunError(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ControllerError::WorkerRunError(format!(
                "worker returned {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ControllerError::WorkerRunError(format!("malformed worker response: {e}")))?;

        body.get("result")
            .cloned()
            .ok_or_else(|| ControllerError::WorkerRunError("response missing 'result'".into()))
    }
}

impl Default for WorkerClient {
    fn default() -> Self {
        Self::new()
    }
}
