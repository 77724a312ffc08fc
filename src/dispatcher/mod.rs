//! Dispatcher: the single-invocation pipeline, plus denoising.

mod worker_client;

pub use worker_client::WorkerClient;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::{ManagerDefaults, PerfConfiguration};
use crate::driver::ContainerDriver;
use crate::error::{ControllerError, Result};
use crate::manager::{FunctionManager, ManagerParams, ManagerRegistry, Registration};
use crate::perf;
use crate::sampler;

const NOOP_FUNCTION: &str = "noop";

pub struct Dispatcher {
    registry: Arc<ManagerRegistry>,
    driver: Arc<dyn ContainerDriver>,
    worker: WorkerClient,
    perf_config: PerfConfiguration,
    manager_defaults: ManagerDefaults,
}

/// Everything a single dispatch returns to its caller.
pub struct DispatchOutcome {
    pub result: Value,
    pub container_id: String,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ManagerRegistry>,
        driver: Arc<dyn ContainerDriver>,
        perf_config: PerfConfiguration,
        manager_defaults: ManagerDefaults,
    ) -> Self {
        Self {
            registry,
            driver,
            worker: WorkerClient::new(),
            perf_config,
            manager_defaults,
        }
    }

    /// `checkout -> init -> attach sampler -> run -> detach sampler -> release`,
    /// totally ordered, with release/sampler teardown guaranteed on every
    /// exit path.
    pub async fn dispatch(
        &self,
        function_name: &str,
        payload: &Value,
        run_perf: bool,
        log_dir: Option<&Path>,
    ) -> Result<DispatchOutcome> {
        let manager = self
            .registry
            .get(function_name)
            .ok_or_else(|| ControllerError::UnknownFunction(function_name.to_string()))?;

        let (host_port, container_id) = manager.checkout().await?;

        // Runs on every exit path past this point, `?` included.
        let manager_for_release = manager.clone();
        let container_id_for_release = container_id.clone();
        let _release_guard = scopeguard::guard((), move |_| {
            manager_for_release.release(&container_id_for_release);
        });

        if let Err(e) = self.worker.init(host_port, function_name).await {
            warn!("{}: /init failed on container {}: {}", function_name, container_id, e);
        }

        let result = self
            .run_with_sampler(function_name, &container_id, host_port, payload, run_perf, log_dir)
            .await;

        if let Err(e) = &result {
            let handle = crate::driver::ContainerHandle(container_id.clone());
            if let Ok(logs) = self.driver.logs(&handle, 200).await {
                warn!("{}: run failed on container {}, log tail:\n{}", function_name, container_id, logs);
            }
            warn!("{}: dispatch failed: {}", function_name, e);
        }

        result.map(|result| DispatchOutcome { result, container_id })
    }

    async fn run_with_sampler(
        &self,
        function_name: &str,
        container_id: &str,
        host_port: u16,
        payload: &Value,
        run_perf: bool,
        log_dir: Option<&Path>,
    ) -> Result<Value> {
        let report_path = log_dir.map(|dir| {
            dir.join(format!("{}_{}.txt", function_name, &container_id[..container_id.len().min(12)]))
        });

        let handle = if run_perf {
            self.launch_sampler(container_id, &report_path).await
        } else {
            None
        };

        let result = self.worker.run(host_port, payload).await;

        if let Some(handle) = handle {
            sampler::stop(handle, Duration::from_secs(self.perf_config.sampler_grace_secs)).await.ok();
        }

        result
    }

    async fn launch_sampler(&self, container_id: &str, report_path: &Option<PathBuf>) -> Option<sampler::SamplerHandle> {
        let report_path = report_path.as_ref()?;
        let pid = match self.resolve_pid(container_id).await {
            Some(pid) => pid,
            None => {
                warn!("could not resolve pid for container {}, skipping sampler", container_id);
                return None;
            }
        };

        match sampler::launch(&self.perf_config.sampler_bin, pid, &self.perf_config.events, report_path).await {
            Ok(handle) => {
                tokio::time::sleep(Duration::from_millis(self.perf_config.attach_delay_ms)).await;
                Some(handle)
            }
            Err(e) => {
                warn!("sampler launch failed for container {}: {}", container_id, e);
                None
            }
        }
    }

    async fn resolve_pid(&self, container_id: &str) -> Option<u32> {
        let handle = crate::driver::ContainerHandle(container_id.to_string());
        self.driver.inspect(&handle).await.ok().and_then(|info| info.pid)
    }

    /// Run `noop` with the target's (or an empty) payload first to produce a
    /// noise baseline, dispatch the target, compute clean metrics, and
    /// persist the combined record. Dispatching `noop` itself denoises
    /// against its own report, so its clean metrics floor at zero. Never
    /// fails because of measurement.
    pub async fn dispatch_with_denoising(
        &self,
        function_name: &str,
        payload: Value,
        log_root: &Path,
    ) -> Result<DispatchOutcome> {
        let target_dir = log_root.join(function_name);
        tokio::fs::create_dir_all(&target_dir).await?;

        let baseline = if function_name == NOOP_FUNCTION {
            None
        } else {
            self.ensure_noop_manager();

            let baseline_payload = if self.perf_config.denoise_with_target_payload {
                payload.clone()
            } else {
                Value::Object(Default::default())
            };

            let report = match self.dispatch(NOOP_FUNCTION, &baseline_payload, true, Some(&target_dir)).await {
                Ok(outcome) => {
                    let path = target_dir.join(format!(
                        "noop_{}.txt",
                        &outcome.container_id[..outcome.container_id.len().min(12)]
                    ));
                    perf::parse_report(&path).await
                }
                Err(e) => {
                    warn!("noise baseline dispatch failed, proceeding with empty baseline: {}", e);
                    perf::MetricReport::new()
                }
            };
            Some(report)
        };

        let outcome = self.dispatch(function_name, &payload, true, Some(&target_dir)).await?;

        let raw_path = target_dir.join(format!(
            "{}_{}.txt",
            function_name,
            &outcome.container_id[..outcome.container_id.len().min(12)]
        ));
        let raw = perf::parse_report(&raw_path).await;
        let noise = baseline.unwrap_or_else(|| raw.clone());
        let clean = perf::clean_metrics(&raw, &noise);

        let record = serde_json::json!({
            "function": function_name,
            "timestamp": Utc::now().to_rfc3339(),
            "raw_metrics": raw,
            "noise_baseline": noise,
            "clean_metrics": clean,
            "result_payload": outcome.result,
        });

        let record_path = target_dir.join(format!(
            "clean_{}_{}.json",
            function_name,
            &outcome.container_id[..outcome.container_id.len().min(12)]
        ));
        if let Err(e) = tokio::fs::write(&record_path, serde_json::to_vec_pretty(&record).unwrap_or_default()).await {
            warn!("failed to persist clean metrics record {}: {}", record_path.display(), e);
        }

        info!("{}: dispatch complete, container {}", function_name, outcome.container_id);
        Ok(outcome)
    }

    /// Registers a default `noop` manager if nothing registered one via
    /// `/create_manager` yet, so the denoising baseline never silently fails
    /// for lack of a pool to dispatch into.
    fn ensure_noop_manager(&self) {
        let params = ManagerParams {
            function_name: NOOP_FUNCTION.to_string(),
            image_name: self.manager_defaults.noop_image.clone(),
            container_port: self.manager_defaults.container_port,
            idle_timeout: Duration::from_secs(self.manager_defaults.idle_timeout_secs),
            min_idle_containers: self.manager_defaults.min_idle_containers,
        };

        let driver = self.driver.clone();
        let defaults = self.manager_defaults.clone();
        if let Registration::Created(manager) = self
            .registry
            .create_or_get(NOOP_FUNCTION, || FunctionManager::new(params, &defaults, driver))
        {
            info!("auto-registered default noop manager for the denoising baseline");
            tokio::spawn(manager.run_eviction_loop());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerDefaults;
    use crate::driver::{ContainerHandle, DriverResult, InspectInfo};
    use crate::manager::{FunctionManager, ManagerParams, ManagerRegistry};
    use async_trait::async_trait;
    use axum::extract::Json as JsonExtract;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use std::net::SocketAddr;

    /// Drives a container handle whose "host port" is actually the port of an
    /// in-process fake worker server, so `checkout`/`dispatch` exercise the
    /// real HTTP contract without Docker.
    struct FakeDriver {
        host_port: u16,
    }

    #[async_trait]
    impl crate::driver::ContainerDriver for FakeDriver {
        async fn create(&self, _image: &str, _port: u16) -> DriverResult<ContainerHandle> {
            Ok(ContainerHandle("fake-container".to_string()))
        }
        async fn inspect(&self, _h: &ContainerHandle) -> DriverResult<InspectInfo> {
            Ok(InspectInfo {
                host_port: Some(self.host_port),
                pid: Some(1),
                runtime_state: crate::driver::RuntimeState::Running,
            })
        }
        async fn logs(&self, _h: &ContainerHandle, _n: usize) -> DriverResult<String> {
            Ok("fake log tail".to_string())
        }
        async fn stop(&self, _h: &ContainerHandle, _g: u64) -> DriverResult<()> {
            Ok(())
        }
        async fn remove(&self, _h: &ContainerHandle, _f: bool) -> DriverResult<()> {
            Ok(())
        }
    }

    /// Spawns a minimal worker honoring `/status`, `/init`, `/run`, and
    /// returns the bound address. `run_succeeds` selects whether `/run`
    /// reports success or a server error, to drive the release-after-failure
    /// test without a real worker container.
    async fn spawn_fake_worker(run_succeeds: bool) -> SocketAddr {
        async fn status() -> axum::Json<serde_json::Value> {
            axum::Json(serde_json::json!({ "status": "ok" }))
        }
        async fn init(JsonExtract(_body): JsonExtract<serde_json::Value>) -> StatusCode {
            StatusCode::OK
        }

        let app = if run_succeeds {
            async fn run_ok(JsonExtract(_body): JsonExtract<serde_json::Value>) -> axum::Json<serde_json::Value> {
                axum::Json(serde_json::json!({ "result": { "echoed": true } }))
            }
            Router::new()
                .route("/status", get(status))
                .route("/init", post(init))
                .route("/run", post(run_ok))
        } else {
            async fn run_fail(JsonExtract(_body): JsonExtract<serde_json::Value>) -> (StatusCode, String) {
                (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string())
            }
            Router::new()
                .route("/status", get(status))
                .route("/init", post(init))
                .route("/run", post(run_fail))
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        addr
    }

    async fn dispatcher_with_fake_worker(run_succeeds: bool) -> (Dispatcher, SocketAddr) {
        let addr = spawn_fake_worker(run_succeeds).await;

        let registry = Arc::new(ManagerRegistry::new());
        let defaults = ManagerDefaults::default();
        registry.create_or_get("echo", || {
            FunctionManager::new(
                ManagerParams {
                    function_name: "echo".to_string(),
                    image_name: "noop:latest".to_string(),
                    container_port: 8080,
                    idle_timeout: Duration::from_secs(300),
                    min_idle_containers: 0,
                },
                &defaults,
                Arc::new(FakeDriver { host_port: addr.port() }),
            )
        });

        let driver: Arc<dyn ContainerDriver> = Arc::new(FakeDriver { host_port: addr.port() });
        let dispatcher = Dispatcher::new(registry, driver, PerfConfiguration::default(), ManagerDefaults::default());
        (dispatcher, addr)
    }

    #[tokio::test]
    async fn dispatch_returns_the_worker_result_and_releases_the_container() {
        let (dispatcher, _addr) = dispatcher_with_fake_worker(true).await;

        let outcome = dispatcher
            .dispatch("echo", &serde_json::json!({ "x": 1 }), false, None)
            .await
            .expect("dispatch should succeed");

        assert_eq!(outcome.result, serde_json::json!({ "echoed": true }));

        let status = dispatcher.registry.get("echo").unwrap().status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.busy, 0);
    }

    #[tokio::test]
    async fn a_failed_run_still_releases_the_container_back_to_idle() {
        let (dispatcher, _addr) = dispatcher_with_fake_worker(false).await;

        let result = dispatcher
            .dispatch("echo", &serde_json::json!({ "x": 1 }), false, None)
            .await;

        assert!(result.is_err());

        let status = dispatcher.registry.get("echo").unwrap().status();
        assert_eq!(status.idle, 1, "container must be returned to idle even though /run failed");
        assert_eq!(status.busy, 0);
    }

    #[tokio::test]
    async fn unknown_function_is_rejected_without_touching_any_manager() {
        let (dispatcher, _addr) = dispatcher_with_fake_worker(true).await;

        let result = dispatcher.dispatch("does-not-exist", &serde_json::json!({}), false, None).await;

        assert!(matches!(result, Err(ControllerError::UnknownFunction(_))));
    }
}
