//! Workflow Orchestrator: statically-coded DAGs, fan-out via a worker pool,
//! stage barriers, background execution.

mod specs;

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::error::{ControllerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowName {
    Video,
    Recognizer,
    Svd,
    Wordcount,
}

pub fn recognize(name: &str) -> Option<WorkflowName> {
    match name {
        "video" => Some(WorkflowName::Video),
        "recognizer" => Some(WorkflowName::Recognizer),
        "svd" => Some(WorkflowName::Svd),
        "wordcount" => Some(WorkflowName::Wordcount),
        _ => None,
    }
}

pub struct Orchestrator {
    dispatcher: Arc<Dispatcher>,
}

impl Orchestrator {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Validate the workflow name and start execution on a background task,
    /// returning immediately. Failures after this point are observable only
    /// via logs, per the workflow contract.
    pub fn start(&self, workflow_name: &str, payload: Value) -> Result<()> {
        let workflow = recognize(workflow_name)
            .ok_or_else(|| ControllerError::UnknownWorkflow(workflow_name.to_string()))?;

        let dispatcher = self.dispatcher.clone();
        let name = workflow_name.to_string();

        tokio::spawn(async move {
            info!("workflow {}: started", name);
            let outcome = match workflow {
                WorkflowName::Video => specs::run_video(&dispatcher, payload).await,
                WorkflowName::Recognizer => specs::run_recognizer(&dispatcher, payload).await,
                WorkflowName::Svd => specs::run_svd(&dispatcher, payload).await,
                WorkflowName::Wordcount => specs::run_wordcount(&dispatcher, payload).await,
            };

            match outcome {
                Ok(result) => info!("workflow {}: finished: {}", name, result),
                Err(e) => error!("workflow {}: aborted: {}", name, e),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::specs;
    use crate::config::{ManagerDefaults, PerfConfiguration};
    use crate::driver::{ContainerDriver, ContainerHandle, DriverResult, InspectInfo, RuntimeState};
    use crate::dispatcher::Dispatcher;
    use crate::manager::{FunctionManager, ManagerParams, ManagerRegistry};
    use async_trait::async_trait;
    use axum::extract::{Json as JsonExtract, State};
    use axum::routing::{get, post};
    use axum::Router;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeDriver {
        host_port: u16,
    }

    #[async_trait]
    impl ContainerDriver for FakeDriver {
        async fn create(&self, _image: &str, _port: u16) -> DriverResult<ContainerHandle> {
            Ok(ContainerHandle("fake-container".to_string()))
        }
        async fn inspect(&self, _h: &ContainerHandle) -> DriverResult<InspectInfo> {
            Ok(InspectInfo {
                host_port: Some(self.host_port),
                pid: Some(1),
                runtime_state: RuntimeState::Running,
            })
        }
        async fn logs(&self, _h: &ContainerHandle, _n: usize) -> DriverResult<String> {
            Ok(String::new())
        }
        async fn stop(&self, _h: &ContainerHandle, _g: u64) -> DriverResult<()> {
            Ok(())
        }
        async fn remove(&self, _h: &ContainerHandle, _f: bool) -> DriverResult<()> {
            Ok(())
        }
    }

    #[derive(Clone)]
    struct WorkerState {
        last_action: Arc<Mutex<String>>,
        violence_illegal: bool,
        censor_illegal: bool,
    }

    /// A single in-process worker that fans its `/run` response out by the
    /// action it was last `/init`-ed with, standing in for every function a
    /// workflow dispatches to.
    async fn spawn_shape_worker(violence_illegal: bool, censor_illegal: bool) -> SocketAddr {
        let state = WorkerState {
            last_action: Arc::new(Mutex::new(String::new())),
            violence_illegal,
            censor_illegal,
        };

        async fn status() -> &'static str {
            "ok"
        }

        async fn init(State(state): State<WorkerState>, JsonExtract(body): JsonExtract<Value>) -> &'static str {
            let action = body.get("action").and_then(|v| v.as_str()).unwrap_or("").to_string();
            *state.last_action.lock() = action;
            "ok"
        }

        async fn run(
            State(state): State<WorkerState>,
            JsonExtract(payload): JsonExtract<Value>,
        ) -> axum::Json<Value> {
            let action = state.last_action.lock().clone();
            let result = match action.as_str() {
                "split" => json!({ "split_keys": ["seg0", "seg1"] }),
                "transcode" => json!({ "transcoded_file": format!("{}.out", payload["split_file"]) }),
                "merge" => json!({ "final_video": "merged.mp4" }),

                "upload" => json!({ "image_path": "img.png" }),
                "adult" => json!({ "illegal": false }),
                "violence" => json!({ "illegal": state.violence_illegal }),
                "extract" => json!({ "text": "hello world" }),
                "censor" => json!({ "illegal": state.censor_illegal }),
                "translate" => json!({ "translated": "bonjour le monde" }),
                "mosaic" => json!({ "mosaic_image_path": "img_mosaic.png" }),

                "svd_start" => {
                    let slice_num = payload["slice_num"].as_u64().unwrap_or(0);
                    let slice_paths: Vec<Value> = (0..slice_num).map(|i| json!(format!("slice{i}"))).collect();
                    json!({ "slice_paths": slice_paths })
                }
                "svd_compute" => json!({ "index": payload["mat_index"] }),
                "svd_merge" => {
                    let count = payload["results"].as_array().map(|a| a.len()).unwrap_or(0);
                    json!({ "final_u_path": "u.bin", "count": count })
                }

                "wordcount_start" => {
                    let slice_num = payload["slice_num"].as_u64().unwrap_or(0);
                    let chunk_paths: Vec<Value> = (0..slice_num).map(|i| json!(format!("chunk{i}"))).collect();
                    json!({ "chunk_paths": chunk_paths })
                }
                "wordcount_count" => json!({ "result_path": format!("{}.count", payload["chunk_path"]) }),
                "wordcount_merge" => {
                    let count = payload["result_paths"].as_array().map(|a| a.len()).unwrap_or(0);
                    json!({ "final_word_count": count })
                }

                other => json!({ "error": format!("unhandled action '{other}'") }),
            };
            axum::Json(json!({ "result": result }))
        }

        let app = Router::new()
            .route("/status", get(status))
            .route("/init", post(init))
            .route("/run", post(run))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        addr
    }

    async fn dispatcher_for(port: u16, function_names: &[&str]) -> Dispatcher {
        let registry = Arc::new(ManagerRegistry::new());
        let defaults = ManagerDefaults::default();

        for name in function_names {
            registry.create_or_get(name, || {
                FunctionManager::new(
                    ManagerParams {
                        function_name: name.to_string(),
                        image_name: "noop:latest".to_string(),
                        container_port: 8080,
                        idle_timeout: Duration::from_secs(300),
                        min_idle_containers: 0,
                    },
                    &defaults,
                    Arc::new(FakeDriver { host_port: port }),
                )
            });
        }

        let driver: Arc<dyn ContainerDriver> = Arc::new(FakeDriver { host_port: port });
        Dispatcher::new(registry, driver, PerfConfiguration::default(), defaults)
    }

    #[tokio::test]
    async fn video_workflow_splits_transcodes_and_merges_every_segment() {
        let addr = spawn_shape_worker(false, false).await;
        let dispatcher = dispatcher_for(addr.port(), &["split", "transcode", "merge"]).await;

        let result = specs::run_video(
            &dispatcher,
            json!({
                "video_name": "clip.mp4",
                "segment_time": 10,
                "target_type": "mp4",
                "output_prefix": "out",
            }),
        )
        .await
        .expect("workflow should complete");

        assert_eq!(result, json!({ "final_video": "merged.mp4" }));
    }

    #[tokio::test]
    async fn wordcount_fan_out_width_matches_the_requested_slice_count() {
        let addr = spawn_shape_worker(false, false).await;
        let dispatcher = dispatcher_for(
            addr.port(),
            &["wordcount_start", "wordcount_count", "wordcount_merge"],
        )
        .await;

        let result = specs::run_wordcount(&dispatcher, json!({ "input_filename": "book.txt", "slice_num": 4 }))
            .await
            .expect("workflow should complete");

        assert_eq!(result, json!({ "final_word_count": 4 }));
    }

    #[tokio::test]
    async fn svd_compute_fan_out_enumerates_every_slice() {
        let addr = spawn_shape_worker(false, false).await;
        let dispatcher = dispatcher_for(addr.port(), &["svd_start", "svd_compute", "svd_merge"]).await;

        let result = specs::run_svd(
            &dispatcher,
            json!({ "row_num": 10, "col_num": 10, "slice_num": 3 }),
        )
        .await
        .expect("workflow should complete");

        assert_eq!(result["count"], json!(3));
    }

    #[tokio::test]
    async fn recognizer_applies_mosaic_when_any_check_flags_illegal() {
        let addr = spawn_shape_worker(true, false).await;
        let dispatcher = dispatcher_for(
            addr.port(),
            &["upload", "adult", "violence", "extract", "censor", "translate", "mosaic"],
        )
        .await;

        let result = specs::run_recognizer(&dispatcher, json!({ "image_filename": "pic.jpg" }))
            .await
            .expect("workflow should complete");

        assert_eq!(result, json!({ "image_path": "img_mosaic.png" }));
    }

    #[tokio::test]
    async fn recognizer_skips_mosaic_when_nothing_is_illegal() {
        let addr = spawn_shape_worker(false, false).await;
        let dispatcher = dispatcher_for(
            addr.port(),
            &["upload", "adult", "violence", "extract", "censor", "translate", "mosaic"],
        )
        .await;

        let result = specs::run_recognizer(&dispatcher, json!({ "image_filename": "pic.jpg" }))
            .await
            .expect("workflow should complete");

        assert_eq!(result, json!({ "image_path": "img.png" }));
    }
}
