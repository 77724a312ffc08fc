//! Function Manager: owns one function's container pool.

mod registry;

pub use registry::{ManagerRegistry, Registration};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ManagerDefaults;
use crate::driver::{ContainerDriver, ContainerHandle, RuntimeState};
use crate::error::{ControllerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Starting,
    Idle,
    Busy,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ContainerRecord {
    pub handle: ContainerHandle,
    pub host_port: u16,
    pub status: ContainerStatus,
    pub last_active: Instant,
    pub runtime_state: RuntimeState,
}

/// Snapshot used by the HTTP surface's `/manager_status` endpoint.
pub struct PoolStatus {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub containers: Vec<(String, u16)>,
}

/// Parameters a manager is registered with; defaults are filled in by the
/// caller from `ManagerDefaults` before construction.
#[derive(Debug, Clone)]
pub struct ManagerParams {
    pub function_name: String,
    pub image_name: String,
    pub container_port: u16,
    pub idle_timeout: Duration,
    pub min_idle_containers: usize,
}

pub struct FunctionManager {
    function_name: String,
    image_name: String,
    container_port: u16,
    idle_timeout: Duration,
    min_idle_containers: usize,
    create_deadline: Duration,
    health_check_interval: Duration,
    eviction_interval: Duration,

    driver: Arc<dyn ContainerDriver>,
    http: reqwest::Client,

    table: Mutex<HashMap<String, ContainerRecord>>,
    stop: CancellationToken,
}

impl FunctionManager {
    pub fn new(
        params: ManagerParams,
        defaults: &ManagerDefaults,
        driver: Arc<dyn ContainerDriver>,
    ) -> Self {
        Self {
            function_name: params.function_name,
            image_name: params.image_name,
            container_port: params.container_port,
            idle_timeout: params.idle_timeout,
            min_idle_containers: params.min_idle_containers,
            create_deadline: Duration::from_secs(defaults.create_deadline_secs),
            health_check_interval: Duration::from_millis(defaults.health_check_interval_ms),
            eviction_interval: Duration::from_secs(defaults.eviction_interval_secs),
            driver,
            http: reqwest::Client::new(),
            table: Mutex::new(HashMap::new()),
            stop: CancellationToken::new(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Returns a container currently idle, transitioning it to busy. Creates
    /// one on demand if the pool has none idle.
    pub async fn checkout(&self) -> Result<(u16, String)> {
        if let Some((id, port)) = self.try_checkout_idle() {
            debug!("{}: checked out existing container {}", self.function_name, id);
            return Ok((port, id));
        }

        let record = self
            .create_container(ContainerStatus::Busy)
            .await
            .map_err(|e| ControllerError::ResourceExhausted {
                function: self.function_name.clone(),
                message: e.to_string(),
            })?;

        Ok((record.host_port, record.handle.id().to_string()))
    }

    /// LIFO: among idle+running containers, prefer the most recently active.
    fn try_checkout_idle(&self) -> Option<(String, u16)> {
        let mut table = self.table.lock();
        let chosen = table
            .iter()
            .filter(|(_, rec)| rec.status == ContainerStatus::Idle)
            .max_by_key(|(_, rec)| rec.last_active)
            .map(|(id, rec)| (id.clone(), rec.host_port));

        if let Some((id, port)) = &chosen {
            if let Some(rec) = table.get_mut(id) {
                rec.status = ContainerStatus::Busy;
            }
            return Some((id.clone(), *port));
        }
        None
    }

    /// Transition a busy container back to idle. Idempotent and infallible.
    pub fn release(&self, container_id: &str) {
        let mut table = self.table.lock();
        match table.get_mut(container_id) {
            Some(rec) if rec.status == ContainerStatus::Idle => {
                debug!("{}: release on already-idle container {}", self.function_name, container_id);
            }
            Some(rec) => {
                rec.status = ContainerStatus::Idle;
                rec.last_active = Instant::now();
            }
            None => {
                warn!("{}: release of unknown container {}", self.function_name, container_id);
            }
        }
    }

    /// Start the container, wait for its host port to appear, then poll its
    /// `/status` endpoint until it reports readiness or the deadline passes.
    /// Inserted into the table exactly once, already in `initial_status` —
    /// callers never see an intermediate `Idle` state to race against.
    async fn create_container(&self, initial_status: ContainerStatus) -> anyhow::Result<ContainerRecord> {
        let handle = self.driver.create(&self.image_name, self.container_port).await?;
        let id = handle.id().to_string();

        {
            let mut table = self.table.lock();
            table.insert(
                id.clone(),
                ContainerRecord {
                    handle: handle.clone(),
                    host_port: 0,
                    status: ContainerStatus::Starting,
                    last_active: Instant::now(),
                    runtime_state: RuntimeState::Unknown,
                },
            );
        }

        let deadline = Instant::now() + self.create_deadline;
        let host_port = loop {
            let info = self.driver.inspect(&handle).await?;
            if let Some(port) = info.host_port {
                break port;
            }
            if Instant::now() >= deadline {
                self.abandon_creation(&handle, &id).await;
                anyhow::bail!("timed out waiting for host port mapping");
            }
            tokio::time::sleep(self.health_check_interval).await;
        };

        if let Err(e) = self.wait_for_ready(host_port, deadline).await {
            self.abandon_creation(&handle, &id).await;
            anyhow::bail!("health check failed: {e}");
        }

        let record = ContainerRecord {
            handle,
            host_port,
            status: initial_status,
            last_active: Instant::now(),
            runtime_state: RuntimeState::Running,
        };

        {
            let mut table = self.table.lock();
            table.insert(id, record.clone());
        }

        info!("{}: container {} ready on port {}", self.function_name, record.handle, host_port);
        Ok(record)
    }

    async fn wait_for_ready(&self, host_port: u16, deadline: Instant) -> anyhow::Result<()> {
        let url = format!("http://127.0.0.1:{host_port}/status");

        loop {
            if Instant::now() >= deadline {
                anyhow::bail!("worker never reported ready");
            }

            match self.http.get(&url).timeout(Duration::from_secs(2)).send().await {
                Ok(resp) => {
                    if let Ok(body) = resp.json::<serde_json::Value>().await {
                        let status = body.get("status").and_then(|v| v.as_str()).unwrap_or("");
                        if matches!(status, "new" | "ok" | "ready") {
                            return Ok(());
                        }
                    }
                }
                Err(_) => {}
            }

            tokio::time::sleep(self.health_check_interval).await;
        }
    }

    async fn abandon_creation(&self, handle: &ContainerHandle, id: &str) {
        if let Ok(logs) = self.driver.logs(handle, 200).await {
            warn!("{}: creation abandoned, container log tail:\n{}", self.function_name, logs);
        }
        let _ = self.driver.stop(handle, 5).await;
        let _ = self.driver.remove(handle, true).await;
        self.table.lock().remove(id);
    }

    /// Signal the eviction loop to stop, then synchronously stop+remove every
    /// owned container. Called at process shutdown.
    pub async fn stop_all(&self) {
        self.stop.cancel();

        let handles: Vec<ContainerHandle> = {
            let table = self.table.lock();
            table.values().map(|r| r.handle.clone()).collect()
        };

        for handle in handles {
            let _ = self.driver.stop(&handle, 5).await;
            let _ = self.driver.remove(&handle, true).await;
        }

        self.table.lock().clear();
    }

    pub fn status(&self) -> PoolStatus {
        let table = self.table.lock();
        let idle = table.values().filter(|r| r.status == ContainerStatus::Idle).count();
        let busy = table.values().filter(|r| r.status == ContainerStatus::Busy).count();
        let containers = table.values().map(|r| (r.handle.id().to_string(), r.host_port)).collect();

        PoolStatus {
            total: table.len(),
            idle,
            busy,
            containers,
        }
    }

    /// Run the eviction loop on the current task until `stop_all` cancels it.
    pub async fn run_eviction_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.eviction_interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    debug!("{}: eviction loop stopped", self.function_name);
                    return;
                }
                _ = interval.tick() => {
                    self.run_eviction_cycle().await;
                }
            }
        }
    }

    async fn run_eviction_cycle(&self) {
        self.refresh_runtime_states().await;

        let mut idle_running: Vec<(String, Instant)> = {
            let table = self.table.lock();
            let mut v: Vec<_> = table
                .iter()
                .filter(|(_, rec)| rec.status == ContainerStatus::Idle && rec.runtime_state == RuntimeState::Running)
                .map(|(id, rec)| (id.clone(), rec.last_active))
                .collect();
            v.sort_by_key(|(_, last_active)| *last_active);
            v
        };

        let total = idle_running.len();
        let now = Instant::now();
        let mut to_remove = Vec::new();

        for (i, (id, last_active)) in idle_running.drain(..).enumerate() {
            // `idle_after` counts records after this one in recency order, i.e.
            // how many would remain idle if this one were evicted. Evicting is
            // only safe while that count is still at least the minimum.
            let idle_after = total - i - 1;
            let age = now.duration_since(last_active);
            if idle_after >= self.min_idle_containers && age > self.idle_timeout {
                to_remove.push(id);
            }
        }

        for id in &to_remove {
            let handle = {
                let table = self.table.lock();
                table.get(id).map(|r| r.handle.clone())
            };
            if let Some(handle) = handle {
                if let Err(e) = self.driver.stop(&handle, 5).await {
                    warn!("{}: eviction stop failed for {}: {}", self.function_name, handle, e);
                }
                if let Err(e) = self.driver.remove(&handle, true).await {
                    warn!("{}: eviction remove failed for {}: {}", self.function_name, handle, e);
                }
            }
            self.table.lock().remove(id);
        }

        if !to_remove.is_empty() {
            info!("{}: evicted {} idle containers", self.function_name, to_remove.len());
        }

        let idle_count = {
            let table = self.table.lock();
            table.values().filter(|r| r.status == ContainerStatus::Idle).count()
        };

        if idle_count < self.min_idle_containers {
            let needed = self.min_idle_containers - idle_count;
            info!("{}: pre-warming {} containers", self.function_name, needed);
            for _ in 0..needed {
                if let Err(e) = self.create_container(ContainerStatus::Idle).await {
                    warn!("{}: pre-warm creation failed: {}", self.function_name, e);
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    async fn refresh_runtime_states(&self) {
        let handles: Vec<(String, ContainerHandle)> = {
            let table = self.table.lock();
            table.iter().map(|(id, rec)| (id.clone(), rec.handle.clone())).collect()
        };

        for (id, handle) in handles {
            let state = match self.driver.inspect(&handle).await {
                Ok(info) => info.runtime_state,
                Err(_) => RuntimeState::Unknown,
            };
            if let Some(rec) = self.table.lock().get_mut(&id) {
                rec.runtime_state = state;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ContainerDriver, DriverResult, InspectInfo};
    use async_trait::async_trait;

    struct AlwaysRunningDriver;

    #[async_trait]
    impl ContainerDriver for AlwaysRunningDriver {
        async fn create(&self, _image: &str, _port: u16) -> DriverResult<ContainerHandle> {
            // The eviction-cycle tests seed their pools directly; if a cycle
            // tries to pre-warm, that's exercised as a graceful failure, not
            // a real container launch.
            Err(crate::driver::DriverError::Runtime("creation unsupported in this test driver".into()))
        }
        async fn inspect(&self, _h: &ContainerHandle) -> DriverResult<InspectInfo> {
            Ok(InspectInfo {
                host_port: None,
                pid: None,
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

    fn manager_with(min_idle_containers: usize, idle_timeout: Duration) -> FunctionManager {
        let defaults = ManagerDefaults::default();
        FunctionManager::new(
            ManagerParams {
                function_name: "eviction-test".to_string(),
                image_name: "noop:latest".to_string(),
                container_port: 8080,
                idle_timeout,
                min_idle_containers,
            },
            &defaults,
            Arc::new(AlwaysRunningDriver),
        )
    }

    fn seed_idle(manager: &FunctionManager, id: &str, age: Duration) {
        let mut table = manager.table.lock();
        table.insert(
            id.to_string(),
            ContainerRecord {
                handle: ContainerHandle(id.to_string()),
                host_port: 0,
                status: ContainerStatus::Idle,
                last_active: Instant::now() - age,
                runtime_state: RuntimeState::Running,
            },
        );
    }

    #[tokio::test]
    async fn eviction_cycle_leaves_exactly_the_minimum_when_all_containers_are_aged() {
        let manager = manager_with(1, Duration::from_secs(60));
        seed_idle(&manager, "oldest", Duration::from_secs(600));
        seed_idle(&manager, "middle", Duration::from_secs(300));
        seed_idle(&manager, "newest", Duration::from_secs(120));
        seed_idle(&manager, "newest2", Duration::from_secs(90));

        manager.run_eviction_cycle().await;

        let status = manager.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.total, 1);

        let table = manager.table.lock();
        assert!(table.contains_key("newest2"), "the most recently active record should survive");
        assert!(!table.contains_key("oldest"));
        assert!(!table.contains_key("middle"));
        assert!(!table.contains_key("newest"));
    }

    #[tokio::test]
    async fn eviction_cycle_never_drops_below_the_minimum_even_if_all_are_aged() {
        let manager = manager_with(3, Duration::from_secs(60));
        seed_idle(&manager, "a", Duration::from_secs(600));
        seed_idle(&manager, "b", Duration::from_secs(500));

        manager.run_eviction_cycle().await;

        // Both are aged, but removing either would drop the pool below the
        // configured minimum, so neither is evicted.
        assert_eq!(manager.status().idle, 2);
    }

    #[tokio::test]
    async fn eviction_cycle_ignores_records_younger_than_the_idle_timeout() {
        let manager = manager_with(0, Duration::from_secs(300));
        seed_idle(&manager, "fresh", Duration::from_secs(5));

        manager.run_eviction_cycle().await;

        assert_eq!(manager.status().idle, 1);
    }
}
