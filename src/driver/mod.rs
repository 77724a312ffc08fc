//! Container driver: a thin capability abstraction over a container runtime.

mod docker;

pub use docker::DockerDriver;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque handle used by the driver to reference a running container across
/// `inspect`/`logs`/`stop`/`remove` calls. Cloneable and cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl ContainerHandle {
    pub fn id(&self) -> &str {
        &self.0
    }

    /// A short id suitable for log filenames, mirroring how container
    /// runtimes themselves abbreviate ids for display.
    pub fn short_id(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime-observed state of a container, as reported by `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Running,
    Stopped,
    Unknown,
}

/// Result of inspecting a live container.
#[derive(Debug, Clone)]
pub struct InspectInfo {
    pub host_port: Option<u16>,
    pub pid: Option<u32>,
    pub runtime_state: RuntimeState,
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("image not found: {0}")]
    ImageMissing(String),

    #[error("container creation refused: {0}")]
    CreationRefused(String),

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Thin capability abstraction over a container runtime. Implementations
/// must surface the four failure conditions above as distinct errors rather
/// than collapsing them into a generic runtime error.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Start a container from `image`, exposing `internal_port` bound to an
    /// automatically-chosen host port. Returns the runtime-assigned id and a
    /// handle for subsequent operations.
    async fn create(&self, image: &str, internal_port: u16) -> DriverResult<ContainerHandle>;

    /// Inspect a container's current host port mapping, main process id, and
    /// runtime state.
    async fn inspect(&self, handle: &ContainerHandle) -> DriverResult<InspectInfo>;

    /// Fetch the last `tail_n` lines of combined stdout/stderr.
    async fn logs(&self, handle: &ContainerHandle, tail_n: usize) -> DriverResult<String>;

    /// Stop a running container, allowing `grace_seconds` for orderly exit.
    async fn stop(&self, handle: &ContainerHandle, grace_seconds: u64) -> DriverResult<()>;

    /// Remove a container. `force` kills it first if still running.
    async fn remove(&self, handle: &ContainerHandle, force: bool) -> DriverResult<()>;
}
