//! Configuration structures and loading

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level daemon configuration, loaded once at startup from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// HTTP API server configuration
    #[serde(default)]
    pub api: ApiConfiguration,

    /// Docker connection configuration
    #[serde(default)]
    pub docker: DockerConfiguration,

    /// Performance sampling configuration
    #[serde(default)]
    pub perf: PerfConfiguration,

    /// Defaults applied to `create_manager` calls that omit a field
    #[serde(default)]
    pub managers: ManagerDefaults,
}

impl Configuration {
    /// Load configuration from a TOML file, resolving relative paths against
    /// the file's parent directory and creating any directories it names.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {path}"))?;

        let mut config: Configuration =
            toml::from_str(&content).with_context(|| "failed to parse configuration")?;

        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.perf.log_dir = resolve_path(&config.perf.log_dir, &base_dir);
        std::fs::create_dir_all(&config.perf.log_dir)
            .with_context(|| format!("failed to create perf log dir: {}", config.perf.log_dir.display()))?;

        Ok(config)
    }
}

fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8080
}

/// Docker daemon connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfiguration {
    /// Docker socket / endpoint; empty string means "use local defaults"
    #[serde(default)]
    pub socket: String,

    /// Connection timeout in seconds
    #[serde(default = "default_docker_timeout")]
    pub timeout_secs: u64,
}

impl Default for DockerConfiguration {
    fn default() -> Self {
        Self {
            socket: String::new(),
            timeout_secs: default_docker_timeout(),
        }
    }
}

fn default_docker_timeout() -> u64 {
    30
}

/// Performance sampling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PerfConfiguration {
    /// Root directory under which per-function log subdirectories are created
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Path to the external sampler binary
    #[serde(default = "default_sampler_bin")]
    pub sampler_bin: String,

    /// Comma-separated default event list passed to the sampler
    #[serde(default = "default_events")]
    pub events: String,

    /// Fixed delay after launching the sampler, before `/run` is invoked
    #[serde(default = "default_attach_delay_ms")]
    pub attach_delay_ms: u64,

    /// Grace period given to the sampler to exit after an interrupt, before
    /// it is forcibly killed
    #[serde(default = "default_sampler_grace_secs")]
    pub sampler_grace_secs: u64,

    /// Whether the denoising baseline `noop` run receives the target's
    /// payload (preserving the source behaviour) or an empty payload.
    #[serde(default = "default_true")]
    pub denoise_with_target_payload: bool,
}

impl Default for PerfConfiguration {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            sampler_bin: default_sampler_bin(),
            events: default_events(),
            attach_delay_ms: default_attach_delay_ms(),
            sampler_grace_secs: default_sampler_grace_secs(),
            denoise_with_target_payload: true,
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("perf_logs")
}

fn default_sampler_bin() -> String {
    "perf".into()
}

fn default_events() -> String {
    "cycles,instructions,task-clock,context-switches,cache-misses,\
L1-dcache-load-misses,LLC-load-misses,page-faults"
        .into()
}

fn default_attach_delay_ms() -> u64 {
    100
}

fn default_sampler_grace_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Defaults applied when a `create_manager` request omits a field
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerDefaults {
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_min_idle_containers")]
    pub min_idle_containers: usize,

    /// Interval between eviction-loop cycles
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// Total deadline for container creation (port mapping + health check)
    #[serde(default = "default_create_deadline_secs")]
    pub create_deadline_secs: u64,

    /// Polling interval used while waiting on a new container's `/status`
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Image used to auto-register the `noop` manager backing the denoising
    /// baseline, when nothing registered one via `/create_manager` first.
    #[serde(default = "default_noop_image")]
    pub noop_image: String,
}

impl Default for ManagerDefaults {
    fn default() -> Self {
        Self {
            container_port: default_container_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
            min_idle_containers: default_min_idle_containers(),
            eviction_interval_secs: default_eviction_interval_secs(),
            create_deadline_secs: default_create_deadline_secs(),
            health_check_interval_ms: default_health_check_interval_ms(),
            noop_image: default_noop_image(),
        }
    }
}

fn default_container_port() -> u16 {
    8080
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_min_idle_containers() -> usize {
    1
}

fn default_eviction_interval_secs() -> u64 {
    30
}

fn default_create_deadline_secs() -> u64 {
    30
}

fn default_health_check_interval_ms() -> u64 {
    10
}

fn default_noop_image() -> String {
    "noop:latest".into()
}
