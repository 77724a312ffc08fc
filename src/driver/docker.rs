//! Docker implementation of `ContainerDriver`, via bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, warn};

use super::{ContainerDriver, ContainerHandle, DriverError, DriverResult, InspectInfo, RuntimeState};

pub struct DockerDriver {
    client: Docker,
}

impl DockerDriver {
    /// Connect using a configured socket, or the platform's local defaults
    /// when `socket` is empty.
    pub fn connect(socket: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = if socket.is_empty() {
            Docker::connect_with_local_defaults()?
        } else {
            Docker::connect_with_socket(socket, timeout_secs, bollard::API_DEFAULT_VERSION)?
        };
        Ok(Self { client })
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn create(&self, image: &str, internal_port: u16) -> DriverResult<ContainerHandle> {
        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(format!("{internal_port}/tcp"), HashMap::new());

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            format!("{internal_port}/tcp"),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                // Empty host port asks the runtime to pick one automatically.
                host_port: Some(String::new()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            publish_all_ports: Some(false),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(image.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            tty: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: "",
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(options), container_config)
            .await
            .map_err(classify_create_error)?;

        let handle = ContainerHandle(created.id);

        self.client
            .start_container::<String>(&handle.0, None)
            .await
            .map_err(|e| DriverError::Runtime(e.to_string()))?;

        Ok(handle)
    }

    async fn inspect(&self, handle: &ContainerHandle) -> DriverResult<InspectInfo> {
        let info = self
            .client
            .inspect_container(&handle.0, None)
            .await
            .map_err(classify_inspect_error)?;

        let state = info.state.unwrap_or_default();
        let runtime_state = match state.running {
            Some(true) => RuntimeState::Running,
            Some(false) => RuntimeState::Stopped,
            None => RuntimeState::Unknown,
        };
        let pid = state.pid.and_then(|p| if p > 0 { Some(p as u32) } else { None });

        let host_port = info
            .network_settings
            .and_then(|ns| ns.ports)
            .and_then(|ports| {
                ports
                    .values()
                    .flatten()
                    .flat_map(|bindings| bindings.iter())
                    .find_map(|b| b.host_port.as_ref())
                    .and_then(|p| p.parse::<u16>().ok())
            });

        Ok(InspectInfo {
            host_port,
            pid,
            runtime_state,
        })
    }

    async fn logs(&self, handle: &ContainerHandle, tail_n: usize) -> DriverResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail_n.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(&handle.0, Some(options));
        let mut out = String::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => out.push_str(&output.to_string()),
                Err(e) => {
                    warn!("error reading logs for {}: {}", handle, e);
                    break;
                }
            }
        }

        Ok(out)
    }

    async fn stop(&self, handle: &ContainerHandle, grace_seconds: u64) -> DriverResult<()> {
        let options = StopContainerOptions {
            t: grace_seconds as i64,
        };

        match self.client.stop_container(&handle.0, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                debug!("container {} already gone, nothing to stop", handle);
                Ok(())
            }
            Err(e) => Err(DriverError::Runtime(e.to_string())),
        }
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> DriverResult<()> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        match self.client.remove_container(&handle.0, Some(options)).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                debug!("container {} already removed", handle);
                Ok(())
            }
            Err(e) => Err(DriverError::Runtime(e.to_string())),
        }
    }
}

fn classify_create_error(e: bollard::errors::Error) -> DriverError {
    match &e {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
            DriverError::ImageMissing(e.to_string())
        }
        bollard::errors::Error::DockerResponseServerError { status_code: 409, .. } => {
            DriverError::CreationRefused(e.to_string())
        }
        _ => DriverError::Runtime(e.to_string()),
    }
}

fn classify_inspect_error(e: bollard::errors::Error) -> DriverError {
    if let bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } = e {
        DriverError::NotFound(e.to_string())
    } else {
        DriverError::Runtime(e.to_string())
    }
}
