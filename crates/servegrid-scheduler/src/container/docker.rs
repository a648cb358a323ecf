//! Docker engine via bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{DeviceRequest, EndpointSettings, HostConfig, PortBinding};
use futures::StreamExt;
use tracing::{debug, info, warn};

use servegrid_core::RuntimeInfo;

use crate::container::engine::{ContainerEngine, ContainerLaunch};
use crate::error::SchedulerResult;

pub struct DockerEngine {
    docker: Docker,
    stop_timeout_secs: i64,
}

impl DockerEngine {
    /// Connect to the local Docker daemon (socket or `DOCKER_HOST`).
    pub fn connect(stop_timeout_secs: i64) -> SchedulerResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            stop_timeout_secs,
        })
    }

    fn container_config(launch: &ContainerLaunch) -> Config<String> {
        let port = format!("{}/tcp", launch.port);
        let exposed_ports = HashMap::from([(port.clone(), HashMap::new())]);
        let port_bindings = HashMap::from([(
            port,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: None,
            }]),
        )]);

        let device_requests = (!launch.gpu_ids.is_empty()).then(|| {
            vec![DeviceRequest {
                driver: Some("nvidia".to_string()),
                device_ids: Some(launch.gpu_ids.clone()),
                capabilities: Some(vec![vec!["gpu".to_string()]]),
                ..Default::default()
            }]
        });

        let has_network = !launch.network.is_empty();
        let host_config = HostConfig {
            binds: Some(launch.binds.clone()),
            port_bindings: Some(port_bindings),
            ipc_mode: Some("host".to_string()),
            device_requests,
            network_mode: has_network.then(|| launch.network.clone()),
            ..Default::default()
        };

        let networking_config = has_network.then(|| {
            let aliases = (!launch.network_alias.is_empty()).then(|| vec![launch.network_alias.clone()]);
            NetworkingConfig {
                endpoints_config: HashMap::from([(
                    launch.network.clone(),
                    EndpointSettings {
                        aliases,
                        ..Default::default()
                    },
                )]),
            }
        });

        Config {
            image: Some(launch.image.clone()),
            cmd: Some(launch.cmd.clone()),
            env: Some(launch.env.clone()),
            tty: Some(true),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        }
    }
}

fn status_code(e: &DockerError) -> Option<u16> {
    match e {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ensure_image(&self, image: &str) -> SchedulerResult<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if status_code(&e) == Some(404) => {}
            Err(e) => return Err(e.into()),
        }

        info!(%image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress?;
            if let Some(status) = progress.status {
                debug!(%image, %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn create(&self, launch: &ContainerLaunch) -> SchedulerResult<String> {
        let options = CreateContainerOptions {
            name: launch.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), Self::container_config(launch))
            .await?;
        for warning in &created.warnings {
            warn!(container = %launch.name, %warning, "docker create warning");
        }
        debug!(container = %launch.name, id = %created.id, gpus = ?launch.gpu_ids, "container created");
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> SchedulerResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        info!(%id, "container started");
        Ok(())
    }

    async fn stop_and_remove(&self, id: &str) -> SchedulerResult<()> {
        let stop = StopContainerOptions {
            t: self.stop_timeout_secs,
        };
        match self.docker.stop_container(id, Some(stop)).await {
            Ok(()) => {}
            // 304: already stopped, 404: already gone.
            Err(e) if matches!(status_code(&e), Some(304) | Some(404)) => {}
            Err(e) => return Err(e.into()),
        }

        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(remove)).await {
            Ok(()) => {}
            Err(e) if status_code(&e) == Some(404) => {}
            Err(e) => return Err(e.into()),
        }
        info!(%id, "container removed");
        Ok(())
    }

    async fn inspect(&self, id: &str) -> SchedulerResult<Option<RuntimeInfo>> {
        let resp = match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => resp,
            Err(e) if status_code(&e) == Some(404) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let status = resp
            .state
            .and_then(|s| s.status)
            .and_then(|s| serde_json::to_value(s).ok())
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        let name = resp
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();

        Ok(Some(RuntimeInfo {
            id: resp.id.unwrap_or_else(|| id.to_string()),
            name,
            status,
        }))
    }
}
