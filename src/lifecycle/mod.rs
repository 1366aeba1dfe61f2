//! Agent container lifecycle.
//!
//! Mounts are a creation-time property in Docker, so convergence with the
//! declared shared-folder topology is achieved declaratively: on every
//! start the container's shared mounts are compared with the expected set,
//! and on divergence the container is recreated with its image, env,
//! labels, ports, and non-shared mounts preserved.

/// Pure expected-mount computation and set comparison
pub mod mounts;

pub use mounts::{expected_shared_mounts, shared_volume_name, MountSpec};

use crate::config::DockerConfig;
use crate::constants::SHARED_VOLUME_OWNER;
use crate::store::RecordStore;
use crate::{FleetError, Result};
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerInspectResponse, HostConfig};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a `start` request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOutcome {
    /// The existing container's mounts matched; it was started as-is.
    Started,
    /// Mounts diverged; the container was recreated and started.
    Recreated,
}

/// Summary of an agent container's state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerStatus {
    pub agent_name: String,
    pub running: bool,
    pub state: Option<String>,
}

/// Drives agent containers through the Docker API.
pub struct ContainerManager {
    docker: Docker,
    records: Arc<dyn RecordStore>,
    config: DockerConfig,
}

/// Container name for an agent.
pub fn container_name(agent: &str) -> String {
    format!("agent-{agent}")
}

fn is_not_found(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

impl ContainerManager {
    pub fn new(records: Arc<dyn RecordStore>, config: DockerConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            records,
            config,
        })
    }

    /// Starts the agent's container, converging its shared-folder mounts
    /// with the declared configuration first.
    pub async fn start(&self, agent: &str) -> Result<StartOutcome> {
        let name = container_name(agent);
        let inspect = self
            .docker
            .inspect_container(&name, None)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    FleetError::Container {
                        agent: agent.to_string(),
                        message: "no container exists for this agent".to_string(),
                    }
                } else {
                    FleetError::Docker(e)
                }
            })?;

        let expected = self.expected_mounts(agent).await?;
        let actual = shared_mounts_of(&inspect);

        if actual == expected {
            debug!(agent, "Shared mounts converged, starting existing container");
            self.start_container(&name).await?;
            return Ok(StartOutcome::Started);
        }

        info!(
            agent,
            actual = ?actual,
            expected = ?expected,
            "Shared mounts diverged, recreating container"
        );
        self.recreate(&name, inspect, &expected).await?;
        self.start_container(&name).await?;
        Ok(StartOutcome::Recreated)
    }

    /// Stops the agent's container with the configured grace period.
    pub async fn stop(&self, agent: &str) -> Result<()> {
        let name = container_name(agent);
        match self
            .docker
            .stop_container(
                &name,
                Some(StopContainerOptions {
                    t: self.config.stop_grace_secs,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(FleetError::Docker(e)),
        }
    }

    pub async fn status(&self, agent: &str) -> Result<ContainerStatus> {
        let name = container_name(agent);
        let inspect = self.docker.inspect_container(&name, None).await?;
        let state = inspect.state.unwrap_or_default();
        Ok(ContainerStatus {
            agent_name: agent.to_string(),
            running: state.running.unwrap_or(false),
            state: state.status.map(|s| format!("{s:?}").to_lowercase()),
        })
    }

    /// Resolves the expected shared mounts from the declared configuration,
    /// ensuring the agent's own volume exists when it exposes one.
    async fn expected_mounts(&self, agent: &str) -> Result<BTreeSet<MountSpec>> {
        let folder_config = self.records.shared_folder_config(agent).await?;

        let mut exposing_peers = Vec::new();
        if folder_config.consume_enabled {
            for peer in self.records.callable_peers(agent).await? {
                let peer_config = self.records.shared_folder_config(&peer).await?;
                if peer_config.expose_enabled {
                    exposing_peers.push(peer);
                }
            }
        }

        if folder_config.expose_enabled {
            self.ensure_shared_volume(agent).await?;
        }

        Ok(expected_shared_mounts(&folder_config, &exposing_peers))
    }

    /// Creates the agent's shared volume if missing. A freshly created
    /// volume is chowned to the agent's non-root user by a one-shot helper
    /// container before first use.
    async fn ensure_shared_volume(&self, agent: &str) -> Result<()> {
        let volume = shared_volume_name(agent);
        match self.docker.inspect_volume(&volume).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(FleetError::Docker(e)),
        }

        info!(agent, volume = %volume, "Creating shared volume");
        self.docker
            .create_volume(CreateVolumeOptions {
                name: volume.clone(),
                ..Default::default()
            })
            .await?;
        self.chown_volume(&volume).await
    }

    async fn chown_volume(&self, volume: &str) -> Result<()> {
        let helper_name = format!("fleet-chown-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let helper_config = Config {
            image: Some(self.config.helper_image.clone()),
            cmd: Some(
                ["chown", "-R", SHARED_VOLUME_OWNER, "/shared"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{volume}:/shared")]),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: helper_name.clone(),
                    ..Default::default()
                }),
                helper_config,
            )
            .await?;
        self.docker
            .start_container(&helper_name, None::<StartContainerOptions<String>>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(&helper_name, None::<WaitContainerOptions<String>>);
        while let Some(result) = wait.next().await {
            match result {
                Ok(exit) if exit.status_code != 0 => {
                    warn!(volume, code = exit.status_code, "Volume chown helper exited non-zero");
                }
                Ok(_) => {}
                Err(e) => warn!(volume, "Volume chown helper wait failed: {e}"),
            }
        }

        self.docker
            .remove_container(
                &helper_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    /// Stops and removes the container, then creates it again with the old
    /// image, env, labels, ports, resource limits, and non-shared mounts,
    /// plus the expected shared-mount set.
    async fn recreate(
        &self,
        name: &str,
        inspect: ContainerInspectResponse,
        expected: &BTreeSet<MountSpec>,
    ) -> Result<()> {
        let old_config = inspect.config.clone().unwrap_or_default();
        let old_host = inspect.host_config.clone().unwrap_or_default();

        let mut binds: Vec<String> = old_host
            .binds
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|bind| !mounts::is_shared_bind(bind))
            .collect();
        binds.extend(expected.iter().map(MountSpec::to_bind));

        let mut host_config = old_host;
        host_config.binds = Some(binds);
        // Shared volumes are managed through binds; drop any stale entries
        // from the structured mounts list as well.
        host_config.mounts = host_config.mounts.map(|mounts| {
            mounts
                .into_iter()
                .filter(|m| {
                    m.target
                        .as_deref()
                        .map(|t| !mounts::is_shared_target(t))
                        .unwrap_or(true)
                })
                .collect()
        });

        match self
            .docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: self.config.stop_grace_secs,
                }),
            )
            .await
        {
            Ok(()) => {}
            Err(e) if is_not_modified(&e) => {}
            Err(e) => return Err(FleetError::Docker(e)),
        }
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;

        let create_config = Config {
            hostname: old_config.hostname,
            user: old_config.user,
            env: old_config.env,
            cmd: old_config.cmd,
            entrypoint: old_config.entrypoint,
            image: old_config.image,
            working_dir: old_config.working_dir,
            labels: old_config.labels,
            exposed_ports: old_config.exposed_ports,
            volumes: old_config.volumes,
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    ..Default::default()
                }),
                create_config,
            )
            .await?;
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running counts as started.
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(FleetError::Docker(e)),
        }
    }
}

/// Extracts the shared-folder mounts currently on a container.
fn shared_mounts_of(inspect: &ContainerInspectResponse) -> BTreeSet<MountSpec> {
    inspect
        .mounts
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|mount| {
            let target = mount.destination.as_deref()?;
            if !mounts::is_shared_target(target) {
                return None;
            }
            let source = mount
                .name
                .clone()
                .or_else(|| mount.source.clone())
                .unwrap_or_default();
            Some(MountSpec {
                source,
                target: target.to_string(),
                read_only: !mount.rw.unwrap_or(true),
            })
        })
        .collect()
}
