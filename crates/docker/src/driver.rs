//! Bollard-backed [`ContainerRuntime`] implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{
    ContainerCreateBody, ContainerSummary, HostConfig, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, StatsOptionsBuilder,
    StopContainerOptionsBuilder,
};
use bollard::Docker;
use futures_util::StreamExt;

use bm_domain::bot::{ContainerState, ContainerStats, ManagedContainer};

use crate::traits::{ContainerRuntime, CreateSpec};
use crate::{container_name, hostname_of, DriverError, DriverResult, BOT_ID_LABEL, MANAGED_LABEL};

/// How long a single stats sample may take before the container is skipped.
const STATS_SAMPLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Adapter over the local Docker daemon.
pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    /// Connect using the platform defaults (unix socket / npipe).
    pub fn connect() -> DriverResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DriverError::NetworkError(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Verify the daemon answers. Used at startup for a loud early failure.
    pub async fn ping(&self) -> DriverResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DriverError::NetworkError(e.to_string()))
    }

    /// Sample one container; `None` when it disappeared or timed out.
    async fn sample_stats(&self, summary: &ContainerSummary) -> Option<ContainerStats> {
        let id = summary.id.as_deref()?;
        let name = summary
            .names
            .as_ref()
            .and_then(|n| n.first())
            .map(|n| n.trim_start_matches('/').to_string())?;
        let hostname = hostname_of(&name)?.to_string();

        let opts = StatsOptionsBuilder::default().stream(false).one_shot(false).build();
        let mut stream = Box::pin(self.docker.stats(id, Some(opts)));
        let sample = tokio::time::timeout(STATS_SAMPLE_TIMEOUT, stream.next()).await;
        let stats = match sample {
            Ok(Some(Ok(s))) => s,
            // Gone mid-listing or daemon hiccup: skip, don't fail the sweep.
            Ok(Some(Err(e))) => {
                tracing::debug!(container = %name, error = %e, "stats sample failed");
                return None;
            }
            Ok(None) => return None,
            Err(_) => {
                tracing::debug!(container = %name, "stats sample timed out");
                return None;
            }
        };

        let cpu_percent = {
            let cpu = stats.cpu_stats.as_ref();
            let pre = stats.precpu_stats.as_ref();
            let total = cpu
                .and_then(|c| c.cpu_usage.as_ref())
                .and_then(|u| u.total_usage)
                .unwrap_or(0);
            let pre_total = pre
                .and_then(|c| c.cpu_usage.as_ref())
                .and_then(|u| u.total_usage)
                .unwrap_or(0);
            let system = cpu.and_then(|c| c.system_cpu_usage).unwrap_or(0);
            let pre_system = pre.and_then(|c| c.system_cpu_usage).unwrap_or(0);
            let online = cpu.and_then(|c| c.online_cpus).unwrap_or(1).max(1);

            let cpu_delta = total.saturating_sub(pre_total) as f64;
            let system_delta = system.saturating_sub(pre_system) as f64;
            if system_delta > 0.0 {
                (cpu_delta / system_delta) * online as f64 * 100.0
            } else {
                0.0
            }
        };

        let memory_bytes = stats
            .memory_stats
            .as_ref()
            .and_then(|m| m.usage)
            .unwrap_or(0);
        let memory_limit = stats
            .memory_stats
            .as_ref()
            .and_then(|m| m.limit)
            .unwrap_or(0);
        let memory_percent = if memory_limit > 0 {
            memory_bytes as f64 / memory_limit as f64 * 100.0
        } else {
            0.0
        };

        let (rx, tx) = stats
            .networks
            .as_ref()
            .map(|nets| {
                nets.values().fold((0u64, 0u64), |(rx, tx), n| {
                    (
                        rx + n.rx_bytes.unwrap_or(0),
                        tx + n.tx_bytes.unwrap_or(0),
                    )
                })
            })
            .unwrap_or((0, 0));

        Some(ContainerStats {
            hostname,
            container_id: id.to_string(),
            cpu_percent,
            memory_bytes,
            memory_percent,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerDriver {
    async fn create(
        &self,
        hostname: &str,
        bot_id: &str,
        spec: &CreateSpec,
    ) -> DriverResult<String> {
        let name = container_name(hostname);

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(BOT_ID_LABEL.to_string(), bot_id.to_string());

        let container_port_key = format!("{}/tcp", spec.container_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port_key.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port_key,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            binds: Some(vec![
                format!("{}:/app/botdata", spec.workspace_src),
                format!("{}:/run/secrets:ro", spec.secrets_src),
                format!("{}:/app/workspace", spec.sandbox_src),
            ]),
            port_bindings: Some(port_bindings),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let opts = CreateContainerOptionsBuilder::default().name(&name).build();
        let created = self
            .docker
            .create_container(Some(opts), body)
            .await
            .map_err(|e| match server_status(&e) {
                Some(409) => DriverError::AlreadyExists,
                _ if is_transport(&e) => DriverError::NetworkError(e.to_string()),
                _ => DriverError::CreateFailed(e.to_string()),
            })?;

        tracing::info!(container = %name, id = %created.id, "container created");
        Ok(created.id)
    }

    async fn start(&self, hostname: &str) -> DriverResult<()> {
        let name = container_name(hostname);
        match self
            .docker
            .start_container(&name, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            // 304: already running. Idempotent success.
            Err(e) if server_status(&e) == Some(304) => Ok(()),
            Err(e) if server_status(&e) == Some(404) => Err(DriverError::NotFound),
            Err(e) if is_transport(&e) => Err(DriverError::NetworkError(e.to_string())),
            Err(e) => Err(DriverError::StartFailed(e.to_string())),
        }
    }

    async fn stop(&self, hostname: &str, grace_seconds: u32) -> DriverResult<()> {
        let name = container_name(hostname);
        let opts = StopContainerOptionsBuilder::default()
            .t(grace_seconds as i32)
            .build();
        match self.docker.stop_container(&name, Some(opts)).await {
            Ok(()) => Ok(()),
            // 304: already stopped. Idempotent success.
            Err(e) if server_status(&e) == Some(304) => Ok(()),
            Err(e) if server_status(&e) == Some(404) => Err(DriverError::NotFound),
            Err(e) if is_transport(&e) => Err(DriverError::NetworkError(e.to_string())),
            Err(e) => Err(DriverError::StopFailed(e.to_string())),
        }
    }

    async fn remove(&self, hostname: &str) -> DriverResult<()> {
        let name = container_name(hostname);

        // Best-effort stop first; missing or already-stopped is fine.
        match self.stop(hostname, 10).await {
            Ok(()) | Err(DriverError::NotFound) => {}
            Err(DriverError::StopFailed(e)) => {
                tracing::warn!(container = %name, error = %e, "stop before remove failed");
            }
            Err(e) => return Err(e),
        }

        let opts = RemoveContainerOptionsBuilder::default().force(true).build();
        match self.docker.remove_container(&name, Some(opts)).await {
            Ok(()) => {
                tracing::info!(container = %name, "container removed");
                Ok(())
            }
            // Concurrent deletion or never existed: the goal state holds.
            Err(e) if server_status(&e) == Some(404) => Err(DriverError::NotFound),
            Err(e) if is_transport(&e) => Err(DriverError::NetworkError(e.to_string())),
            Err(e) => Err(DriverError::StopFailed(e.to_string())),
        }
    }

    async fn status(&self, hostname: &str) -> DriverResult<Option<ContainerState>> {
        let name = container_name(hostname);
        let inspect = match self
            .docker
            .inspect_container(&name, None::<InspectContainerOptions>)
            .await
        {
            Ok(i) => i,
            Err(e) if server_status(&e) == Some(404) => return Ok(None),
            Err(e) if is_transport(&e) => {
                return Err(DriverError::NetworkError(e.to_string()))
            }
            Err(e) => return Err(DriverError::NetworkError(e.to_string())),
        };

        let state = inspect.state.unwrap_or_default();
        let health_status = state
            .health
            .as_ref()
            .and_then(|h| h.status.as_ref())
            .map(|s| s.to_string().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "none".to_string());

        Ok(Some(ContainerState {
            state: state
                .status
                .map(|s| s.to_string().to_ascii_lowercase())
                .unwrap_or_else(|| "unknown".to_string()),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            started_at: state.started_at,
            finished_at: state.finished_at,
            health_status,
        }))
    }

    async fn list_managed(&self) -> DriverResult<Vec<ManagedContainer>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{MANAGED_LABEL}=true")]);

        let opts = ListContainersOptionsBuilder::default()
            .all(true)
            .filters(&filters)
            .build();

        let summaries = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| DriverError::NetworkError(e.to_string()))?;

        Ok(summaries
            .into_iter()
            .filter_map(|s| {
                let container_id = s.id.clone()?;
                let name = s
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                let bot_id = s
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(BOT_ID_LABEL))
                    .cloned();
                let running = s
                    .state
                    .map(|st| st.to_string().eq_ignore_ascii_case("running"))
                    .unwrap_or(false);
                Some(ManagedContainer {
                    container_id,
                    name,
                    bot_id,
                    running,
                })
            })
            .collect())
    }

    async fn stats(&self) -> DriverResult<Vec<ContainerStats>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{MANAGED_LABEL}=true")]);
        filters.insert("status".to_string(), vec!["running".to_string()]);

        let opts = ListContainersOptionsBuilder::default().filters(&filters).build();
        let summaries = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(|e| DriverError::NetworkError(e.to_string()))?;

        // Sample concurrently; a slow or vanishing container only costs
        // its own timeout, never the whole sweep.
        let samples =
            futures_util::future::join_all(summaries.iter().map(|s| self.sample_stats(s)))
                .await;
        Ok(samples.into_iter().flatten().collect())
    }

    async fn volume_mountpoint(&self, volume: &str) -> DriverResult<String> {
        let v = self
            .docker
            .inspect_volume(volume)
            .await
            .map_err(|e| match server_status(&e) {
                Some(404) => DriverError::NotFound,
                _ => DriverError::NetworkError(e.to_string()),
            })?;
        Ok(v.mountpoint)
    }
}

/// HTTP status of a daemon response error, if that's what this is.
fn server_status(e: &bollard::errors::Error) -> Option<u16> {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code, .. } => {
            Some(*status_code)
        }
        _ => None,
    }
}

/// Whether the error is a transport-level failure (daemon unreachable,
/// timeout) rather than a daemon response.
fn is_transport(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::IOError { .. } | bollard::errors::Error::RequestTimeoutError
    )
}
