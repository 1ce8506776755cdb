use async_trait::async_trait;

use bm_domain::bot::{ContainerState, ContainerStats, ManagedContainer};

use crate::DriverResult;

/// Everything the lifecycle coordinator needs from a container create call.
///
/// Mount sources are host-perspective paths: when the control plane itself
/// runs inside a container, the caller resolves them through
/// [`ContainerRuntime::volume_mountpoint`] first.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub image: String,
    /// `KEY=value` pairs handed to the worker.
    pub env: Vec<String>,
    /// Published host port.
    pub host_port: u16,
    /// Port the worker listens on inside the container.
    pub container_port: u16,
    /// Host path mounted read-write at `/app/botdata`.
    pub workspace_src: String,
    /// Host path mounted read-only at `/run/secrets`.
    pub secrets_src: String,
    /// Host path mounted read-write at `/app/workspace`.
    pub sandbox_src: String,
    /// Optional named network to attach.
    pub network: Option<String>,
}

/// The container runtime seam.
///
/// The bollard-backed [`crate::DockerDriver`] is the production
/// implementation; tests script a mock against the same trait.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container named `botmaker-<hostname>`, labelled as managed
    /// and carrying the bot id. Returns the container id.
    async fn create(&self, hostname: &str, bot_id: &str, spec: &CreateSpec)
        -> DriverResult<String>;

    /// Start the container. Already-running is success.
    async fn start(&self, hostname: &str) -> DriverResult<()>;

    /// Stop the container: graceful termination first, force-kill after the
    /// grace window. Already-stopped is success.
    async fn stop(&self, hostname: &str, grace_seconds: u32) -> DriverResult<()>;

    /// Stop (tolerating already-stopped and missing) then remove. Tolerant
    /// of concurrent deletion.
    async fn remove(&self, hostname: &str) -> DriverResult<()>;

    /// Observed state, or `None` if the container does not exist.
    async fn status(&self, hostname: &str) -> DriverResult<Option<ContainerState>>;

    /// All containers carrying the managed label, including stopped ones.
    async fn list_managed(&self) -> DriverResult<Vec<ManagedContainer>>;

    /// Point-in-time resource usage for running managed containers. Never
    /// blocks on a single container; disappearing containers are skipped.
    async fn stats(&self) -> DriverResult<Vec<ContainerStats>>;

    /// Resolve a named volume to its host-filesystem mountpoint.
    async fn volume_mountpoint(&self, volume: &str) -> DriverResult<String>;
}
