use std::sync::Arc;

use bm_docker::ContainerRuntime;
use bm_domain::config::GatewayConfig;
use bm_keyring_client::KeyringClient;
use bm_secrets::SecretsVault;
use bm_store::BotStore;
use bm_workspace::WorkspaceTemplater;

use crate::sessions::SessionStore;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,

    // ── Stores & drivers ──────────────────────────────────────────────
    pub store: Arc<BotStore>,
    pub vault: Arc<SecretsVault>,
    pub templater: Arc<WorkspaceTemplater>,
    pub runtime: Arc<dyn ContainerRuntime>,
    /// `None` when no keyring is configured.
    pub keyring: Option<Arc<KeyringClient>>,

    // ── Sessions & security (startup-computed) ────────────────────────
    pub sessions: Arc<SessionStore>,
    /// SHA-256 of the admin password, for constant-time login comparison.
    pub password_hash: Arc<Vec<u8>>,

    // ── Saga serialization ────────────────────────────────────────────
    /// Writer lock held across a lifecycle saga's transactional steps.
    pub lifecycle_lock: Arc<tokio::sync::Mutex<()>>,

    // ── Outbound HTTP (model discovery) ───────────────────────────────
    pub http: reqwest::Client,
}
