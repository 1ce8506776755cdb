//! Shared test fixture: an `AppState` wired to tempdir-backed stores and a
//! scripted in-memory container runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use bm_docker::{container_name, ContainerRuntime, CreateSpec, DriverError, DriverResult};
use bm_domain::bot::{ContainerState, ContainerStats, ManagedContainer};
use bm_domain::config::GatewayConfig;
use bm_gateway::lifecycle::{ChannelChoice, CreateBotRequest, Persona, ProviderChoice};
use bm_gateway::sessions::SessionStore;
use bm_gateway::state::AppState;
use bm_secrets::SecretsVault;
use bm_store::BotStore;
use bm_workspace::WorkspaceTemplater;

#[derive(Clone)]
pub struct MockContainer {
    pub container_id: String,
    pub bot_id: String,
    pub running: bool,
    pub exit_code: i64,
}

/// Scripted [`ContainerRuntime`]: containers live in a map, and individual
/// operations can be told to fail.
#[derive(Default)]
pub struct MockRuntime {
    pub containers: Mutex<HashMap<String, MockContainer>>,
    pub fail_create: bool,
    pub fail_start: bool,
}

impl MockRuntime {
    /// Plant a managed container directly, as if something outside the
    /// control plane had created it.
    pub fn plant(&self, hostname: &str, bot_id: &str, running: bool, exit_code: i64) {
        self.containers.lock().insert(
            hostname.to_string(),
            MockContainer {
                container_id: format!("cid-{hostname}"),
                bot_id: bot_id.to_string(),
                running,
                exit_code,
            },
        );
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(
        &self,
        hostname: &str,
        bot_id: &str,
        _spec: &CreateSpec,
    ) -> DriverResult<String> {
        if self.fail_create {
            return Err(DriverError::CreateFailed("scripted failure".into()));
        }
        let mut containers = self.containers.lock();
        if containers.contains_key(hostname) {
            return Err(DriverError::AlreadyExists);
        }
        let id = format!("cid-{hostname}");
        containers.insert(
            hostname.to_string(),
            MockContainer {
                container_id: id.clone(),
                bot_id: bot_id.to_string(),
                running: false,
                exit_code: 0,
            },
        );
        Ok(id)
    }

    async fn start(&self, hostname: &str) -> DriverResult<()> {
        if self.fail_start {
            return Err(DriverError::StartFailed("scripted failure".into()));
        }
        match self.containers.lock().get_mut(hostname) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(DriverError::NotFound),
        }
    }

    async fn stop(&self, hostname: &str, _grace_seconds: u32) -> DriverResult<()> {
        match self.containers.lock().get_mut(hostname) {
            Some(c) => {
                c.running = false;
                Ok(())
            }
            None => Err(DriverError::NotFound),
        }
    }

    async fn remove(&self, hostname: &str) -> DriverResult<()> {
        match self.containers.lock().remove(hostname) {
            Some(_) => Ok(()),
            None => Err(DriverError::NotFound),
        }
    }

    async fn status(&self, hostname: &str) -> DriverResult<Option<ContainerState>> {
        Ok(self.containers.lock().get(hostname).map(|c| ContainerState {
            state: if c.running { "running" } else { "exited" }.to_string(),
            running: c.running,
            exit_code: Some(c.exit_code),
            started_at: None,
            finished_at: None,
            health_status: "none".to_string(),
        }))
    }

    async fn list_managed(&self) -> DriverResult<Vec<ManagedContainer>> {
        Ok(self
            .containers
            .lock()
            .iter()
            .map(|(hostname, c)| ManagedContainer {
                container_id: c.container_id.clone(),
                name: container_name(hostname),
                bot_id: Some(c.bot_id.clone()),
                running: c.running,
            })
            .collect())
    }

    async fn stats(&self) -> DriverResult<Vec<ContainerStats>> {
        Ok(Vec::new())
    }

    async fn volume_mountpoint(&self, _volume: &str) -> DriverResult<String> {
        Ok("/var/lib/docker/volumes/test/_data".to_string())
    }
}

/// Tempdir-backed `AppState` with a mock runtime. The tempdir must outlive
/// the state.
pub fn fixture(runtime: Arc<MockRuntime>) -> (tempfile::TempDir, AppState) {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    let secrets_dir = tmp.path().join("secrets");

    let config = GatewayConfig {
        host: "127.0.0.1".into(),
        port: 7100,
        data_dir: data_dir.clone(),
        secrets_dir: secrets_dir.clone(),
        data_volume_name: None,
        secrets_volume_name: None,
        worker_image: "openclaw:test".into(),
        bot_network: None,
        bot_port_start: 19_000,
        proxy_admin_url: None,
        proxy_admin_token: None,
        proxy_data_url: None,
        admin_password: Some("correct-horse-battery".into()),
        session_expiry_ms: 60_000,
    };

    let state = AppState {
        config: Arc::new(config),
        store: Arc::new(BotStore::open_in_memory().unwrap()),
        vault: Arc::new(SecretsVault::new(secrets_dir).unwrap()),
        templater: Arc::new(WorkspaceTemplater::new(data_dir.join("bots")).unwrap()),
        runtime,
        keyring: None,
        sessions: Arc::new(SessionStore::new(Duration::from_secs(60))),
        password_hash: Arc::new(vec![0u8; 32]),
        lifecycle_lock: Arc::new(tokio::sync::Mutex::new(())),
        http: reqwest::Client::new(),
    };
    (tmp, state)
}

/// A well-formed create request for `my-bot`.
pub fn create_request(hostname: &str) -> CreateBotRequest {
    CreateBotRequest {
        name: "My Bot".into(),
        hostname: hostname.into(),
        emoji: Some("🤖".into()),
        providers: vec![ProviderChoice {
            provider_id: "openai".into(),
            model: "gpt-4.1".into(),
        }],
        primary_provider: Some("openai".into()),
        channels: vec![ChannelChoice {
            channel_type: "telegram".into(),
            token: "123:abc".into(),
        }],
        persona: Persona {
            name: "My Bot".into(),
            soul_markdown: "hello".into(),
        },
        features: Default::default(),
        tags: None,
    }
}
