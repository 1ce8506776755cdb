//! Bot lifecycle coordinator.
//!
//! Each operation is a saga across the metadata store, secrets vault,
//! workspace templater, container runtime, and (when configured) the
//! keyring. Create compensates in reverse on any failure and reports the
//! *original* error; delete is idempotent and never lets one failing step
//! abort the rest.

use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;

use bm_docker::{CreateSpec, DriverError};
use bm_domain::bot::{Bot, BotStatus};
use bm_domain::error::{Error, Result};
use bm_domain::{validate, vendor};
use bm_workspace::{Features, ProxyWiring, RenderSpec};

use crate::state::AppState;

/// Grace window handed to the runtime when stopping a worker.
const STOP_GRACE_SECONDS: u32 = 10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderChoice {
    pub provider_id: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelChoice {
    pub channel_type: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    pub soul_markdown: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBotRequest {
    pub name: String,
    pub hostname: String,
    pub emoji: Option<String>,
    pub providers: Vec<ProviderChoice>,
    pub primary_provider: Option<String>,
    pub channels: Vec<ChannelChoice>,
    pub persona: Persona,
    #[serde(default)]
    pub features: Features,
    pub tags: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Create
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Create a bot end-to-end: allocate a port, register with the keyring,
/// write secrets, render the workspace, create and start the container.
pub async fn create_bot(state: &AppState, req: CreateBotRequest) -> Result<Bot> {
    let (primary, tags) = validate_request(&req)?;

    // Duplicate hostnames answer 409 before any resource is touched.
    if state.store.get_by_hostname(&req.hostname).is_ok() {
        return Err(Error::Conflict(format!(
            "hostname {:?} already in use",
            req.hostname
        )));
    }

    // Single-writer discipline: one saga mutates at a time.
    let _guard = state.lifecycle_lock.lock().await;

    let port = state.store.next_port(state.config.bot_port_start)?;
    let now = Utc::now();
    let bot = Bot {
        id: uuid::Uuid::new_v4().to_string(),
        hostname: req.hostname.clone(),
        name: req.name.clone(),
        ai_provider: primary.provider_id.clone(),
        model: primary.model.clone(),
        channel_type: req.channels[0].channel_type.clone(),
        container_id: None,
        port: Some(port),
        gateway_token: mint_token(),
        tags,
        status: BotStatus::Created,
        image_version: state.config.worker_image.clone(),
        created_at: now,
        updated_at: now,
    };
    state.store.insert(&bot)?;

    match run_create_steps(state, &bot, &req, &primary).await {
        Ok(created) => {
            tracing::info!(
                hostname = %created.hostname,
                port,
                "bot created and running"
            );
            Ok(created)
        }
        Err(e) => {
            tracing::warn!(hostname = %bot.hostname, error = %e, "create failed, compensating");
            compensate_create(state, &bot).await;
            Err(e)
        }
    }
}

/// The provisioning steps of the create saga, run after the row insert.
/// A failure anywhere surfaces unchanged; the caller runs compensation.
async fn run_create_steps(
    state: &AppState,
    bot: &Bot,
    req: &CreateBotRequest,
    primary: &ProviderChoice,
) -> Result<Bot> {
    // Keyring registration — the bearer exists only inside this saga.
    let proxy = match (&state.keyring, &state.config.proxy_data_url) {
        (Some(client), Some(data_url)) => {
            let registration = client
                .register_bot(&bot.id, &bot.hostname, bot.tags.as_deref())
                .await?;
            Some(ProxyWiring {
                base_url: data_url.clone(),
                bearer: registration.token,
            })
        }
        _ => None,
    };

    // Channel tokens into the vault.
    for channel in &req.channels {
        let name = validate::channel_token_name(&channel.channel_type);
        state.vault.write(&bot.hostname, &name, &channel.token)?;
    }

    // Workspace render.
    let port = bot.port.unwrap_or(state.config.bot_port_start);
    state.templater.render(&RenderSpec {
        hostname: bot.hostname.clone(),
        bot_id: bot.id.clone(),
        name: bot.name.clone(),
        provider: primary.provider_id.clone(),
        model: primary.model.clone(),
        channel_type: bot.channel_type.clone(),
        port,
        gateway_token: bot.gateway_token.clone(),
        persona_name: req.persona.name.clone(),
        emoji: req.emoji.clone(),
        soul_markdown: req.persona.soul_markdown.clone(),
        features: req.features.clone(),
        proxy,
    })?;

    // Container create, with host-perspective mount paths.
    let (workspace_src, secrets_src, sandbox_src) =
        resolve_mount_sources(state, &bot.hostname).await?;
    let spec = CreateSpec {
        image: state.config.worker_image.clone(),
        env: vec![
            format!("BOT_ID={}", bot.id),
            format!("BOT_NAME={}", bot.name),
            format!("AI_PROVIDER={}", bot.ai_provider),
            format!("AI_MODEL={}", bot.model),
            format!("PORT={port}"),
        ],
        host_port: port,
        container_port: port,
        workspace_src,
        secrets_src,
        sandbox_src,
        network: state.config.bot_network.clone(),
    };
    let container_id = state.runtime.create(&bot.hostname, &bot.id, &spec).await?;

    // Persist the container handle and image before starting.
    state.store.update_container(
        &bot.id,
        Some(&container_id),
        &state.config.worker_image,
        BotStatus::Created,
    )?;

    // Start, then mark running.
    state.runtime.start(&bot.hostname).await?;
    state.store.update_status(&bot.id, BotStatus::Running)?;

    state.store.get(&bot.id)
}

/// Reverse compensation for a failed create: every step is tolerant, the
/// row deletion at the end releases the port.
async fn compensate_create(state: &AppState, bot: &Bot) {
    match state.runtime.remove(&bot.hostname).await {
        Ok(()) | Err(DriverError::NotFound) => {}
        Err(e) => tracing::warn!(hostname = %bot.hostname, error = %e, "compensation: container remove failed"),
    }

    if let Some(client) = &state.keyring {
        if let Err(e) = client.revoke_bot(&bot.id).await {
            tracing::warn!(hostname = %bot.hostname, error = %e, "compensation: keyring revoke failed");
        }
    }

    if let Err(e) = state.templater.delete(&bot.hostname) {
        tracing::warn!(hostname = %bot.hostname, error = %e, "compensation: workspace delete failed");
    }
    if let Err(e) = state.vault.delete_all(&bot.hostname) {
        tracing::warn!(hostname = %bot.hostname, error = %e, "compensation: secrets delete failed");
    }
    if let Err(e) = state.store.delete(&bot.id) {
        tracing::warn!(hostname = %bot.hostname, error = %e, "compensation: row delete failed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Delete
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Delete a bot. Idempotent: a missing row still sweeps the hostname's
/// container, workspace, and secrets, and still succeeds.
pub async fn delete_bot(state: &AppState, hostname: &str) -> Result<()> {
    validate::hostname(hostname)?;
    let _guard = state.lifecycle_lock.lock().await;

    let bot = state.store.get_by_hostname(hostname).ok();

    match state.runtime.remove(hostname).await {
        Ok(()) | Err(DriverError::NotFound) => {}
        Err(e) => tracing::warn!(hostname, error = %e, "delete: container remove failed"),
    }

    if let (Some(bot), Some(client)) = (&bot, &state.keyring) {
        if let Err(e) = client.revoke_bot(&bot.id).await {
            tracing::warn!(hostname, error = %e, "delete: keyring revoke failed");
        }
    }

    if let Err(e) = state.templater.delete(hostname) {
        tracing::warn!(hostname, error = %e, "delete: workspace delete failed");
    }
    if let Err(e) = state.vault.delete_all(hostname) {
        tracing::warn!(hostname, error = %e, "delete: secrets delete failed");
    }

    if let Some(bot) = &bot {
        state.store.delete(&bot.id)?;
    }
    tracing::info!(hostname, "bot deleted");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Start / Stop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start_bot(state: &AppState, hostname: &str) -> Result<Bot> {
    let bot = state.store.get_by_hostname(hostname)?;
    state.runtime.start(hostname).await?;
    state.store.update_status(&bot.id, BotStatus::Running)?;
    state.store.get(&bot.id)
}

pub async fn stop_bot(state: &AppState, hostname: &str) -> Result<Bot> {
    let bot = state.store.get_by_hostname(hostname)?;
    match state.runtime.stop(hostname, STOP_GRACE_SECONDS).await {
        // No container left still means the desired terminal is reached.
        Ok(()) | Err(DriverError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }
    state.store.update_status(&bot.id, BotStatus::Stopped)?;
    state.store.get(&bot.id)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate the request and pick the primary provider. Returns the primary
/// choice and the normalized tag list.
fn validate_request(req: &CreateBotRequest) -> Result<(ProviderChoice, Option<Vec<String>>)> {
    validate::display_name(&req.name)?;
    validate::hostname(&req.hostname)?;
    validate::display_name(&req.persona.name)?;

    if req.providers.is_empty() {
        return Err(Error::Validation("at least one provider is required".into()));
    }
    if req.channels.is_empty() {
        return Err(Error::Validation("at least one channel is required".into()));
    }

    for p in &req.providers {
        if !vendor::is_known_provider(&p.provider_id) {
            return Err(Error::Validation(format!(
                "unknown provider {:?}",
                p.provider_id
            )));
        }
        validate::model(&p.model)?;
    }
    for c in &req.channels {
        if !vendor::is_known_channel(&c.channel_type) {
            return Err(Error::Validation(format!(
                "unknown channel {:?}",
                c.channel_type
            )));
        }
        if c.token.is_empty() {
            return Err(Error::Validation(format!(
                "channel {} token must not be empty",
                c.channel_type
            )));
        }
    }

    let primary = match &req.primary_provider {
        Some(id) => req
            .providers
            .iter()
            .find(|p| &p.provider_id == id)
            .cloned()
            .ok_or_else(|| {
                Error::Validation(format!("primaryProvider {id:?} is not among providers"))
            })?,
        None => req.providers[0].clone(),
    };

    let tags = validate::normalize_tags(req.tags.clone())?;
    Ok((primary, tags))
}

/// Host-perspective mount sources for a bot's container.
///
/// With named volumes configured the sources come from the daemon's view of
/// the volume mountpoint; otherwise the configured directories are used,
/// made absolute so the bind mount is unambiguous.
async fn resolve_mount_sources(
    state: &AppState,
    hostname: &str,
) -> Result<(String, String, String)> {
    let data_root = match &state.config.data_volume_name {
        Some(volume) => state.runtime.volume_mountpoint(volume).await?,
        None => absolute_display(&state.config.data_dir)?,
    };
    let secrets_root = match &state.config.secrets_volume_name {
        Some(volume) => state.runtime.volume_mountpoint(volume).await?,
        None => absolute_display(&state.config.secrets_dir)?,
    };

    let workspace_src = format!("{data_root}/bots/{hostname}");
    let sandbox_src = format!("{workspace_src}/sandbox");
    let secrets_src = format!("{secrets_root}/{hostname}");
    Ok((workspace_src, secrets_src, sandbox_src))
}

fn absolute_display(path: &std::path::Path) -> Result<String> {
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(abs.display().to_string())
}

fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
