use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue};
use axum::routing::get;
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing_subscriber::EnvFilter;

use bm_docker::DockerDriver;
use bm_domain::config::{ConfigSeverity, GatewayConfig};
use bm_gateway::api;
use bm_gateway::reconcile;
use bm_gateway::sessions::SessionStore;
use bm_gateway::state::AppState;
use bm_keyring_client::KeyringClient;
use bm_secrets::SecretsVault;
use bm_store::BotStore;
use bm_workspace::WorkspaceTemplater;

#[derive(Parser)]
#[command(name = "botmaker", about = "BotMaker control plane", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the control plane (default).
    Serve,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server().await
        }
        Some(Command::Version) => {
            println!("botmaker {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bm_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server() -> anyhow::Result<()> {
    tracing::info!("BotMaker starting");

    let config = Arc::new(GatewayConfig::from_env().context("loading configuration")?);

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Metadata store ───────────────────────────────────────────────
    let store = Arc::new(
        BotStore::open(&config.data_dir.join("botmaker.db"))
            .context("opening metadata store")?,
    );
    tracing::info!(path = %config.data_dir.join("botmaker.db").display(), "metadata store ready");

    // ── Secrets vault ────────────────────────────────────────────────
    let vault = Arc::new(
        SecretsVault::new(config.secrets_dir.clone()).context("initializing secrets vault")?,
    );
    tracing::info!(root = %config.secrets_dir.display(), "secrets vault ready");

    // ── Workspace templater ──────────────────────────────────────────
    let templater = Arc::new(
        WorkspaceTemplater::new(config.data_dir.join("bots"))
            .context("initializing workspace templater")?,
    );
    tracing::info!(root = %templater.root().display(), "workspace templater ready");

    // ── Container driver ─────────────────────────────────────────────
    let driver = DockerDriver::connect().context("connecting to container runtime")?;
    match driver.ping().await {
        Ok(()) => tracing::info!("container runtime reachable"),
        Err(e) => tracing::warn!(error = %e, "container runtime not responding — lifecycle operations will fail until it is"),
    }
    let runtime: Arc<dyn bm_docker::ContainerRuntime> = Arc::new(driver);

    // ── Keyring client ───────────────────────────────────────────────
    let keyring = match (&config.proxy_admin_url, &config.proxy_admin_token) {
        (Some(url), Some(token)) => {
            let client = KeyringClient::new(url, token).context("building keyring client")?;
            match client.health().await {
                Ok(_) => tracing::info!(url = %url, "keyring reachable"),
                Err(e) => tracing::warn!(url = %url, error = %e, "keyring not responding"),
            }
            Some(Arc::new(client))
        }
        _ => {
            tracing::info!("keyring not configured — workers will call vendors directly");
            None
        }
    };

    // ── Sessions + admin password (read once, hashed) ────────────────
    let sessions = Arc::new(SessionStore::new(Duration::from_millis(
        config.session_expiry_ms,
    )));
    let admin_password = config
        .admin_password
        .as_deref()
        .context("ADMIN_PASSWORD is required")?;
    let password_hash = Arc::new(Sha256::digest(admin_password.as_bytes()).to_vec());

    let state = AppState {
        config: config.clone(),
        store,
        vault,
        templater,
        runtime,
        keyring,
        sessions,
        password_hash,
        lifecycle_lock: Arc::new(tokio::sync::Mutex::new(())),
        http: reqwest::Client::new(),
    };

    // ── Startup reconciliation ───────────────────────────────────────
    match reconcile::report(&state).await {
        Ok(report) => tracing::info!(
            adjustments = report.adjustments,
            orphans = report.total_orphans(),
            "startup reconciliation complete"
        ),
        Err(e) => tracing::warn!(error = %e, "startup reconciliation failed"),
    }

    // ── Rate limit (100 requests/minute per IP; /health exempt) ──────
    let governor_config = tower_governor::governor::GovernorConfigBuilder::default()
        .per_millisecond(600)
        .burst_size(100)
        .finish()
        .expect("rate limit period and burst must be > 0");
    let governor_layer = tower_governor::GovernorLayer {
        config: Arc::new(governor_config),
    };

    // ── Router ───────────────────────────────────────────────────────
    let api = api::router(state.clone()).layer(governor_layer);
    let app = axum::Router::new()
        .route("/health", get(api::health))
        .merge(api)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'self'"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "BotMaker listening");

    // Connect info feeds the per-IP key extractor of the rate limiter.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("axum server error")?;

    tracing::info!("BotMaker stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received, draining");
    }
}
