use clap::Parser;
use tracing_subscriber::EnvFilter;

use bm_domain::config::{ConfigSeverity, KeyringConfig};
use bm_keyring::state::KeyringState;
use bm_keyring::store::KeyStore;
use bm_keyring::{admin, proxy};

#[derive(Parser)]
#[command(name = "botmaker-keyring", about = "BotMaker credential keyring", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run both keyring listeners (default).
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
            println!("botmaker-keyring {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bm_keyring=debug")),
        )
        .json()
        .init();
}

async fn run_server() -> anyhow::Result<()> {
    tracing::info!("keyring starting");

    let config = KeyringConfig::from_env()?;

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

    // ── Store ────────────────────────────────────────────────────────
    let store = KeyStore::open(&config.db_path)?;
    tracing::info!(path = %config.db_path.display(), "key store ready");

    let state = KeyringState::new(&config, store)?;

    // ── Shutdown wiring (one signal, two listeners) ──────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // ── Admin listener ───────────────────────────────────────────────
    let admin_addr = format!("{}:{}", config.host, config.admin_port);
    let admin_listener = tokio::net::TcpListener::bind(&admin_addr).await?;
    tracing::info!(addr = %admin_addr, "admin surface listening");
    let admin_app = admin::router(state.clone());
    let mut admin_shutdown = shutdown_rx.clone();
    let admin_server = axum::serve(admin_listener, admin_app).with_graceful_shutdown(
        async move {
            let _ = admin_shutdown.wait_for(|stopped| *stopped).await;
        },
    );

    // ── Data-plane listener ──────────────────────────────────────────
    let data_addr = format!("{}:{}", config.host, config.data_port);
    let data_listener = tokio::net::TcpListener::bind(&data_addr).await?;
    tracing::info!(addr = %data_addr, "data plane listening");
    let data_app = proxy::router(state);
    let mut data_shutdown = shutdown_rx;
    let data_server = axum::serve(data_listener, data_app).with_graceful_shutdown(
        async move {
            let _ = data_shutdown.wait_for(|stopped| *stopped).await;
        },
    );

    tokio::try_join!(admin_server, data_server)?;
    tracing::info!("keyring stopped");
    Ok(())
}
