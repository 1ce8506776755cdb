//! Lifecycle saga integration tests over the scripted mock runtime.

mod common;

use std::sync::Arc;

use bm_domain::bot::BotStatus;
use bm_domain::error::Error;
use bm_gateway::lifecycle;

use common::{create_request, fixture, MockRuntime};

#[tokio::test]
async fn create_happy_path_provisions_everything() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());

    let bot = lifecycle::create_bot(&state, create_request("my-bot"))
        .await
        .unwrap();

    assert_eq!(bot.status, BotStatus::Running);
    assert_eq!(bot.port, Some(19_000));
    assert_eq!(bot.container_id.as_deref(), Some("cid-my-bot"));
    assert!(!bot.gateway_token.is_empty());

    // Channel token landed in the vault.
    assert_eq!(state.vault.read("my-bot", "TELEGRAM_TOKEN").unwrap(), "123:abc");

    // Workspace manifest exists and addresses the vendor directly (no
    // keyring configured in this fixture).
    let manifest_path = state.templater.dir("my-bot").unwrap().join("openclaw.json");
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(manifest_path).unwrap()).unwrap();
    assert_eq!(manifest["model"], "openai/gpt-4.1");
    assert!(manifest["models"]["providers"].get("openai-proxy").is_none());

    // Container exists and is running.
    assert!(runtime.containers.lock().get("my-bot").unwrap().running);
}

#[cfg(unix)]
#[tokio::test]
async fn create_writes_secret_with_restrictive_mode() {
    use std::os::unix::fs::PermissionsExt;

    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime);
    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();

    let path = state.vault.dir("my-bot").unwrap().join("TELEGRAM_TOKEN");
    let mode = std::fs::metadata(path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn ports_are_allocated_sequentially_and_reused_after_delete() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime);

    let a = lifecycle::create_bot(&state, create_request("bot-a")).await.unwrap();
    let b = lifecycle::create_bot(&state, create_request("bot-b")).await.unwrap();
    assert_eq!(a.port, Some(19_000));
    assert_eq!(b.port, Some(19_001));

    lifecycle::delete_bot(&state, "bot-a").await.unwrap();
    let c = lifecycle::create_bot(&state, create_request("bot-c")).await.unwrap();
    assert_eq!(c.port, Some(19_000));
}

#[tokio::test]
async fn duplicate_hostname_is_conflict_with_no_side_effects() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());

    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();
    match lifecycle::create_bot(&state, create_request("my-bot")).await {
        Err(Error::Conflict(_)) => {}
        other => panic!("expected Conflict, got {other:?}"),
    }

    assert_eq!(state.store.list().unwrap().len(), 1);
    assert_eq!(runtime.containers.lock().len(), 1);
}

#[tokio::test]
async fn unknown_provider_is_rejected_before_any_resource() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());

    let mut req = create_request("my-bot");
    req.providers[0].provider_id = "nonexistent".into();
    match lifecycle::create_bot(&state, req).await {
        Err(Error::Validation(_)) => {}
        other => panic!("expected Validation, got {other:?}"),
    }
    assert!(state.store.list().unwrap().is_empty());
    assert!(runtime.containers.lock().is_empty());
}

#[tokio::test]
async fn failed_container_create_compensates_fully() {
    let runtime = Arc::new(MockRuntime {
        fail_create: true,
        ..MockRuntime::default()
    });
    let (_tmp, state) = fixture(runtime.clone());

    let err = lifecycle::create_bot(&state, create_request("my-bot")).await;
    assert!(err.is_err());

    // No row, no workspace, no secrets, no container.
    assert!(state.store.list().unwrap().is_empty());
    assert!(state.templater.list_dirs().unwrap().is_empty());
    assert!(state.vault.list_dirs().unwrap().is_empty());
    assert!(runtime.containers.lock().is_empty());
}

#[tokio::test]
async fn failed_start_compensates_and_releases_port() {
    let runtime = Arc::new(MockRuntime {
        fail_start: true,
        ..MockRuntime::default()
    });
    let (_tmp, state) = fixture(runtime.clone());

    assert!(lifecycle::create_bot(&state, create_request("my-bot")).await.is_err());
    assert!(state.store.list().unwrap().is_empty());
    assert!(runtime.containers.lock().is_empty());

    // The port is free again for the next create.
    assert_eq!(state.store.next_port(19_000).unwrap(), 19_000);
}

#[tokio::test]
async fn delete_is_idempotent() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());

    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();
    lifecycle::delete_bot(&state, "my-bot").await.unwrap();
    lifecycle::delete_bot(&state, "my-bot").await.unwrap();

    assert!(state.store.list().unwrap().is_empty());
    assert!(state.templater.list_dirs().unwrap().is_empty());
    assert!(state.vault.list_dirs().unwrap().is_empty());
    assert!(runtime.containers.lock().is_empty());
}

#[tokio::test]
async fn stop_twice_stays_stopped() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime);

    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();
    let first = lifecycle::stop_bot(&state, "my-bot").await.unwrap();
    assert_eq!(first.status, BotStatus::Stopped);
    let second = lifecycle::stop_bot(&state, "my-bot").await.unwrap();
    assert_eq!(second.status, BotStatus::Stopped);
}

#[tokio::test]
async fn start_after_stop_runs_again() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());

    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();
    lifecycle::stop_bot(&state, "my-bot").await.unwrap();
    let bot = lifecycle::start_bot(&state, "my-bot").await.unwrap();
    assert_eq!(bot.status, BotStatus::Running);
    assert!(runtime.containers.lock().get("my-bot").unwrap().running);
}

#[tokio::test]
async fn operations_on_unknown_hostname_are_not_found() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime);

    match lifecycle::start_bot(&state, "ghost").await {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
    match lifecycle::stop_bot(&state, "ghost").await {
        Err(Error::NotFound(_)) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}
