//! Reconciler integration tests: status sync, orphan enumeration, cleanup.

mod common;

use std::sync::Arc;

use bm_domain::bot::BotStatus;
use bm_gateway::{lifecycle, reconcile};

use common::{create_request, fixture, MockRuntime};

#[tokio::test]
async fn clean_state_reports_nothing() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime);
    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();

    let report = reconcile::report(&state).await.unwrap();
    assert_eq!(report.adjustments, 0);
    assert_eq!(report.total_orphans(), 0);
}

#[tokio::test]
async fn vanished_container_marks_bot_stopped() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());
    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();

    // Container disappears behind the control plane's back.
    runtime.containers.lock().clear();

    let report = reconcile::report(&state).await.unwrap();
    assert_eq!(report.adjustments, 1);

    let bot = state.store.get_by_hostname("my-bot").unwrap();
    assert_eq!(bot.status, BotStatus::Stopped);
    assert_eq!(bot.container_id, None);

    // Convergence: the second pass has nothing left to adjust.
    let second = reconcile::report(&state).await.unwrap();
    assert_eq!(second.adjustments, 0);
}

#[tokio::test]
async fn externally_started_container_marks_bot_running() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());
    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();
    lifecycle::stop_bot(&state, "my-bot").await.unwrap();

    // Someone starts the container manually.
    runtime.containers.lock().get_mut("my-bot").unwrap().running = true;

    let report = reconcile::report(&state).await.unwrap();
    assert_eq!(report.adjustments, 1);
    assert_eq!(
        state.store.get_by_hostname("my-bot").unwrap().status,
        BotStatus::Running
    );
}

#[tokio::test]
async fn nonzero_exit_marks_bot_error() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());
    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();

    {
        let mut containers = runtime.containers.lock();
        let c = containers.get_mut("my-bot").unwrap();
        c.running = false;
        c.exit_code = 137;
    }

    reconcile::report(&state).await.unwrap();
    assert_eq!(
        state.store.get_by_hostname("my-bot").unwrap().status,
        BotStatus::Error
    );
}

#[tokio::test]
async fn zero_exit_marks_bot_stopped() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());
    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();

    {
        let mut containers = runtime.containers.lock();
        let c = containers.get_mut("my-bot").unwrap();
        c.running = false;
        c.exit_code = 0;
    }

    reconcile::report(&state).await.unwrap();
    assert_eq!(
        state.store.get_by_hostname("my-bot").unwrap().status,
        BotStatus::Stopped
    );
}

#[tokio::test]
async fn orphans_are_enumerated_and_cleaned() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime.clone());
    lifecycle::create_bot(&state, create_request("my-bot")).await.unwrap();

    // A managed container whose bot-id matches no row, plus stray
    // workspace and secrets directories.
    runtime.plant(
        "stray-bot",
        "00000000-0000-0000-0000-000000000000",
        false,
        0,
    );
    std::fs::create_dir_all(state.templater.root().join("stray-ws")).unwrap();
    state.vault.create_dir("stray-secrets").unwrap();

    let report = reconcile::report(&state).await.unwrap();
    assert_eq!(report.orphaned_containers.len(), 1);
    assert_eq!(report.orphaned_workspaces, vec!["stray-ws".to_string()]);
    assert_eq!(report.orphaned_secrets, vec!["stray-secrets".to_string()]);
    assert_eq!(report.total_orphans(), 3);

    let cleaned = reconcile::cleanup(&state).await.unwrap();
    assert_eq!(cleaned.containers_removed, 1);
    assert_eq!(cleaned.workspaces_removed, 1);
    assert_eq!(cleaned.secrets_removed, 1);

    // Cleanup completeness: nothing left to report.
    let after = reconcile::report(&state).await.unwrap();
    assert_eq!(after.total_orphans(), 0);

    // The declared bot survived the sweep untouched.
    assert!(state.store.get_by_hostname("my-bot").is_ok());
    assert!(runtime.containers.lock().contains_key("my-bot"));
}

#[tokio::test]
async fn cleanup_is_safely_repeatable() {
    let runtime = Arc::new(MockRuntime::default());
    let (_tmp, state) = fixture(runtime);

    let first = reconcile::cleanup(&state).await.unwrap();
    let second = reconcile::cleanup(&state).await.unwrap();
    assert_eq!(first.containers_removed, 0);
    assert_eq!(second.containers_removed, 0);
}
