//! Admin routes: orphan report, cleanup, stats.

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::api::error::ApiResult;
use crate::reconcile;
use crate::state::AppState;

pub async fn orphans(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let report = reconcile::report(&state).await?;
    Ok(Json(json!({
        "orphanedContainers": report.orphaned_containers,
        "orphanedWorkspaces": report.orphaned_workspaces,
        "orphanedSecrets": report.orphaned_secrets,
        "total": report.total_orphans(),
    })))
}

pub async fn cleanup(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let result = reconcile::cleanup(&state).await?;
    Ok(Json(json!({
        "success": true,
        "containersRemoved": result.containers_removed,
        "workspacesRemoved": result.workspaces_removed,
        "secretsRemoved": result.secrets_removed,
    })))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = state.runtime.stats().await.map_err(bm_domain::error::Error::from)?;
    Ok(Json(json!({ "stats": stats })))
}
