//! Pass-through to the keyring admin surface.
//!
//! The operator UI manages provider keys through the control plane so it
//! only ever needs one origin; these handlers forward verbatim and relay
//! the keyring's status and body unchanged.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::Value;

use bm_domain::error::Error;
use bm_keyring_client::KeyringClient;

use crate::api::error::ApiError;
use crate::state::AppState;

fn client(state: &AppState) -> Result<&KeyringClient, ApiError> {
    state
        .keyring
        .as_deref()
        .ok_or_else(|| ApiError(Error::Validation("keyring is not configured".into())))
}

async fn relay(
    state: &AppState,
    method: reqwest::Method,
    path: &str,
    body: Option<Value>,
) -> Result<Response, ApiError> {
    let (status, value) = client(state)?.passthrough(method, path, body).await?;
    let status =
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok((status, Json(value)).into_response())
}

pub async fn list_keys(State(state): State<AppState>) -> Result<Response, ApiError> {
    relay(&state, reqwest::Method::GET, "/admin/keys", None).await
}

pub async fn add_key(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    relay(&state, reqwest::Method::POST, "/admin/keys", Some(body)).await
}

pub async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    relay(&state, reqwest::Method::DELETE, &format!("/admin/keys/{id}"), None).await
}

pub async fn health(State(state): State<AppState>) -> Result<Response, ApiError> {
    relay(&state, reqwest::Method::GET, "/admin/health", None).await
}
