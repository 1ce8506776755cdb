//! Keyring admin surface — key and bot CRUD behind a static bearer.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use bm_domain::error::Error;
use bm_domain::{validate, vendor};

use crate::crypto;
use crate::state::KeyringState;

/// Build the admin router.
pub fn router(state: KeyringState) -> Router {
    Router::new()
        .route("/admin/keys", post(add_key).get(list_keys))
        .route("/admin/keys/:id", delete(delete_key))
        .route("/admin/bots", post(register_bot).get(list_bots))
        .route("/admin/bots/:id", delete(delete_bot))
        .route("/admin/health", get(health))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Axum extractor enforcing the static admin bearer.
///
/// A missing or unparseable header is 401; a syntactically valid but wrong
/// token is 403. Comparison is constant-time over the SHA-256 digests.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<KeyringState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &KeyringState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(provided) = provided else {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "missing admin token" })),
            ));
        };

        let provided_hash = Sha256::digest(provided.as_bytes());
        if !bool::from(provided_hash.ct_eq(state.admin_token_hash.as_slice())) {
            return Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "invalid admin token" })),
            ));
        }
        Ok(AdminGuard)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn error_response(e: Error) -> Response {
    let (status, message) = match &e {
        Error::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
        Error::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
        Error::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
        // Crypto details stay in the log.
        Error::Crypto(_) => {
            tracing::warn!(error = %e, "crypto failure in admin surface");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
        }
        _ => {
            tracing::error!(error = %e, "admin surface failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
        }
    };
    (status, Json(json!({ "error": message }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
struct AddKeyRequest {
    vendor: String,
    secret: String,
    label: Option<String>,
    tag: Option<String>,
}

async fn add_key(
    _guard: AdminGuard,
    State(state): State<KeyringState>,
    Json(req): Json<AddKeyRequest>,
) -> Response {
    if !vendor::is_known_provider(&req.vendor) {
        return error_response(Error::Validation(format!(
            "unknown vendor {:?}",
            req.vendor
        )));
    }
    if req.secret.is_empty() {
        return error_response(Error::Validation("secret must not be empty".into()));
    }
    if let Some(tag) = &req.tag {
        if let Err(e) = validate::tag(tag) {
            return error_response(e);
        }
    }

    let sealed = match state.secrets.encrypt(&req.secret) {
        Ok(s) => s,
        Err(e) => return error_response(e),
    };
    match state
        .store
        .add_key(&req.vendor, sealed, req.label.as_deref(), req.tag.as_deref())
    {
        Ok(id) => {
            tracing::info!(vendor = %req.vendor, key_id = %id, "provider key added");
            (StatusCode::CREATED, Json(json!({ "id": id }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn list_keys(_guard: AdminGuard, State(state): State<KeyringState>) -> Response {
    match state.store.list_keys() {
        Ok(keys) => Json(json!({ "keys": keys })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_key(
    _guard: AdminGuard,
    State(state): State<KeyringState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_key(&id) {
        Ok(true) => Json(json!({ "ok": true })).into_response(),
        Ok(false) => error_response(Error::NotFound(format!("key {id}"))),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBotRequest {
    bot_id: String,
    hostname: String,
    tags: Option<Vec<String>>,
}

async fn register_bot(
    _guard: AdminGuard,
    State(state): State<KeyringState>,
    Json(req): Json<RegisterBotRequest>,
) -> Response {
    if req.bot_id.is_empty() {
        return error_response(Error::Validation("botId must not be empty".into()));
    }
    if let Err(e) = validate::hostname(&req.hostname) {
        return error_response(e);
    }
    let tags = match validate::normalize_tags(req.tags) {
        Ok(t) => t,
        Err(e) => return error_response(e),
    };

    // The bearer exists in plaintext only in this response.
    let token = crypto::mint_token();
    let token_hash = crypto::hash_token(&token);

    match state
        .store
        .register_bot(&req.bot_id, &req.hostname, &token_hash, tags.as_deref())
    {
        Ok(()) => {
            tracing::info!(bot_id = %req.bot_id, hostname = %req.hostname, "bot registered");
            (StatusCode::CREATED, Json(json!({ "token": token }))).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn list_bots(_guard: AdminGuard, State(state): State<KeyringState>) -> Response {
    match state.store.list_bots() {
        Ok(bots) => Json(json!({ "bots": bots })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_bot(
    _guard: AdminGuard,
    State(state): State<KeyringState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_bot(&id) {
        Ok(true) => {
            tracing::info!(bot_id = %id, "bot revoked");
            Json(json!({ "ok": true })).into_response()
        }
        Ok(false) => error_response(Error::NotFound(format!("bot {id}"))),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn health(_guard: AdminGuard, State(state): State<KeyringState>) -> Response {
    let key_count = state.store.count_keys().unwrap_or(0);
    let bot_count = state.store.count_bots().unwrap_or(0);
    Json(json!({
        "status": "ok",
        "keyCount": key_count,
        "botCount": bot_count,
    }))
    .into_response()
}
