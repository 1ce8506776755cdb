//! Session authentication.
//!
//! `POST /api/login` compares the supplied password against the configured
//! admin password in constant time (over SHA-256 digests, so the comparison
//! length never depends on either input) and mints a 32-byte session
//! bearer. The middleware requires that bearer on every `/api/*` route
//! except login; expired sessions are evicted lazily on lookup.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginRequest {
    password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Response {
    let provided_hash = Sha256::digest(req.password.as_bytes());
    if !bool::from(provided_hash.ct_eq(state.password_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid password" })),
        )
            .into_response();
    }

    let token = state.sessions.mint();
    tracing::info!("operator logged in");
    Json(json!({ "token": token })).into_response()
}

pub async fn logout(State(state): State<AppState>, req: Request<Body>) -> Response {
    if let Some(token) = bearer_of(&req) {
        state.sessions.revoke(token);
    }
    Json(json!({ "success": true })).into_response()
}

/// Axum middleware enforcing a live session bearer on protected routes.
pub async fn require_session(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let valid = bearer_of(&req)
        .map(|token| state.sessions.is_valid(token))
        .unwrap_or(false);

    if !valid {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid or missing session token" })),
        )
            .into_response();
    }

    next.run(req).await
}

fn bearer_of(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
