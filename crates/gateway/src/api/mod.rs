pub mod admin;
pub mod auth;
pub mod bots;
pub mod discover;
pub mod error;
pub mod proxy;

use axum::middleware;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;

use crate::state::AppState;

/// Build the `/api` router.
///
/// Routes are split into **public** (`/api/login`) and **protected**
/// (everything else, gated by the session middleware). `/health` is not
/// here: it stays outside so the rate limiter never throttles probes.
/// `state` is needed to wire up the middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/api/login", post(auth::login));

    let protected = Router::new()
        .route("/api/logout", post(auth::logout))
        // Bots
        .route("/api/bots", get(bots::list_bots).post(bots::create_bot))
        .route("/api/bots/:hostname", get(bots::get_bot))
        .route("/api/bots/:hostname", delete(bots::delete_bot))
        .route("/api/bots/:hostname/start", post(bots::start_bot))
        .route("/api/bots/:hostname/stop", post(bots::stop_bot))
        // Stats
        .route("/api/stats", get(admin::stats))
        // Reconciler
        .route("/api/admin/orphans", get(admin::orphans))
        .route("/api/admin/cleanup", post(admin::cleanup))
        // Keyring pass-through
        .route("/api/proxy/keys", get(proxy::list_keys).post(proxy::add_key))
        .route("/api/proxy/keys/:id", delete(proxy::delete_key))
        .route("/api/proxy/health", get(proxy::health))
        // Model discovery
        .route("/api/models/discover", post(discover::discover))
        // Session auth on every protected route.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_session,
        ));

    public.merge(protected)
}

/// `GET /health` — unauthenticated, rate-limit exempt.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
