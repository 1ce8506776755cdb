//! Bot CRUD and operation routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use bm_domain::bot::{Bot, BotStatus};

use crate::api::error::{ApiError, ApiResult};
use crate::lifecycle::{self, CreateBotRequest};
use crate::state::AppState;

/// A Bot row plus its observed container state, as the UI consumes it.
///
/// The `starting` status is an overlay: a row that says `running` while the
/// container health probe still reports `starting` is presented as
/// `starting` without being persisted.
async fn with_container_status(state: &AppState, bot: Bot) -> Value {
    let observed = state.runtime.status(&bot.hostname).await.ok().flatten();

    let mut value = serde_json::to_value(&bot).unwrap_or_else(|_| json!({}));

    let effective = match &observed {
        Some(c) if bot.status == BotStatus::Running && c.health_status == "starting" => {
            BotStatus::Starting
        }
        _ => bot.status,
    };
    value["status"] = json!(effective);
    value["container_status"] = match observed {
        Some(c) => serde_json::to_value(&c).unwrap_or(Value::Null),
        None => Value::Null,
    };
    value
}

pub async fn list_bots(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let bots = state.store.list()?;
    let mut out = Vec::with_capacity(bots.len());
    for bot in bots {
        out.push(with_container_status(&state, bot).await);
    }
    Ok(Json(json!({ "bots": out })))
}

pub async fn get_bot(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> ApiResult<Json<Value>> {
    let bot = state.store.get_by_hostname(&hostname)?;
    Ok(Json(with_container_status(&state, bot).await))
}

pub async fn create_bot(
    State(state): State<AppState>,
    Json(req): Json<CreateBotRequest>,
) -> Result<Response, ApiError> {
    let bot = lifecycle::create_bot(&state, req).await?;
    let body = with_container_status(&state, bot).await;
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn delete_bot(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> ApiResult<Json<Value>> {
    lifecycle::delete_bot(&state, &hostname).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn start_bot(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> ApiResult<Json<Value>> {
    let bot = lifecycle::start_bot(&state, &hostname).await?;
    Ok(Json(json!({ "success": true, "status": bot.status })))
}

pub async fn stop_bot(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> ApiResult<Json<Value>> {
    let bot = lifecycle::stop_bot(&state, &hostname).await?;
    Ok(Json(json!({ "success": true, "status": bot.status })))
}
