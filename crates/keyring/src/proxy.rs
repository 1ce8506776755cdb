//! Data-plane proxy — the credential-injecting reverse proxy workers call.
//!
//! Any method, any path of the form `/<vendor>/<rest...>`. The caller
//! authenticates with its per-bot bearer; the proxy selects a real
//! credential, rewrites the request, and streams the upstream response
//! back chunk-for-chunk. SSE responses pass through with no added
//! buffering. After the response body ends, one usage-log row is appended.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use serde_json::json;

use bm_domain::vendor;

use crate::crypto;
use crate::state::KeyringState;

/// Total per-request budget, covering connect through last body byte.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest request body the proxy will buffer for forwarding.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Request headers never forwarded upstream.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "content-length",
    "authorization",
];

/// Response headers the proxy owns rather than copies.
const RESPONSE_STRIP: &[&str] = &["connection", "transfer-encoding", "content-length"];

/// Build the data-plane router. Every path funnels into the one handler.
pub fn router(state: KeyringState) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(State(state): State<KeyringState>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();

    // 1. Authenticate by bearer hash.
    let bearer = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(bearer) = bearer else {
        return error(StatusCode::UNAUTHORIZED, "missing bearer token");
    };
    let bot = match state.store.bot_by_token_hash(&crypto::hash_token(bearer)) {
        Ok(Some(bot)) => bot,
        Ok(None) => return error(StatusCode::UNAUTHORIZED, "unknown bearer token"),
        Err(e) => {
            tracing::error!(error = %e, "bot lookup failed");
            return error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    // 2. First path segment names the vendor; the rest goes upstream.
    let path = parts.uri.path();
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let vendor_id = segments.next().unwrap_or("");
    let remainder = segments.next().unwrap_or("");
    let Some(vendor_cfg) = vendor::by_id(vendor_id) else {
        return error(StatusCode::NOT_FOUND, "unknown vendor");
    };

    // Read the body up-front: the rewrite may need to edit it, and
    // content-length must be correct after stripping hop-by-hop headers.
    let body_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => return error(StatusCode::BAD_REQUEST, "request body too large"),
    };

    // Local daemons that mishandle streaming get a non-streaming upstream
    // call; the client-facing SSE framing is synthesized below.
    let (body_bytes, reframe_as_sse) = if vendor_cfg.force_non_streaming {
        strip_stream_flag(body_bytes)
    } else {
        (body_bytes, false)
    };

    // 3. Select a credential, unless the vendor runs credential-free.
    let selected = if vendor_cfg.no_auth {
        None
    } else {
        match state
            .selector
            .select(&state.store, &state.secrets, vendor_id, bot.tags.as_deref())
        {
            Ok(Some(k)) => Some(k),
            Ok(None) => {
                tracing::warn!(vendor = vendor_id, bot_id = %bot.id, "no key available");
                return error(StatusCode::BAD_GATEWAY, "no credential available for vendor");
            }
            // Decryption failures are never detailed to the caller.
            Err(e) => {
                tracing::warn!(vendor = vendor_id, error = %e, "key selection failed");
                return error(StatusCode::BAD_GATEWAY, "upstream credential failure");
            }
        }
    };
    let key_id = selected.as_ref().map(|k| k.key_id.clone());

    // 4. Rewrite the request.
    let upstream_url = match parts.uri.query() {
        Some(q) => format!(
            "{}{}/{remainder}?{q}",
            vendor_cfg.origin(),
            vendor_cfg.base_path
        ),
        None => format!("{}{}/{remainder}", vendor_cfg.origin(), vendor_cfg.base_path),
    };

    let method = match reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) {
        Ok(m) => m,
        Err(_) => return error(StatusCode::BAD_REQUEST, "unsupported method"),
    };

    let mut rb = state
        .http
        .request(method, &upstream_url)
        .timeout(UPSTREAM_TIMEOUT);

    for (name, value) in parts.headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if let Ok(v) = value.to_str() {
            rb = rb.header(name.as_str(), v);
        }
    }
    if let Some(key) = &selected {
        rb = rb.header(vendor_cfg.auth_header, vendor_cfg.auth_value(&key.secret));
    }
    if !body_bytes.is_empty() {
        rb = rb.body(body_bytes.to_vec());
    }

    // 5. Send; network failures and timeouts are logged before answering.
    let upstream = match rb.send().await {
        Ok(r) => r,
        Err(e) => {
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            log_usage(&state, &bot.id, vendor_id, key_id.as_deref(), Some(status.as_u16()));
            tracing::warn!(vendor = vendor_id, error = %e, "upstream request failed");
            return error(status, "upstream unreachable");
        }
    };

    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();

    if reframe_as_sse {
        return respond_reframed(state, bot.id, vendor_id, key_id, status, upstream).await;
    }

    respond_streaming(state, bot.id, vendor_id, key_id, status, upstream_headers, upstream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stream the upstream response through, chunk by chunk. The usage-log row
/// is appended when the upstream body ends.
fn respond_streaming(
    state: KeyringState,
    bot_id: String,
    vendor_id: &str,
    key_id: Option<String>,
    status: StatusCode,
    upstream_headers: HeaderMap,
    upstream: reqwest::Response,
) -> Response {
    let vendor_id = vendor_id.to_string();

    let is_sse = upstream_headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);

    let mut builder = Response::builder().status(status.as_u16());
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream_headers.iter() {
            if RESPONSE_STRIP.contains(&name.as_str()) {
                continue;
            }
            let name = axum::http::HeaderName::from_bytes(name.as_str().as_bytes());
            let value = HeaderValue::from_bytes(value.as_bytes());
            if let (Ok(name), Ok(value)) = (name, value) {
                headers.insert(name, value);
            }
        }
        if is_sse {
            headers.insert("cache-control", HeaderValue::from_static("no-cache"));
            headers.insert("connection", HeaderValue::from_static("keep-alive"));
        }
    }

    let status_code = status.as_u16();
    let stream = async_stream::stream! {
        let mut upstream = upstream;
        loop {
            match upstream.chunk().await {
                // Each chunk is forwarded before the next upstream read, so
                // SSE clients see upstream pacing, not buffered bursts.
                Ok(Some(bytes)) => yield Ok::<Bytes, std::io::Error>(bytes),
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(vendor = %vendor_id, error = %e, "upstream body failed mid-stream");
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                    break;
                }
            }
        }
        log_usage(&state, &bot_id, &vendor_id, key_id.as_deref(), Some(status_code));
    };

    match builder.body(Body::from_stream(stream)) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "failed to assemble proxy response");
            error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// `force_non_streaming` path: the upstream answered a plain JSON response
/// to what the client believes is a streaming request. Re-frame it as two
/// SSE events so the client's stream parser completes normally.
async fn respond_reframed(
    state: KeyringState,
    bot_id: String,
    vendor_id: &str,
    key_id: Option<String>,
    status: StatusCode,
    upstream: reqwest::Response,
) -> Response {
    let payload = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            log_usage(&state, &bot_id, vendor_id, key_id.as_deref(), Some(502));
            tracing::warn!(vendor = vendor_id, error = %e, "upstream body read failed");
            return error(StatusCode::BAD_GATEWAY, "upstream body failed");
        }
    };

    log_usage(&state, &bot_id, vendor_id, key_id.as_deref(), Some(status.as_u16()));

    let mut framed = Vec::with_capacity(payload.len() + 32);
    framed.extend_from_slice(b"data: ");
    framed.extend_from_slice(&payload);
    framed.extend_from_slice(b"\n\ndata: [DONE]\n\n");

    Response::builder()
        .status(status.as_u16())
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(Body::from(framed))
        .unwrap_or_else(|_| error(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Remove `"stream": true` from a JSON body. Returns the (possibly
/// rewritten) body and whether the caller had asked for a stream.
fn strip_stream_flag(body: Bytes) -> (Bytes, bool) {
    let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return (body, false);
    };
    let wanted_stream = value.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);
    if !wanted_stream {
        return (body, false);
    }
    if let Some(obj) = value.as_object_mut() {
        obj.remove("stream");
    }
    match serde_json::to_vec(&value) {
        Ok(rewritten) => (Bytes::from(rewritten), true),
        Err(_) => (body, false),
    }
}

fn log_usage(
    state: &KeyringState,
    bot_id: &str,
    vendor_id: &str,
    key_id: Option<&str>,
    status: Option<u16>,
) {
    if let Err(e) = state.store.log_usage(bot_id, vendor_id, key_id, status) {
        tracing::warn!(error = %e, "usage log append failed");
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_stream_flag_removes_and_reports() {
        let body = Bytes::from(r#"{"model":"m","stream":true,"messages":[]}"#);
        let (rewritten, wanted) = strip_stream_flag(body);
        assert!(wanted);
        let v: serde_json::Value = serde_json::from_slice(&rewritten).unwrap();
        assert!(v.get("stream").is_none());
        assert_eq!(v["model"], "m");
    }

    #[test]
    fn strip_stream_flag_leaves_non_streaming_alone() {
        let body = Bytes::from(r#"{"model":"m"}"#);
        let (rewritten, wanted) = strip_stream_flag(body.clone());
        assert!(!wanted);
        assert_eq!(rewritten, body);
    }

    #[test]
    fn strip_stream_flag_ignores_non_json() {
        let body = Bytes::from_static(b"\x00binary");
        let (rewritten, wanted) = strip_stream_flag(body.clone());
        assert!(!wanted);
        assert_eq!(rewritten, body);
    }
}
