//! Model discovery against a user-supplied base URL.
//!
//! The control plane can sit on private networks, so this endpoint is
//! SSRF-hardened: http(s) only, no private/link-local/CGNAT/ULA targets,
//! no `.local`/`.internal` names — with a narrow allowlist for
//! operator-intended local discovery (a local inference daemon). The
//! outbound fetch has a hard timeout and a streamed 1 MiB body cap whose
//! breach cancels the reader.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use futures_util::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};

use bm_domain::error::Error;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

const DISCOVER_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Hostnames allowed to bypass the private-address gate. Operators point
/// these at inference daemons running next to the control plane.
const LOCAL_ALLOWLIST: &[&str] = &["localhost", "127.0.0.1", "host.docker.internal"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    base_url: String,
    api_key: Option<String>,
}

pub async fn discover(
    State(state): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> ApiResult<Json<Value>> {
    if let Err(reason) = validate_discovery_url(&req.base_url) {
        return Err(ApiError(Error::Validation(reason)));
    }

    let url = format!("{}/models", req.base_url.trim_end_matches('/'));
    let mut rb = state.http.get(&url).timeout(DISCOVER_TIMEOUT);
    if let Some(key) = &req.api_key {
        rb = rb.header("authorization", format!("Bearer {key}"));
    }

    // An unreachable target is an empty discovery, not an error: the
    // operator may simply not have started their local daemon yet.
    let resp = match rb.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "model discovery fetch failed");
            return Ok(Json(json!({ "models": [] })));
        }
    };

    // Stream with a hard cap; dropping the stream cancels the transfer.
    let mut body: Vec<u8> = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(_) => return Ok(Json(json!({ "models": [] }))),
        };
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            drop(stream);
            return Err(ApiError(Error::Validation(
                "discovery response exceeded 1 MiB".into(),
            )));
        }
        body.extend_from_slice(&chunk);
    }

    let models = parse_model_ids(&body);
    Ok(Json(json!({ "models": models })))
}

/// Pull model ids out of an OpenAI-style `{data: [{id}]}` listing.
fn parse_model_ids(body: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return Vec::new();
    };
    value
        .get("data")
        .and_then(|d| d.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.get("id").and_then(|id| id.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSRF gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a discovery URL before any socket is opened.
fn validate_discovery_url(raw: &str) -> Result<(), String> {
    let parsed = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("blocked scheme: {other}:// (only http/https allowed)")),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL has no host".to_string())?
        .to_ascii_lowercase();

    // Operator-intended local targets skip the gate entirely.
    if LOCAL_ALLOWLIST.contains(&host.as_str()) {
        return Ok(());
    }

    if host == "0.0.0.0" {
        return Err("blocked host: 0.0.0.0".into());
    }
    if host.ends_with(".local") || host.ends_with(".internal") {
        return Err(format!("blocked internal hostname: {host}"));
    }

    // Literal IPs are judged directly; names must resolve clean.
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(format!("blocked private/internal address: {ip}"));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = format!("{host}:{port}")
        .to_socket_addrs()
        .map_err(|e| format!("DNS resolution failed for {host}: {e}"))?
        .collect();
    if addrs.is_empty() {
        return Err(format!("DNS resolution returned no addresses for {host}"));
    }
    for addr in &addrs {
        if is_private_ip(&addr.ip()) {
            return Err(format!(
                "blocked private/internal address: {host} resolves to {}",
                addr.ip()
            ));
        }
    }
    Ok(())
}

/// Whether an address belongs to a private, loopback, link-local, or
/// otherwise non-public range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            // IPv4-mapped forms are judged as their embedded IPv4 address.
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(&mapped);
            }
            v6.is_loopback()                        // ::1
                || v6.is_unspecified()              // ::
                || is_v6_unique_local(v6)           // fc00::/7
                || is_v6_link_local(v6)             // fe80::/10
        }
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()                                // 127.0.0.0/8
        || ip.is_private()                          // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local()                       // 169.254.0.0/16
        || ip.is_broadcast()
        || ip.is_unspecified()                      // 0.0.0.0
        || is_v4_shared_address(ip)                 // 100.64.0.0/10 (CGNAT)
}

/// 100.64.0.0/10 — shared address space (RFC 6598 / CGNAT).
fn is_v4_shared_address(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Unique-local addresses: fc00::/7.
fn is_v6_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFE00) == 0xFC00
}

/// Link-local addresses: fe80::/10.
fn is_v6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFFC0) == 0xFE80
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
