//! HTTP client for the keyring admin API.
//!
//! The control plane talks to the keyring over its admin surface for two
//! things: registering/revoking bots during lifecycle sagas, and passing
//! operator key-management requests straight through. Transient (5xx /
//! connection) failures retry with exponential back-off; 4xx responses are
//! permanent and surface as their taxonomy errors.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use bm_domain::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 2;

/// A registered bot's one-time credentials, as returned by the keyring.
#[derive(Debug, Deserialize)]
pub struct Registration {
    /// The proxy bearer. Shown exactly once; the keyring stores only a hash.
    pub token: String,
}

/// Client for the keyring admin surface.
#[derive(Debug, Clone)]
pub struct KeyringClient {
    http: Client,
    base_url: String,
    admin_token: String,
}

impl KeyringClient {
    pub fn new(base_url: &str, admin_token: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::Upstream(format!("keyring client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            admin_token: admin_token.to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.header("authorization", format!("Bearer {}", self.admin_token))
    }

    /// Execute with retry + exponential back-off on transient errors.
    /// 4xx responses are permanent and never retried.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            match self.decorate(build_request()).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Upstream(format!(
                            "keyring {endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    last_err = Some(Error::Upstream(format!("keyring {endpoint}: {e}")));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::Upstream(format!("keyring {endpoint}: all retries exhausted"))
        }))
    }

    /// Map a non-success admin response into the error taxonomy.
    async fn check(endpoint: &str, resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => Error::NotFound(format!("keyring {endpoint}")),
            StatusCode::CONFLICT => Error::Conflict(format!("keyring {endpoint}: {body}")),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::Upstream(format!("keyring admin auth failed ({status})"))
            }
            _ => Error::Upstream(format!("keyring {endpoint} returned {status}: {body}")),
        })
    }

    // ── bot registry ─────────────────────────────────────────────────

    /// Register a bot; returns its one-time proxy bearer.
    pub async fn register_bot(
        &self,
        bot_id: &str,
        hostname: &str,
        tags: Option<&[String]>,
    ) -> Result<Registration> {
        let url = self.url("/admin/bots");
        let body = serde_json::json!({
            "botId": bot_id,
            "hostname": hostname,
            "tags": tags,
        });
        let resp = self
            .execute_with_retry("POST /admin/bots", || self.http.post(&url).json(&body))
            .await?;
        let resp = Self::check("POST /admin/bots", resp).await?;
        resp.json()
            .await
            .map_err(|e| Error::Upstream(format!("keyring registration response: {e}")))
    }

    /// Revoke a bot's registration. Missing registrations are fine — the
    /// lifecycle saga calls this from compensation paths.
    pub async fn revoke_bot(&self, bot_id: &str) -> Result<()> {
        let url = self.url(&format!("/admin/bots/{bot_id}"));
        let resp = self
            .execute_with_retry("DELETE /admin/bots/:id", || self.http.delete(&url))
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check("DELETE /admin/bots/:id", resp).await?;
        Ok(())
    }

    // ── pass-through (operator key management) ───────────────────────

    /// Forward an admin request verbatim; returns `(status, body)` so the
    /// control plane can relay the keyring's own answer.
    pub async fn passthrough(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let url = self.url(path);
        let mut rb = self.decorate(self.http.request(method, &url));
        if let Some(body) = body {
            rb = rb.json(&body);
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("keyring {path}: {e}")))?;
        let status = resp.status();
        let value = resp.json().await.unwrap_or(Value::Null);
        Ok((status, value))
    }

    /// Keyring health, surfaced by the control plane's own health endpoint.
    pub async fn health(&self) -> Result<Value> {
        let (status, body) = self
            .passthrough(reqwest::Method::GET, "/admin/health", None)
            .await?;
        if !status.is_success() {
            return Err(Error::Upstream(format!("keyring health returned {status}")));
        }
        Ok(body)
    }
}
