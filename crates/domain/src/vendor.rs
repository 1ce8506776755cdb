//! The vendor table — the single source of truth for LLM providers.
//!
//! Both binaries consume this table: the control plane validates
//! `ai_provider` against it and picks the API family for the worker
//! manifest; the keyring builds its upstream proxy targets from it.
//! Keeping one compiled-in table avoids the two lists drifting apart.

use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// API family
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which wire protocol the worker should speak to a vendor.
///
/// Used verbatim in the worker manifest's provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiFamily {
    OpenaiResponses,
    AnthropicMessages,
    GoogleGenerativeAi,
    OpenaiCompletions,
}

impl ApiFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFamily::OpenaiResponses => "openai-responses",
            ApiFamily::AnthropicMessages => "anthropic-messages",
            ApiFamily::GoogleGenerativeAi => "google-generative-ai",
            ApiFamily::OpenaiCompletions => "openai-completions",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth scheme
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a vendor expects its credential formatted in the auth header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <secret>` style.
    Bearer,
    /// The raw secret as the header value (`x-api-key` style).
    Raw,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vendor config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One upstream LLM vendor.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    pub id: &'static str,
    /// Upstream host. Port defaults to 443 when `port` is `None`.
    pub host: &'static str,
    pub port: Option<u16>,
    /// Path prefix prepended to the proxied remainder.
    pub base_path: &'static str,
    pub auth_header: &'static str,
    pub auth_scheme: AuthScheme,
    pub api_family: ApiFamily,
    /// Strip `"stream": true` from outgoing bodies and re-frame the
    /// response as SSE client-side. Used for local inference daemons that
    /// mishandle streaming.
    pub force_non_streaming: bool,
    /// Skip credential selection and substitution entirely.
    pub no_auth: bool,
    /// Plain HTTP instead of TLS (local daemons only).
    pub insecure_http: bool,
}

impl VendorConfig {
    /// Format the credential for this vendor's auth header.
    pub fn auth_value(&self, secret: &str) -> String {
        match self.auth_scheme {
            AuthScheme::Bearer => format!("Bearer {secret}"),
            AuthScheme::Raw => secret.to_string(),
        }
    }

    /// The upstream origin, e.g. `https://api.openai.com` or
    /// `http://127.0.0.1:11434`.
    pub fn origin(&self) -> String {
        let scheme = if self.insecure_http { "http" } else { "https" };
        match self.port {
            Some(p) => format!("{scheme}://{}:{p}", self.host),
            None => format!("{scheme}://{}", self.host),
        }
    }
}

const VENDORS: &[VendorConfig] = &[
    VendorConfig {
        id: "openai",
        host: "api.openai.com",
        port: None,
        base_path: "/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiResponses,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "anthropic",
        host: "api.anthropic.com",
        port: None,
        base_path: "/v1",
        auth_header: "x-api-key",
        auth_scheme: AuthScheme::Raw,
        api_family: ApiFamily::AnthropicMessages,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "google",
        host: "generativelanguage.googleapis.com",
        port: None,
        base_path: "/v1beta",
        auth_header: "x-goog-api-key",
        auth_scheme: AuthScheme::Raw,
        api_family: ApiFamily::GoogleGenerativeAi,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "mistral",
        host: "api.mistral.ai",
        port: None,
        base_path: "/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiCompletions,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "groq",
        host: "api.groq.com",
        port: None,
        base_path: "/openai/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiCompletions,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "openrouter",
        host: "openrouter.ai",
        port: None,
        base_path: "/api/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiCompletions,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "deepseek",
        host: "api.deepseek.com",
        port: None,
        base_path: "/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiCompletions,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "xai",
        host: "api.x.ai",
        port: None,
        base_path: "/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiCompletions,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    VendorConfig {
        id: "together",
        host: "api.together.xyz",
        port: None,
        base_path: "/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiCompletions,
        force_non_streaming: false,
        no_auth: false,
        insecure_http: false,
    },
    // Local inference daemon. No credential, no TLS, and its streaming
    // implementation is unreliable enough that the proxy re-frames.
    VendorConfig {
        id: "ollama",
        host: "127.0.0.1",
        port: Some(11434),
        base_path: "/v1",
        auth_header: "authorization",
        auth_scheme: AuthScheme::Bearer,
        api_family: ApiFamily::OpenaiCompletions,
        force_non_streaming: true,
        no_auth: true,
        insecure_http: true,
    },
];

/// All known vendors.
pub fn all() -> &'static [VendorConfig] {
    VENDORS
}

/// Look a vendor up by id.
pub fn by_id(id: &str) -> Option<&'static VendorConfig> {
    VENDORS.iter().find(|v| v.id == id)
}

/// Whether `id` names a known provider.
pub fn is_known_provider(id: &str) -> bool {
    by_id(id).is_some()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chat channels a worker can be wired to.
pub const CHANNELS: &[&str] = &["telegram", "discord", "slack", "whatsapp", "signal"];

pub fn is_known_channel(id: &str) -> bool {
    CHANNELS.contains(&id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for v in all() {
            assert!(seen.insert(v.id), "duplicate vendor id {}", v.id);
        }
    }

    #[test]
    fn bearer_and_raw_formatting() {
        let openai = by_id("openai").unwrap();
        assert_eq!(openai.auth_value("sk-test"), "Bearer sk-test");
        let anthropic = by_id("anthropic").unwrap();
        assert_eq!(anthropic.auth_value("sk-ant"), "sk-ant");
    }

    #[test]
    fn origin_includes_port_and_scheme() {
        assert_eq!(by_id("openai").unwrap().origin(), "https://api.openai.com");
        assert_eq!(by_id("ollama").unwrap().origin(), "http://127.0.0.1:11434");
    }

    #[test]
    fn unknown_vendor_is_rejected() {
        assert!(!is_known_provider("nonexistent"));
        assert!(is_known_provider("openai"));
    }

    #[test]
    fn known_channels() {
        assert!(is_known_channel("telegram"));
        assert!(!is_known_channel("carrier-pigeon"));
    }
}
