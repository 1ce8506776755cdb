//! The `openclaw.json` manifest and its inputs.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bm_domain::vendor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Render inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a session maps onto conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionScope {
    #[default]
    User,
    Channel,
    Global,
}

/// Worker feature toggles, passed through from the create request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    #[serde(default)]
    pub commands: bool,
    #[serde(default)]
    pub tts: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts_voice: Option<String>,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_timeout: Option<u32>,
    #[serde(default)]
    pub session_scope: SessionScope,
}

/// Keyring wiring for a proxied worker.
#[derive(Debug, Clone)]
pub struct ProxyWiring {
    /// Keyring data-plane base URL (no trailing slash, no vendor segment).
    pub base_url: String,
    /// The bot's proxy bearer, shown to the worker only via this manifest.
    pub bearer: String,
}

/// Everything a render needs.
#[derive(Debug, Clone)]
pub struct RenderSpec {
    pub hostname: String,
    pub bot_id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub channel_type: String,
    pub port: u16,
    pub gateway_token: String,
    pub persona_name: String,
    pub emoji: Option<String>,
    pub soul_markdown: String,
    pub features: Features,
    /// `Some` when a keyring proxies this bot's LLM calls.
    pub proxy: Option<ProxyWiring>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manifest construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the manifest value.
///
/// With a proxy, the model is addressed as `<provider>-proxy/<model>` and a
/// matching `models.providers.<provider>-proxy` entry carries the base URL,
/// bearer, and API family. The distinct `-proxy` provider name prevents
/// merging with any built-in provider default that may hardcode a base URL.
pub(crate) fn build(spec: &RenderSpec) -> Value {
    let api_family = vendor::by_id(&spec.provider)
        .map(|v| v.api_family)
        .unwrap_or(vendor::ApiFamily::OpenaiCompletions);

    let (model_ref, providers) = match &spec.proxy {
        Some(proxy) => {
            let provider_key = format!("{}-proxy", spec.provider);
            let entry = json!({
                "baseUrl": format!("{}/{}", proxy.base_url, spec.provider),
                "apiKey": proxy.bearer,
                "api": api_family.as_str(),
            });
            (
                format!("{provider_key}/{}", spec.model),
                json!({ provider_key: entry }),
            )
        }
        None => (
            format!("{}/{}", spec.provider, spec.model),
            json!({}),
        ),
    };

    json!({
        "bot": {
            "id": spec.bot_id,
            "name": spec.name,
            "hostname": spec.hostname,
            "port": spec.port,
            "gatewayToken": spec.gateway_token,
        },
        "model": model_ref,
        "channel": { "type": spec.channel_type },
        "features": spec.features,
        "models": { "providers": providers },
    })
}

/// Seed content for `IDENTITY.md`. Written once; the worker owns it after.
pub(crate) fn identity_markdown(spec: &RenderSpec) -> String {
    let emoji = spec.emoji.as_deref().unwrap_or("");
    format!(
        "# {emoji} {name}\n\nYou are {name}, reachable as `{hostname}`.\n",
        name = spec.persona_name,
        hostname = spec.hostname,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_falls_back_to_completions_family() {
        let spec = RenderSpec {
            hostname: "h".into(),
            bot_id: "b".into(),
            name: "n".into(),
            provider: "somedaemon".into(),
            model: "m".into(),
            channel_type: "telegram".into(),
            port: 1,
            gateway_token: "t".into(),
            persona_name: "n".into(),
            emoji: None,
            soul_markdown: String::new(),
            features: Features::default(),
            proxy: Some(ProxyWiring {
                base_url: "http://k:9101".into(),
                bearer: "b".into(),
            }),
        };
        let m = build(&spec);
        assert_eq!(
            m["models"]["providers"]["somedaemon-proxy"]["api"],
            "openai-completions"
        );
    }

    #[test]
    fn features_serialize_with_scope() {
        let f = Features {
            commands: true,
            session_scope: SessionScope::Channel,
            ..Features::default()
        };
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["sessionScope"], "channel");
        assert_eq!(v["commands"], true);
    }
}
