use std::path::PathBuf;

use serde::Serialize;

use super::{env_opt, env_or, env_or_file, env_parse, ConfigIssue, ConfigSeverity};
use crate::error::Result;

/// Control-plane configuration, resolved once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Root for the database and per-bot workspaces.
    pub data_dir: PathBuf,
    /// Root for per-bot secret directories.
    pub secrets_dir: PathBuf,
    /// Named volume backing `data_dir`, when the control plane itself runs
    /// in a container and bind-mount sources must be host-perspective paths.
    pub data_volume_name: Option<String>,
    /// Named volume backing `secrets_dir`.
    pub secrets_volume_name: Option<String>,
    /// Worker image reference.
    pub worker_image: String,
    /// Optional named network the worker containers attach to.
    pub bot_network: Option<String>,
    /// First port handed out by the allocator.
    pub bot_port_start: u16,
    /// Keyring admin endpoint. `None` disables keyring integration.
    pub proxy_admin_url: Option<String>,
    #[serde(skip_serializing)]
    pub proxy_admin_token: Option<String>,
    /// Keyring data-plane endpoint handed to workers. Derived from
    /// `proxy_admin_url` when not set explicitly.
    pub proxy_data_url: Option<String>,
    #[serde(skip_serializing)]
    pub admin_password: Option<String>,
    pub session_expiry_ms: u64,
}

impl GatewayConfig {
    /// Resolve the configuration from the environment.
    ///
    /// Fails only on unreadable `_FILE` indirections; everything else is a
    /// `validate()` concern so the operator sees all findings at once.
    pub fn from_env() -> Result<Self> {
        let proxy_admin_url = env_opt("PROXY_ADMIN_URL").map(|u| {
            u.trim_end_matches('/').to_string()
        });
        let proxy_data_url = env_opt("PROXY_DATA_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .or_else(|| proxy_admin_url.as_deref().map(derive_data_url));

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 7100),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
            secrets_dir: PathBuf::from(env_or("SECRETS_DIR", "./secrets")),
            data_volume_name: env_opt("DATA_VOLUME_NAME"),
            secrets_volume_name: env_opt("SECRETS_VOLUME_NAME"),
            worker_image: env_or("OPENCLAW_IMAGE", "openclaw:latest"),
            bot_network: env_opt("BOT_NETWORK"),
            bot_port_start: env_parse("BOT_PORT_START", 19_000),
            proxy_admin_url,
            proxy_admin_token: env_or_file("PROXY_ADMIN_TOKEN")?,
            proxy_data_url,
            admin_password: env_or_file("ADMIN_PASSWORD")?,
            session_expiry_ms: env_parse("SESSION_EXPIRY_MS", 86_400_000),
        })
    }

    /// Whether keyring integration is configured.
    pub fn keyring_enabled(&self) -> bool {
        self.proxy_admin_url.is_some()
    }

    /// Validate the configuration and return a list of issues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "PORT".into(),
                message: "port must be greater than 0".into(),
            });
        }

        match &self.admin_password {
            None => issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "ADMIN_PASSWORD".into(),
                message: "ADMIN_PASSWORD or ADMIN_PASSWORD_FILE is required".into(),
            }),
            Some(p) if p.len() < 12 => issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "ADMIN_PASSWORD".into(),
                message: "admin password must be at least 12 characters".into(),
            }),
            Some(_) => {}
        }

        if self.bot_port_start < 1024 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "BOT_PORT_START".into(),
                message: "bot port range must start above 1023".into(),
            });
        }

        if self.proxy_admin_url.is_some() && self.proxy_admin_token.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "PROXY_ADMIN_TOKEN".into(),
                message: "required when PROXY_ADMIN_URL is set".into(),
            });
        }

        if self.proxy_admin_url.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "PROXY_ADMIN_URL".into(),
                message: "keyring not configured — workers will call vendors directly"
                    .into(),
            });
        }

        issues
    }
}

/// Derive the data-plane URL from the admin URL by swapping the admin port
/// for the conventional data port. `http://keyring:9100` → `http://keyring:9101`.
fn derive_data_url(admin_url: &str) -> String {
    if let Some(idx) = admin_url.rfind(':') {
        if let Ok(port) = admin_url[idx + 1..].parse::<u16>() {
            return format!("{}:{}", &admin_url[..idx], port + 1);
        }
    }
    format!("{admin_url}:9101")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_data_url_increments_port() {
        assert_eq!(derive_data_url("http://keyring:9100"), "http://keyring:9101");
    }

    #[test]
    fn derive_data_url_appends_when_no_port() {
        assert_eq!(derive_data_url("http://keyring"), "http://keyring:9101");
    }

    #[test]
    fn short_admin_password_is_an_error() {
        let cfg = GatewayConfig {
            host: "0.0.0.0".into(),
            port: 7100,
            data_dir: "./data".into(),
            secrets_dir: "./secrets".into(),
            data_volume_name: None,
            secrets_volume_name: None,
            worker_image: "openclaw:latest".into(),
            bot_network: None,
            bot_port_start: 19_000,
            proxy_admin_url: None,
            proxy_admin_token: None,
            proxy_data_url: None,
            admin_password: Some("short".into()),
            session_expiry_ms: 86_400_000,
        };
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "ADMIN_PASSWORD" && i.severity == ConfigSeverity::Error));
    }
}
