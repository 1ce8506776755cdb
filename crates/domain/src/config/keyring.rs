use std::path::PathBuf;

use super::{env_or, env_or_file, env_parse, ConfigIssue, ConfigSeverity};
use crate::error::{Error, Result};

/// Keyring process configuration.
#[derive(Debug, Clone)]
pub struct KeyringConfig {
    pub host: String,
    /// Admin surface listener (key/bot CRUD).
    pub admin_port: u16,
    /// Data-plane listener (the credential-injecting proxy).
    pub data_port: u16,
    pub db_path: PathBuf,
    /// 32-byte AES-256-GCM master key.
    pub master_key: [u8; 32],
    pub admin_token: Option<String>,
}

impl KeyringConfig {
    /// Resolve the configuration from the environment.
    ///
    /// The master key is required and must be exactly 32 bytes, supplied
    /// either as 64 hex characters or as raw bytes via `MASTER_KEY_FILE`.
    pub fn from_env() -> Result<Self> {
        let raw = env_or_file("MASTER_KEY")?.ok_or_else(|| {
            Error::Validation("MASTER_KEY or MASTER_KEY_FILE is required".into())
        })?;
        let master_key = parse_master_key(&raw)?;

        Ok(Self {
            host: env_or("HOST", "0.0.0.0"),
            admin_port: env_parse("ADMIN_PORT", 9100),
            data_port: env_parse("DATA_PORT", 9101),
            db_path: PathBuf::from(env_or("DB_PATH", "./keyring.db")),
            master_key,
            admin_token: env_or_file("ADMIN_TOKEN")?,
        })
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.admin_port == self.data_port {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "DATA_PORT".into(),
                message: "admin and data listeners must use distinct ports".into(),
            });
        }

        if self.admin_token.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "ADMIN_TOKEN".into(),
                message: "ADMIN_TOKEN or ADMIN_TOKEN_FILE is required".into(),
            });
        }

        issues
    }
}

/// Accept a master key as 64 hex chars or as exactly 32 raw bytes.
fn parse_master_key(raw: &str) -> Result<[u8; 32]> {
    let bytes = if raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(raw).map_err(|e| Error::Validation(format!("MASTER_KEY: {e}")))?
    } else {
        raw.as_bytes().to_vec()
    };
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        Error::Validation(
            "MASTER_KEY must be exactly 32 bytes (or 64 hex characters)".into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_master_key_decodes() {
        let hex_key = "ab".repeat(32);
        let key = parse_master_key(&hex_key).unwrap();
        assert_eq!(key, [0xab; 32]);
    }

    #[test]
    fn raw_32_byte_key_is_accepted() {
        let raw = "0123456789abcdef0123456789abcdef";
        let key = parse_master_key(raw).unwrap();
        assert_eq!(&key[..], raw.as_bytes());
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(parse_master_key("too-short").is_err());
        assert!(parse_master_key(&"ab".repeat(33)).is_err());
    }
}
