use std::sync::Arc;

use sha2::{Digest, Sha256};

use bm_domain::config::KeyringConfig;
use bm_domain::error::{Error, Result};

use crate::crypto::SecretBox;
use crate::selector::KeySelector;
use crate::store::KeyStore;

/// Shared state for both keyring listeners.
#[derive(Clone)]
pub struct KeyringState {
    pub store: Arc<KeyStore>,
    pub secrets: SecretBox,
    pub selector: Arc<KeySelector>,
    /// SHA-256 of the static admin bearer (computed once at startup).
    pub admin_token_hash: Arc<Vec<u8>>,
    /// Upstream HTTP client. No global timeout — the proxy applies the
    /// per-request budget itself.
    pub http: reqwest::Client,
}

impl KeyringState {
    pub fn new(config: &KeyringConfig, store: KeyStore) -> Result<Self> {
        let admin_token = config
            .admin_token
            .as_deref()
            .ok_or_else(|| Error::Validation("ADMIN_TOKEN is required".into()))?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            secrets: SecretBox::new(config.master_key),
            selector: Arc::new(KeySelector::new()),
            admin_token_hash: Arc::new(Sha256::digest(admin_token.as_bytes()).to_vec()),
            http,
        })
    }
}
