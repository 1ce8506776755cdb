//! Key selection — tag-routed round-robin with documented fallback.
//!
//! Selection order for `(vendor, botTags)`:
//! 1. Each bot tag in order: the first tag whose `(vendor, tag)` pool is
//!    non-empty wins, with round-robin keyed `vendor:tag`.
//! 2. The vendor's untagged (default) pool, keyed `vendor:default`.
//! 3. Any key for the vendor, keyed `vendor`.
//! 4. `None`.
//!
//! Counters live in memory and reset on restart — deliberate: the fairness
//! guarantee is that over any window spanning one full rotation, each
//! eligible key is used exactly once. Counters are not reset when the key
//! set changes.

use std::collections::HashMap;

use parking_lot::Mutex;

use bm_domain::error::Result;

use crate::crypto::SecretBox;
use crate::store::{KeyStore, ProviderKey};

/// A selected credential, plaintext ready for the proxy transport.
/// Consumed immediately; never retained.
pub struct SelectedKey {
    pub key_id: String,
    pub secret: String,
}

/// Round-robin selector over the key store.
pub struct KeySelector {
    counters: Mutex<HashMap<String, u64>>,
}

impl Default for KeySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySelector {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Select a key for `(vendor, bot_tags)`, or `None` when the vendor has
    /// no keys at all.
    pub fn select(
        &self,
        store: &KeyStore,
        secrets: &SecretBox,
        vendor: &str,
        bot_tags: Option<&[String]>,
    ) -> Result<Option<SelectedKey>> {
        if let Some(tags) = bot_tags {
            for tag in tags {
                let pool = store.keys_by_vendor_and_tag(vendor, tag)?;
                if !pool.is_empty() {
                    return self
                        .pick(&pool, &format!("{vendor}:{tag}"), secrets)
                        .map(Some);
                }
            }
        }

        let defaults = store.default_keys_for_vendor(vendor)?;
        if !defaults.is_empty() {
            return self
                .pick(&defaults, &format!("{vendor}:default"), secrets)
                .map(Some);
        }

        let any = store.keys_by_vendor(vendor)?;
        if !any.is_empty() {
            return self.pick(&any, vendor, secrets).map(Some);
        }

        Ok(None)
    }

    /// `keys[counter % n]`, then increment.
    fn pick(
        &self,
        pool: &[ProviderKey],
        counter_key: &str,
        secrets: &SecretBox,
    ) -> Result<SelectedKey> {
        let idx = {
            let mut counters = self.counters.lock();
            let counter = counters.entry(counter_key.to_string()).or_insert(0);
            let idx = (*counter as usize) % pool.len();
            *counter += 1;
            idx
        };
        let row = &pool[idx];
        let secret = secrets.decrypt(&row.secret_encrypted)?;
        Ok(SelectedKey {
            key_id: row.id.clone(),
            secret,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
