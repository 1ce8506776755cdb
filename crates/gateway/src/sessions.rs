//! In-memory session store for the operator API.
//!
//! Sessions are `(token → expiry)` pairs held only in process memory; a
//! restart logs every operator out, which is accepted and documented.
//! Lookup performs lazy eviction, so an expired token disappears the first
//! time anything asks about it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::RngCore;

/// Process-wide session store.
pub struct SessionStore {
    tokens: RwLock<HashMap<String, Instant>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Mint a fresh 32-byte bearer and record its expiry.
    pub fn mint(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.tokens
            .write()
            .insert(token.clone(), Instant::now() + self.ttl);
        token
    }

    /// Whether the token names a live session. Expired entries are evicted
    /// here; the race with a concurrent lookup is benign.
    pub fn is_valid(&self, token: &str) -> bool {
        let expired = {
            let tokens = self.tokens.read();
            match tokens.get(token) {
                Some(expiry) => *expiry <= Instant::now(),
                None => return false,
            }
        };
        if expired {
            self.tokens.write().remove(token);
            return false;
        }
        true
    }

    /// Invalidate a session (logout). Unknown tokens are fine.
    pub fn revoke(&self, token: &str) {
        self.tokens.write().remove(token);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_token_is_valid_until_revoked() {
        let store = SessionStore::new(Duration::from_secs(60));
        let token = store.mint();
        assert!(store.is_valid(&token));
        store.revoke(&token);
        assert!(!store.is_valid(&token));
    }

    #[test]
    fn unknown_token_is_invalid() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert!(!store.is_valid("nope"));
    }

    #[test]
    fn expired_token_is_lazily_evicted() {
        let store = SessionStore::new(Duration::from_millis(0));
        let token = store.mint();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!store.is_valid(&token));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn tokens_are_64_hex_and_unique() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.mint();
        let b = store.mint();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
