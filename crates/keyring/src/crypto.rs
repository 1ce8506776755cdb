//! Envelope encryption and token hashing.
//!
//! Secrets rest as `nonce(12) ∥ auth_tag(16) ∥ ciphertext` under AES-256-GCM
//! with the process master key. Bearer tokens are never stored: only their
//! SHA-256 hex digest is.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use bm_domain::error::{Error, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM envelope around the master key.
#[derive(Clone)]
pub struct SecretBox {
    key: [u8; 32],
}

impl SecretBox {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self { key: master_key }
    }

    /// Encrypt a plaintext secret. Fresh random nonce per call.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // The AEAD output is ciphertext ∥ tag; the stored layout puts the
        // tag directly after the nonce.
        let sealed = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Crypto("encryption failed".into()))?;
        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(tag);
        out.extend_from_slice(ct);
        Ok(out)
    }

    /// Decrypt a stored envelope. Fails on a wrong key or any tampered byte.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<String> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
        let (tag, ct) = rest.split_at(TAG_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);

        let mut aead_input = Vec::with_capacity(ct.len() + TAG_LEN);
        aead_input.extend_from_slice(ct);
        aead_input.extend_from_slice(tag);

        let plain = cipher
            .decrypt(nonce, aead_input.as_ref())
            .map_err(|_| Error::Crypto("decryption failed".into()))?;
        String::from_utf8(plain).map_err(|_| Error::Crypto("plaintext not UTF-8".into()))
    }
}

// Manual Debug impl so the master key can never end up in logs.
impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

/// SHA-256 hex digest of a bearer token. Deterministic, 64 hex chars.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Mint a fresh random bearer: 32 bytes, hex-encoded.
pub fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let sb = SecretBox::new([7u8; 32]);
        let sealed = sb.encrypt("sk-very-secret").unwrap();
        assert_eq!(sb.decrypt(&sealed).unwrap(), "sk-very-secret");
    }

    #[test]
    fn layout_is_nonce_tag_ciphertext() {
        let sb = SecretBox::new([7u8; 32]);
        let sealed = sb.encrypt("abc").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN + 3);
    }

    #[test]
    fn nonces_differ_between_calls() {
        let sb = SecretBox::new([7u8; 32]);
        let a = sb.encrypt("same").unwrap();
        let b = sb.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = SecretBox::new([7u8; 32]).encrypt("secret").unwrap();
        assert!(SecretBox::new([8u8; 32]).decrypt(&sealed).is_err());
    }

    #[test]
    fn any_tampered_byte_fails() {
        let sb = SecretBox::new([7u8; 32]);
        let sealed = sb.encrypt("secret").unwrap();
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(sb.decrypt(&tampered).is_err(), "byte {i} tamper went undetected");
        }
    }

    #[test]
    fn truncated_envelope_fails() {
        let sb = SecretBox::new([7u8; 32]);
        assert!(sb.decrypt(&[0u8; 10]).is_err());
    }

    #[test]
    fn hash_token_is_deterministic_64_hex() {
        let h1 = hash_token("bearer-a");
        let h2 = hash_token("bearer-a");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash_token("bearer-b"), h1);
    }

    #[test]
    fn minted_tokens_are_unique_hex() {
        let a = mint_token();
        let b = mint_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn debug_does_not_leak_key() {
        let sb = SecretBox::new([0xAA; 32]);
        let s = format!("{sb:?}");
        assert!(!s.contains("170")); // 0xAA
        assert!(!s.contains("aa"));
    }
}
