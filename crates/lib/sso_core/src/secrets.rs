//! AES-256-GCM sealing of provider tokens at rest.
//!
//! Output is base64 `nonce || ciphertext || tag` with a random 12-byte nonce,
//! suitable for TEXT columns.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::store::StoreError;

const NONCE_SIZE: usize = 12;

/// Symmetric cipher keyed from a passphrase.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher")
    }
}

impl TokenCipher {
    /// Derive the 32-byte key as SHA-256 of `passphrase`.
    pub fn new(passphrase: &str) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| StoreError::Encryption(format!("encrypt: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(&combined))
    }

    /// Seal an optional value, passing `None` through.
    pub fn seal_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, StoreError> {
        plaintext.map(|p| self.seal(p)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reverse of `seal`, with the key derived the same way.
    fn unseal(passphrase: &str, sealed: &str) -> Option<String> {
        let combined = STANDARD.decode(sealed).ok()?;
        if combined.len() < NONCE_SIZE {
            return None;
        }
        let (nonce, ciphertext) = combined.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new(&Sha256::digest(passphrase.as_bytes()));
        let plaintext = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()?;
        String::from_utf8(plaintext).ok()
    }

    #[test]
    fn sealed_value_hides_and_recovers_the_token() {
        let cipher = TokenCipher::new("token-encryption-key");
        let sealed = cipher.seal("ya29.provider-access-token").unwrap();
        assert!(!sealed.contains("provider-access-token"));
        assert_eq!(
            unseal("token-encryption-key", &sealed).as_deref(),
            Some("ya29.provider-access-token")
        );
    }

    #[test]
    fn nonces_are_random() {
        let cipher = TokenCipher::new("k");
        assert_ne!(cipher.seal("same").unwrap(), cipher.seal("same").unwrap());
    }

    #[test]
    fn other_keys_cannot_unseal() {
        let sealed = TokenCipher::new("correct").seal("secret").unwrap();
        assert!(unseal("wrong", &sealed).is_none());
    }

    #[test]
    fn seal_opt_passes_none_through() {
        let cipher = TokenCipher::new("k");
        assert_eq!(cipher.seal_opt(None).unwrap(), None);
        assert!(cipher.seal_opt(Some("x")).unwrap().is_some());
    }
}
