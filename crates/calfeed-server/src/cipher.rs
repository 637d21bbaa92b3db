//! AES-256-GCM encryption of stored secrets.
//!
//! Envelopes are `hex(nonce):hex(tag):hex(ciphertext)` with a fresh 96-bit
//! nonce per call and a 128-bit tag. Envelopes written by earlier releases
//! carry a 128-bit nonce and are still readable.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::{ServerError, ServerResult};
use crate::store::APP_SECRET_LEN;

const NONCE_LEN: usize = 12;
const LEGACY_NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce. Decrypt only.
pub(crate) type LegacyAes256Gcm = AesGcm<Aes256, U16>;

/// Symmetric cipher bound to the application secret.
pub struct SecretCipher {
    cipher: Aes256Gcm,
    legacy: LegacyAes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SecretCipher {
    pub fn new(key: &[u8; APP_SECRET_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            legacy: LegacyAes256Gcm::new(Key::<LegacyAes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypts `plaintext`. Empty input yields `None`.
    pub fn encrypt(&self, plaintext: &str) -> ServerResult<Option<String>> {
        if plaintext.is_empty() {
            return Ok(None);
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| ServerError::integrity("encryption failed"))?;
        // aes-gcm appends the tag to the ciphertext.
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(Some(format!(
            "{}:{}:{}",
            hex::encode(nonce),
            hex::encode(tag),
            hex::encode(ciphertext)
        )))
    }

    /// Decrypts an envelope.
    ///
    /// Empty input or a segment count other than three yields `Ok(None)`:
    /// the value is treated as never set. Anything that looks like an
    /// envelope but does not open is an integrity error.
    pub fn decrypt(&self, envelope: &str) -> ServerResult<Option<String>> {
        if envelope.is_empty() {
            return Ok(None);
        }
        let parts: Vec<&str> = envelope.split(':').collect();
        let [nonce_hex, tag_hex, ct_hex] = parts.as_slice() else {
            return Ok(None);
        };

        let nonce = hex::decode(nonce_hex)
            .map_err(|_| ServerError::integrity("nonce is not valid hex"))?;
        let tag =
            hex::decode(tag_hex).map_err(|_| ServerError::integrity("tag is not valid hex"))?;
        let mut sealed = hex::decode(ct_hex)
            .map_err(|_| ServerError::integrity("ciphertext is not valid hex"))?;

        if tag.len() != TAG_LEN {
            return Err(ServerError::integrity(format!(
                "tag must be {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }

        sealed.extend_from_slice(&tag);
        let opened = match nonce.len() {
            NONCE_LEN => self.cipher.decrypt(Nonce::from_slice(&nonce), sealed.as_slice()),
            LEGACY_NONCE_LEN => self
                .legacy
                .decrypt(Nonce::<U16>::from_slice(&nonce), sealed.as_slice()),
            n => {
                return Err(ServerError::integrity(format!(
                    "nonce must be {NONCE_LEN} or {LEGACY_NONCE_LEN} bytes, got {n}"
                )));
            }
        };
        let plaintext =
            opened.map_err(|_| ServerError::integrity("authentication tag mismatch"))?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| ServerError::integrity("decrypted value is not UTF-8"))
    }
}
