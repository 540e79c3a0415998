//! Transparent record-level encryption.
//!
//! # Algorithm
//!
//! `spec.md` describes AES-256-CBC plus an HMAC-SHA-256 tag
//! (encrypt-then-MAC). This crate takes the substitution the spec
//! explicitly permits ("An implementer MAY substitute an authenticated
//! cipher... provided the on-disk wire format remains compatible... or a
//! migration is documented") and uses a single AEAD primitive instead:
//! **AES-256-GCM-SIV**, nonce-misuse-resistant and hardware-accelerated.
//! The substitution is recorded in `DESIGN.md` and in the database
//! metadata `version` field (`"foliodb-aead-v1"`).
//!
//! # Wire format
//!
//! ```text
//! [ 12-byte nonce | AEAD ciphertext + 16-byte tag ]
//! ```
//! base64-encoded when embedded in a row file or metadata record.
//!
//! # Key hierarchy
//!
//! A user-supplied key-encryption key (KEK, arbitrary bytes — typically a
//! passphrase) is stretched to 256 bits via HKDF-SHA256 and used to wrap a
//! per-table 32-byte data-encryption key (DEK). Column values are encrypted
//! under the unwrapped DEK, never directly under the KEK.

use aes_gcm_siv::Aes256GcmSiv;
use aes_gcm_siv::aead::generic_array::GenericArray;
use aes_gcm_siv::aead::{Aead, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use rand::RngCore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::error::{FoliodbError, FoliodbResult};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const HKDF_INFO: &[u8] = b"foliodb-kek-v1";
const HKDF_SALT: &[u8] = b"foliodb-default-salt-v1";

/// A 256-bit key derived from a user-supplied KEK via HKDF-SHA256.
#[derive(Clone)]
pub struct Kek {
    key: [u8; KEY_SIZE],
}

impl Kek {
    /// Derive a KEK from arbitrary bytes (typically a passphrase).
    pub fn derive(raw: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), raw);
        let mut key = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut key)
            .expect("HKDF expand never fails for a 32-byte output");
        Self { key }
    }

    /// Wrap a 32-byte DEK under this KEK, returning a base64 blob suitable
    /// for storage in table metadata.
    pub fn wrap_dek(&self, dek: &Dek) -> FoliodbResult<String> {
        aead_encrypt(&self.key, &dek.0)
    }

    /// Unwrap a base64-encoded DEK blob. Fails with `CryptoFailed` if the
    /// AEAD tag does not verify (wrong KEK, or tampering).
    pub fn unwrap_dek(&self, wrapped: &str) -> FoliodbResult<Dek> {
        let bytes = aead_decrypt(&self.key, wrapped)?;
        if bytes.len() != KEY_SIZE {
            return Err(FoliodbError::CryptoFailed(
                "unwrapped DEK has unexpected length".to_string(),
            ));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(Dek(key))
    }
}

/// A per-table, randomly-generated 32-byte data-encryption key.
#[derive(Clone)]
pub struct Dek([u8; KEY_SIZE]);

impl Dek {
    /// Generate a fresh random DEK.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        Self(key)
    }

    /// Encrypt a JSON-serializable value, returning a base64 blob.
    pub fn encrypt<T: Serialize>(&self, value: &T) -> FoliodbResult<String> {
        let plaintext = serde_json::to_vec(value)?;
        aead_encrypt(&self.0, &plaintext)
    }

    /// Decrypt a base64 blob produced by [`Dek::encrypt`] and JSON-parse it.
    /// The AEAD tag check happens before the plaintext is ever touched, so a
    /// failed tag never yields possibly-forged plaintext.
    pub fn decrypt<T: DeserializeOwned>(&self, blob: &str) -> FoliodbResult<T> {
        let plaintext = aead_decrypt(&self.0, blob)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn aead_encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> FoliodbResult<String> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = GenericArray::from_slice(&nonce_bytes);

    let cipher = Aes256GcmSiv::new(GenericArray::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| FoliodbError::CryptoFailed(format!("encrypt failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

fn aead_decrypt(key: &[u8; KEY_SIZE], blob: &str) -> FoliodbResult<Vec<u8>> {
    let raw = BASE64
        .decode(blob)
        .map_err(|e| FoliodbError::CryptoFailed(format!("invalid base64: {e}")))?;
    if raw.len() < NONCE_SIZE {
        return Err(FoliodbError::CryptoFailed(
            "encrypted blob too short (missing nonce)".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
    let nonce = GenericArray::from_slice(nonce_bytes);
    let cipher = Aes256GcmSiv::new(GenericArray::from_slice(key));
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| FoliodbError::CryptoFailed(format!("decryption failed: {e}")))
}

/// Generate `n` random bytes, hex-encoded — used for row ids.
pub fn random_id(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
