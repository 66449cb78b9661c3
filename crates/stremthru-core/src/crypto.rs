//! Password-keyed payload encryption for proxy-link tokens.
//!
//! AES-256-GCM with the key derived as SHA-256 of the password and a random
//! 96-bit nonce prepended to the ciphertext. The on-wire form is base64 of
//! `nonce || ciphertext`.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};
use crate::util::{base64_decode_bytes, base64_encode_bytes};

/// Discriminator recorded in token payloads for this scheme.
pub const ENCRYPTION_FORMAT: &str = "aes";

const NONCE_LEN: usize = 12;

fn cipher_for(password: &str) -> StoreResult<Aes256Gcm> {
    let key = Sha256::digest(password.as_bytes());
    Aes256Gcm::new_from_slice(&key)
        .map_err(|_| StoreError::internal("failed to derive encryption key"))
}

/// Encrypt `plaintext` under `password`.
///
/// # Errors
///
/// Returns an internal error when the cipher rejects the derived key.
pub fn encrypt(password: &str, plaintext: &str) -> StoreResult<String> {
    let cipher = cipher_for(password)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| StoreError::internal("encryption failed"))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(base64_encode_bytes(&blob))
}

/// Decrypt a blob produced by [`encrypt`] with the same password.
///
/// # Errors
///
/// Returns `unauthorized` when the password does not match (authentication
/// tag failure) and `bad_request` for malformed blobs.
pub fn decrypt(password: &str, encoded: &str) -> StoreResult<String> {
    let blob = base64_decode_bytes(encoded)?;
    if blob.len() <= NONCE_LEN {
        return Err(StoreError::bad_request("encrypted payload too short"));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = cipher_for(password)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StoreError::unauthorized("failed to decrypt payload"))?;
    String::from_utf8(plaintext).map_err(|_| StoreError::bad_request("decrypted payload not utf-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_same_password() {
        let blob = encrypt("s3cret", "https://example.com/file.mkv\nRange: bytes=0-").unwrap();
        let plain = decrypt("s3cret", &blob).unwrap();
        assert_eq!(plain, "https://example.com/file.mkv\nRange: bytes=0-");
    }

    #[test]
    fn wrong_password_is_unauthorized() {
        let blob = encrypt("right", "payload").unwrap();
        let err = decrypt("wrong", &blob).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::Unauthorized);
    }

    #[test]
    fn nonces_differ_between_calls() {
        let a = encrypt("pw", "same").unwrap();
        let b = encrypt("pw", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        assert!(decrypt("pw", "AAAA").is_err());
    }
}
