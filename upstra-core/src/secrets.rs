//! Secret vault (C1): symmetric decrypt/encrypt of credentials at rest.
//!
//! AES-256-GCM with a key derived via scrypt from an environment-provided
//! master key. Wire format is `iv(16) || tag(16) || ciphertext`,
//! base64-encoded — this is the format the plan documents and the event
//! log's encrypted BMC-password fields both use; it is not the default
//! layout the `aes-gcm` crate's own nonce convention assumes (12-byte
//! nonce, tag appended to ciphertext), so the nonce size is pinned to 16
//! bytes explicitly and the tag is split out by hand.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};

use upstra_common::{Error, Result};

type Aes256Gcm16 = AesGcm<Aes256, aes_gcm::aead::consts::U16>;

const SCRYPT_SALT: &[u8] = b"salt";
const SCRYPT_LOG_N: u8 = 14; // N = 16384 = 2^14
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// Derives the AES-256 key from the master passphrase the same way the
/// at-rest BMC/controller passwords were encrypted upstream: scrypt with
/// a fixed literal salt and fixed cost parameters.
fn derive_key(master: &str) -> Result<[u8; KEY_LEN]> {
    let params = ScryptParams::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| Error::Decryption(format!("invalid scrypt params: {e}")))?;
    let mut key = [0u8; KEY_LEN];
    scrypt(master.as_bytes(), SCRYPT_SALT, &params, &mut key)
        .map_err(|e| Error::Decryption(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// Decrypts a base64(iv || tag || ciphertext) string using the given
/// master key.
pub fn decrypt(master: &str, ciphertext_b64: &str) -> Result<String> {
    let key = derive_key(master)?;
    let combined = BASE64
        .decode(ciphertext_b64.trim())
        .map_err(|e| Error::Decryption(format!("invalid base64: {e}")))?;

    if combined.len() < IV_LEN + TAG_LEN {
        return Err(Error::Decryption("ciphertext too short".to_string()));
    }

    let iv = &combined[..IV_LEN];
    let tag = &combined[IV_LEN..IV_LEN + TAG_LEN];
    let ciphertext = &combined[IV_LEN + TAG_LEN..];

    // aes-gcm expects tag appended after ciphertext.
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);

    let cipher = Aes256Gcm16::new(GenericArray::from_slice(&key));
    let nonce = GenericArray::from_slice(iv);
    let plaintext = cipher
        .decrypt(nonce, Payload { msg: &sealed, aad: b"" })
        .map_err(|_| Error::Decryption("authentication failed".to_string()))?;

    String::from_utf8(plaintext).map_err(|e| Error::Decryption(format!("invalid utf-8: {e}")))
}

/// Encrypts `plaintext` into the same base64(iv || tag || ciphertext)
/// wire format `decrypt` consumes.
pub fn encrypt(master: &str, plaintext: &str) -> Result<String> {
    let key = derive_key(master)?;
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256Gcm16::new(GenericArray::from_slice(&key));
    let nonce = GenericArray::from_slice(&iv);
    let sealed = cipher
        .encrypt(nonce, Payload { msg: plaintext.as_bytes(), aad: b"" })
        .map_err(|e| Error::Decryption(format!("encryption failed: {e}")))?;

    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut combined = Vec::with_capacity(IV_LEN + TAG_LEN + ciphertext.len());
    combined.extend_from_slice(&iv);
    combined.extend_from_slice(tag);
    combined.extend_from_slice(ciphertext);

    Ok(BASE64.encode(combined))
}

/// Reads the master key from `ENCRYPTION_KEY`.
pub fn master_key_from_env() -> Result<String> {
    std::env::var("ENCRYPTION_KEY")
        .map_err(|_| Error::Configuration("ENCRYPTION_KEY is not set".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "correct-horse-battery-staple";

    #[test]
    fn roundtrip_recovers_plaintext() {
        let ct = encrypt(MASTER, "s3cr3t-bmc-password").unwrap();
        let pt = decrypt(MASTER, &ct).unwrap();
        assert_eq!(pt, "s3cr3t-bmc-password");
    }

    #[test]
    fn ciphertexts_differ_across_calls() {
        let a = encrypt(MASTER, "same input").unwrap();
        let b = encrypt(MASTER, "same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let ct = encrypt(MASTER, "payload").unwrap();
        let mut raw = BASE64.decode(&ct).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);
        assert!(decrypt(MASTER, &tampered).is_err());
    }

    #[test]
    fn wrong_master_key_fails_to_decrypt() {
        let ct = encrypt(MASTER, "payload").unwrap();
        assert!(decrypt("wrong-key", &ct).is_err());
    }

    #[test]
    fn wire_format_has_iv_tag_ciphertext_layout() {
        let ct = encrypt(MASTER, "x").unwrap();
        let raw = BASE64.decode(&ct).unwrap();
        // iv(16) + tag(16) + ciphertext(>=1)
        assert!(raw.len() >= IV_LEN + TAG_LEN + 1);
    }
}
