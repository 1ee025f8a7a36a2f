//! AEAD envelope primitives.
//!
//! One key per call: every `encrypt`/`wrap_json` draws a fresh 16-byte
//! salt and 12-byte IV from the OS CSPRNG and derives a per-call
//! AES-256 key via HKDF-SHA256, keyed on the caller's `info_tag`. A
//! compromised envelope never amplifies to a second one, and
//! `info_tag` domain-separates derived keys across unrelated contexts
//! (a `snapshot/v1` key cannot decrypt a `devkeys/v1` envelope even
//! under the same master key).
//!
//! Wire format: `{v:1, aead:"aes-256-gcm", info, salt_b64, iv_b64, ct_b64}`.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};

const SALT_LEN: usize = 16;
const IV_LEN: usize = 12;

/// Closed whitelist of domain-separation tags. Unknown tags are
/// rejected before any key derivation runs.
pub const INFO_TAG_WHITELIST: &[&str] = &[
    "blob/v1",
    "media/v1",
    "media/chunk-v1",
    "media/manifest-v1",
    "profile/v1",
    "settings/v1",
    "snapshot/v1",
    "contact-secrets/backup/v1",
    "devkeys/v1",
    "contact/v1",
    "message-key/v1",
];

pub fn is_known_info_tag(tag: &str) -> bool {
    INFO_TAG_WHITELIST.contains(&tag)
}

fn check_info_tag(tag: &str) -> CryptoResult<()> {
    if is_known_info_tag(tag) {
        Ok(())
    } else {
        Err(CryptoError::InvalidInfoTag(tag.to_string()))
    }
}

/// Self-describing AEAD envelope, at rest and on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u8,
    pub aead: String,
    pub info: String,
    pub salt_b64: String,
    pub iv_b64: String,
    pub ct_b64: String,
}

/// HKDF-SHA256(salt, ikm=mk, info=info_tag) -> 32-byte AES-256 key.
pub fn derive_aead_key(mk: &[u8; 32], salt: &[u8; SALT_LEN], info_tag: &str) -> CryptoResult<[u8; 32]> {
    check_info_tag(info_tag)?;
    let hk = Hkdf::<Sha256>::new(Some(salt), mk);
    let mut key = [0u8; 32];
    hk.expand(info_tag.as_bytes(), &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plain` under `mk`, returning the ciphertext plus the fresh
/// IV and salt the caller must persist alongside it.
pub fn encrypt(
    plain: &[u8],
    mk: &[u8; 32],
    info_tag: &str,
) -> CryptoResult<(Vec<u8>, [u8; IV_LEN], [u8; SALT_LEN])> {
    check_info_tag(info_tag)?;

    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let key = derive_aead_key(mk, &salt, info_tag)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(&iv);
    let ct = cipher
        .encrypt(nonce, Payload { msg: plain, aad: &[] })
        .map_err(|_| CryptoError::AeadAuthFail)?;

    Ok((ct, iv, salt))
}

/// Inverse of `encrypt`. Fails with `AeadAuthFail` on tag mismatch.
pub fn decrypt(
    cipher_bytes: &[u8],
    mk: &[u8; 32],
    salt: &[u8; SALT_LEN],
    iv: &[u8; IV_LEN],
    info_tag: &str,
) -> CryptoResult<Vec<u8>> {
    check_info_tag(info_tag)?;
    let key = derive_aead_key(mk, salt, info_tag)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(nonce, Payload { msg: cipher_bytes, aad: &[] })
        .map_err(|_| CryptoError::AeadAuthFail)
}

/// Encrypt `plain` directly under `key` (no HKDF sub-derivation) with a
/// caller-supplied IV. Used by the ratchet engine, where the message
/// key produced by `kdf_ck` already *is* the AES-256-GCM key.
pub fn encrypt_raw(plain: &[u8], key: &[u8; 32], iv: &[u8; IV_LEN]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .encrypt(nonce, Payload { msg: plain, aad: &[] })
        .map_err(|_| CryptoError::AeadAuthFail)
}

/// Inverse of [`encrypt_raw`].
pub fn decrypt_raw(cipher_bytes: &[u8], key: &[u8; 32], iv: &[u8; IV_LEN]) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(nonce, Payload { msg: cipher_bytes, aad: &[] })
        .map_err(|_| CryptoError::AeadAuthFail)
}

fn b64_field(s: &str, field: &str) -> CryptoResult<Vec<u8>> {
    if s.is_empty() {
        return Err(CryptoError::EnvelopeMalformed(format!("{field} is empty")));
    }
    STANDARD
        .decode(s)
        .map_err(|_| CryptoError::EnvelopeMalformed(format!("{field} is not valid base64")))
}

fn fixed<const N: usize>(bytes: Vec<u8>, field: &str) -> CryptoResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::EnvelopeMalformed(format!("{field} expected {N} bytes, got {}", v.len())))
}

/// Serialize `obj` to JSON, encrypt it, and produce a self-describing envelope.
pub fn wrap_json<T: Serialize>(obj: &T, mk: &[u8; 32], info_tag: &str) -> CryptoResult<Envelope> {
    let plain = serde_json::to_vec(obj)?;
    let (ct, iv, salt) = encrypt(&plain, mk, info_tag)?;
    Ok(Envelope {
        v: 1,
        aead: "aes-256-gcm".to_string(),
        info: info_tag.to_string(),
        salt_b64: STANDARD.encode(salt),
        iv_b64: STANDARD.encode(iv),
        ct_b64: STANDARD.encode(ct),
    })
}

/// Validate, decrypt, and deserialize an envelope produced by `wrap_json`.
pub fn unwrap_json<T: DeserializeOwned>(envelope: &Envelope, mk: &[u8; 32]) -> CryptoResult<T> {
    if envelope.v != 1 {
        return Err(CryptoError::EnvelopeMalformed(format!("unsupported envelope version {}", envelope.v)));
    }
    if envelope.aead != "aes-256-gcm" {
        return Err(CryptoError::EnvelopeMalformed(format!("unsupported aead {}", envelope.aead)));
    }
    check_info_tag(&envelope.info)?;

    let salt = fixed::<SALT_LEN>(b64_field(&envelope.salt_b64, "salt_b64")?, "salt_b64")?;
    let iv = fixed::<IV_LEN>(b64_field(&envelope.iv_b64, "iv_b64")?, "iv_b64")?;
    let ct = b64_field(&envelope.ct_b64, "ct_b64")?;

    let plain = decrypt(&ct, mk, &salt, &iv, &envelope.info)?;
    Ok(serde_json::from_slice(&plain)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mk() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn roundtrip() {
        let obj = json!({"hello": "world", "n": 42});
        let env = wrap_json(&obj, &mk(), "blob/v1").unwrap();
        let back: serde_json::Value = unwrap_json(&env, &mk()).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn rejects_unknown_info_tag() {
        let obj = json!({"a": 1});
        let err = wrap_json(&obj, &mk(), "forbidden/v1").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidInfoTag(_)));
    }

    #[test]
    fn domain_separation_prevents_cross_tag_decrypt() {
        let obj = json!({"a": 1});
        let mut env = wrap_json(&obj, &mk(), "blob/v1").unwrap();
        env.info = "media/v1".to_string();
        let result: CryptoResult<serde_json::Value> = unwrap_json(&env, &mk());
        assert!(result.is_err());
    }

    #[test]
    fn tamper_detected() {
        let obj = json!({"a": 1});
        let mut env = wrap_json(&obj, &mk(), "blob/v1").unwrap();
        let mut ct = STANDARD.decode(&env.ct_b64).unwrap();
        ct[0] ^= 0xFF;
        env.ct_b64 = STANDARD.encode(ct);
        let result: CryptoResult<serde_json::Value> = unwrap_json(&env, &mk());
        assert!(matches!(result, Err(CryptoError::AeadAuthFail)));
    }

    #[test]
    fn missing_fields_rejected_without_decrypting() {
        let env = Envelope {
            v: 1,
            aead: "aes-256-gcm".to_string(),
            info: "blob/v1".to_string(),
            salt_b64: String::new(),
            iv_b64: STANDARD.encode([0u8; IV_LEN]),
            ct_b64: STANDARD.encode([0u8; 16]),
        };
        let result: CryptoResult<serde_json::Value> = unwrap_json(&env, &mk());
        assert!(matches!(result, Err(CryptoError::EnvelopeMalformed(_))));
    }
}
