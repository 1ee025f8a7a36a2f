//! Password -> master-key wrap/unwrap.
//!
//! The account-scoped master key (MK) is 32 random bytes, never
//! persisted in the clear. At rest it is wrapped under a key-encryption
//! key (KEK) derived from the user's password via Argon2id. The wrap
//! envelope carries its own KDF parameters so they can be tightened
//! later without invalidating older envelopes.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Argon2id tuning knobs. Defaults match an interactive unlock profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArgonParams {
    /// Memory cost in MiB.
    pub m: u32,
    /// Iteration count.
    pub t: u32,
    /// Parallelism (lanes).
    pub p: u32,
}

impl Default for ArgonParams {
    fn default() -> Self {
        Self { m: 64, t: 3, p: 1 }
    }
}

/// Wrapped master-key envelope, as persisted at rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkEnvelope {
    pub v: u8,
    pub kdf: String,
    pub m: u32,
    pub t: u32,
    pub p: u32,
    pub salt_b64: String,
    pub iv_b64: String,
    pub ct_b64: String,
}

/// The 32-byte account master key, zeroized on drop. Held by the
/// caller's single-holder cell between unlock and logout; never read
/// from an ambient global inside this crate.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey(pub [u8; 32]);

fn derive_kek(password: &[u8], salt: &[u8; 16], params: ArgonParams) -> CryptoResult<[u8; 32]> {
    let argon_params = Params::new(params.m * 1024, params.t, params.p, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut kek = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut kek)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(kek)
}

/// Wrap `mk` under a password-derived KEK using fresh salt/iv.
pub fn wrap_mk(password: &[u8], mk: &[u8; 32], params: ArgonParams) -> CryptoResult<MkEnvelope> {
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut kek = derive_kek(password, &salt, params)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&kek));
    let nonce = Nonce::from_slice(&iv);
    let ct = cipher
        .encrypt(nonce, Payload { msg: mk.as_slice(), aad: &[] })
        .map_err(|_| CryptoError::AeadAuthFail)?;
    kek.zeroize();

    Ok(MkEnvelope {
        v: 1,
        kdf: "argon2id".to_string(),
        m: params.m,
        t: params.t,
        p: params.p,
        salt_b64: STANDARD.encode(salt),
        iv_b64: STANDARD.encode(iv),
        ct_b64: STANDARD.encode(ct),
    })
}

/// Unwrap `envelope` with `password`. Returns `None` on any failure —
/// wrong password and a corrupt envelope are indistinguishable to the
/// caller and to the server by design.
pub fn unwrap_mk(password: &[u8], envelope: &MkEnvelope) -> Option<MasterKey> {
    if envelope.v != 1 || envelope.kdf != "argon2id" {
        return None;
    }
    let salt: [u8; 16] = STANDARD.decode(&envelope.salt_b64).ok()?.try_into().ok()?;
    let iv: [u8; 12] = STANDARD.decode(&envelope.iv_b64).ok()?.try_into().ok()?;
    let ct = STANDARD.decode(&envelope.ct_b64).ok()?;

    let mut kek = derive_kek(
        password,
        &salt,
        ArgonParams { m: envelope.m, t: envelope.t, p: envelope.p },
    )
    .ok()?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&kek));
    let nonce = Nonce::from_slice(&iv);
    let plain = cipher.decrypt(nonce, Payload { msg: &ct, aad: &[] }).ok()?;
    kek.zeroize();

    let mk: [u8; 32] = plain.try_into().ok()?;
    Some(MasterKey(mk))
}

/// Generate a fresh random 32-byte master key.
pub fn generate_mk() -> [u8; 32] {
    let mut mk = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut mk);
    mk
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap params for fast tests; production code always uses ArgonParams::default().
    fn fast_params() -> ArgonParams {
        ArgonParams { m: 8, t: 1, p: 1 }
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let mk = generate_mk();
        let env = wrap_mk(b"correct horse battery staple", &mk, fast_params()).unwrap();
        let unwrapped = unwrap_mk(b"correct horse battery staple", &env).unwrap();
        assert_eq!(unwrapped.0, mk);
    }

    #[test]
    fn wrong_password_returns_none() {
        let mk = generate_mk();
        let env = wrap_mk(b"correct horse battery staple", &mk, fast_params()).unwrap();
        assert!(unwrap_mk(b"wrong password", &env).is_none());
    }

    #[test]
    fn fresh_iv_each_wrap_same_mk_different_ciphertext() {
        let mk = generate_mk();
        let env1 = wrap_mk(b"pw", &mk, fast_params()).unwrap();
        let env2 = wrap_mk(b"pw", &mk, fast_params()).unwrap();
        assert_ne!(env1.ct_b64, env2.ct_b64);
        assert_eq!(unwrap_mk(b"pw", &env1).unwrap().0, unwrap_mk(b"pw", &env2).unwrap().0);
    }

    #[test]
    fn malformed_envelope_returns_none() {
        let mut env = wrap_mk(b"pw", &generate_mk(), fast_params()).unwrap();
        env.salt_b64 = "not base64!!".to_string();
        assert!(unwrap_mk(b"pw", &env).is_none());
    }

    #[test]
    fn invalid_argon_params_are_rejected_not_panicked() {
        let mk = generate_mk();
        let err = wrap_mk(b"pw", &mk, ArgonParams { m: 0, t: 0, p: 0 }).unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }
}
