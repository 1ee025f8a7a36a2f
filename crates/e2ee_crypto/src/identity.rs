//! Long-term identity keys.
//!
//! Each device holds exactly one `IdentityKeyPair` (Ed25519), created once
//! and never rotated. Its public half doubles as an X25519 operand during
//! X3DH via the birational conversion in [`crate::x3dh`].

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::ZeroizeOnDrop;

use crate::error::{CryptoError, CryptoResult};

/// A 32-byte Ed25519 or X25519 public key, base64-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyBytes(pub [u8; 32]);

impl PublicKeyBytes {
    pub fn to_b64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> CryptoResult<Self> {
        let bytes = STANDARD.decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self(arr))
    }

    /// Human-verifiable fingerprint: SHA-256 of the key, truncated to 20
    /// bytes and hex-grouped in fours. Not a verification ceremony by
    /// itself — that UI is out of scope — just the stable primitive one
    /// would be built on.
    pub fn fingerprint(&self) -> String {
        let hash = Sha256::digest(self.0);
        hex::encode(&hash[..20])
            .as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Per-party half of a Signal-style numeric safety-number: 5200
    /// rounds of SHA-512 over (version || public key), rendered as 12
    /// groups of 5 decimal digits (60 digits total). Combined with the
    /// peer's half in [`numeric_safety_number`] for display.
    fn numeric_fingerprint_rounds(&self) -> [u8; 30] {
        const ROUNDS: usize = 5200;
        let mut digest = [0u8; 64];
        let mut input = Vec::with_capacity(33);
        input.push(0u8); // version byte
        input.extend_from_slice(&self.0);
        digest.copy_from_slice(&Sha512::digest(&input)[..]);
        for _ in 1..ROUNDS {
            let mut next_input = Vec::with_capacity(64 + 32);
            next_input.extend_from_slice(&digest);
            next_input.extend_from_slice(&self.0);
            digest.copy_from_slice(&Sha512::digest(&next_input)[..]);
        }
        let mut out = [0u8; 30];
        out.copy_from_slice(&digest[..30]);
        out
    }

    fn numeric_fingerprint_digits(&self) -> String {
        let bytes = self.numeric_fingerprint_rounds();
        bytes
            .chunks(5)
            .map(|chunk| {
                let mut n: u64 = 0;
                for &b in chunk {
                    n = (n << 8) | b as u64;
                }
                // 5 bytes -> a 5-digit decimal group, modulo 10^5.
                format!("{:05}", n % 100_000)
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Signal-style 60-digit numeric safety number for a pair of identity
/// keys: each side's 60-digit half is computed independently and the
/// two are concatenated in a canonical (lexicographically smallest
/// first) order, so both parties compute the same combined number
/// regardless of who is "self" and who is "peer". Exposed for a future
/// key-verification UI to consume; this crate performs no ceremony of
/// its own.
pub fn numeric_safety_number(a: &PublicKeyBytes, b: &PublicKeyBytes) -> String {
    let fa = a.numeric_fingerprint_digits();
    let fb = b.numeric_fingerprint_digits();
    if fa <= fb {
        format!("{fa}{fb}")
    } else {
        format!("{fb}{fa}")
    }
}

/// Long-term identity signing keypair. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    pub public: PublicKeyBytes,
    secret_bytes: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes());
        Self { public, secret_bytes: signing_key.to_bytes() }
    }

    pub fn from_secret_bytes(secret_bytes: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        let public = PublicKeyBytes(signing_key.verifying_key().to_bytes());
        Self { public, secret_bytes }
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret_bytes
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_bytes)
    }

    /// Detached 64-byte Ed25519 signature over `msg`.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key().sign(msg).to_bytes()
    }

    /// Verify a signature made by any Ed25519 public key.
    pub fn verify(public: &[u8; 32], msg: &[u8], sig: &[u8; 64]) -> CryptoResult<()> {
        let vk = VerifyingKey::from_bytes(public).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_bytes(sig);
        vk.verify(msg, &sig).map_err(|_| CryptoError::X3dhSignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let id = IdentityKeyPair::generate();
        let sig = id.sign(b"signed prekey bytes");
        IdentityKeyPair::verify(&id.public.0, b"signed prekey bytes", &sig).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let id = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        let sig = id.sign(b"payload");
        let err = IdentityKeyPair::verify(&other.public.0, b"payload", &sig).unwrap_err();
        assert!(matches!(err, CryptoError::X3dhSignatureInvalid));
    }

    #[test]
    fn b64_roundtrip() {
        let id = IdentityKeyPair::generate();
        let back = PublicKeyBytes::from_b64(&id.public.to_b64()).unwrap();
        assert_eq!(back, id.public);
    }

    #[test]
    fn fingerprint_is_stable_and_differs_across_keys() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        assert_eq!(a.public.fingerprint(), a.public.fingerprint());
        assert_ne!(a.public.fingerprint(), b.public.fingerprint());
    }

    #[test]
    fn numeric_safety_number_is_symmetric_and_60_digits() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        let ab = numeric_safety_number(&a.public, &b.public);
        let ba = numeric_safety_number(&b.public, &a.public);
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 60);
        assert!(ab.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn numeric_safety_number_differs_across_key_pairs() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        let c = IdentityKeyPair::generate();
        assert_ne!(numeric_safety_number(&a.public, &b.public), numeric_safety_number(&a.public, &c.public));
    }
}
