//! Key derivation: generic HKDF-SHA256 plumbing plus the domain-separated
//! chain KDFs used by the X3DH and Double Ratchet layers.
//!
//! Every derivation here is HKDF-SHA256 keyed on an ASCII `salt` and
//! `info` pair fixed by the protocol (never caller-supplied), so the
//! same input key material can never be reinterpreted across contexts.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};

/// Expand `ikm` into `output.len()` bytes via HKDF-SHA256(salt, ikm, info).
pub fn hkdf_expand(ikm: &[u8], salt: &[u8], info: &[u8], output: &mut [u8]) -> CryptoResult<()> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// X3DH root-key derivation: `HKDF(ikm=DH1..DH4, salt="x3dh-salt", info="x3dh-root", L=32)`.
pub fn x3dh_root(dh_concat: &[u8]) -> CryptoResult<[u8; 32]> {
    let mut rk = [0u8; 32];
    hkdf_expand(dh_concat, b"x3dh-salt", b"x3dh-root", &mut rk)?;
    Ok(rk)
}

/// `KDF_RK`: root-key ratchet step. `ikm = rk || dh`, `salt="dr-rk"`,
/// `info="root"`, `L=64`, split into `(new_rk, chain_key_seed)`.
pub fn kdf_rk(rk: &[u8; 32], dh: &[u8; 32]) -> CryptoResult<([u8; 32], [u8; 32])> {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(rk);
    ikm[32..].copy_from_slice(dh);

    let mut out = [0u8; 64];
    hkdf_expand(&ikm, b"dr-rk", b"root", &mut out)?;

    let mut new_rk = [0u8; 32];
    let mut ck = [0u8; 32];
    new_rk.copy_from_slice(&out[..32]);
    ck.copy_from_slice(&out[32..]);
    Ok((new_rk, ck))
}

/// `KDF_CK`: symmetric chain step. `ikm = ck`, `salt="dr-ck"`,
/// `info="chain"`, `L=64`, split into `(message_key, next_chain_key)`.
pub fn kdf_ck(ck: &[u8; 32]) -> CryptoResult<([u8; 32], [u8; 32])> {
    let mut out = [0u8; 64];
    hkdf_expand(ck, b"dr-ck", b"chain", &mut out)?;

    let mut mk = [0u8; 32];
    let mut next_ck = [0u8; 32];
    mk.copy_from_slice(&out[..32]);
    next_ck.copy_from_slice(&out[32..]);
    Ok((mk, next_ck))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_ck_is_deterministic_and_advances() {
        let ck = [1u8; 32];
        let (mk1, ck1) = kdf_ck(&ck).unwrap();
        let (mk1_again, ck1_again) = kdf_ck(&ck).unwrap();
        assert_eq!(mk1, mk1_again);
        assert_eq!(ck1, ck1_again);
        assert_ne!(ck1, ck);

        let (mk2, _ck2) = kdf_ck(&ck1).unwrap();
        assert_ne!(mk1, mk2);
    }

    #[test]
    fn kdf_rk_mixes_dh_output() {
        let rk = [2u8; 32];
        let (rk_a, ck_a) = kdf_rk(&rk, &[3u8; 32]).unwrap();
        let (rk_b, ck_b) = kdf_rk(&rk, &[4u8; 32]).unwrap();
        assert_ne!(rk_a, rk_b);
        assert_ne!(ck_a, ck_b);
    }
}
