//! X3DH handshake: the asynchronous key agreement that seeds a Double
//! Ratchet session from a published prekey bundle.
//!
//! References: the Signal X3DH spec, RFC 7748 (X25519), RFC 5869 (HKDF).
//! The identity key is Ed25519; its X25519 projection is computed via
//! the birational map used throughout the Signal-derived ecosystem
//! (clamped SHA-512 expansion for the private half, Edwards→Montgomery
//! for the public half).

use base64::{engine::general_purpose::STANDARD, Engine};
use curve25519_dalek::edwards::CompressedEdwardsY;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use crate::prekey::{DevicePrivateBundle, PublishedBundle};

fn b64d32(s: &str) -> CryptoResult<[u8; 32]> {
    STANDARD
        .decode(s)?
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))
}

/// Ed25519 signing-key bytes -> X25519 static secret, via clamped SHA-512
/// expansion (RFC 7748 §5 clamping applied to the digest's low half).
pub fn ed25519_secret_to_x25519(ed_secret: &[u8; 32]) -> StaticSecret {
    let mut h = Sha512::digest(ed_secret);
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.zeroize();
    StaticSecret::from(key)
}

/// Ed25519 verifying-key bytes -> X25519 public key, via the Edwards to
/// Montgomery birational map.
pub fn ed25519_pub_to_x25519(ed_pub: &[u8; 32]) -> CryptoResult<X25519Public> {
    let compressed = CompressedEdwardsY(*ed_pub);
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("Ed25519 public key decompression failed".into()))?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}

/// What the initiator sends alongside the first ciphertext so the
/// responder can reconstruct the same root key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X3dhInitHeader {
    pub ik_pub_b64: String,
    pub ek_pub_b64: String,
    pub opk_id: Option<u64>,
}

/// The material the initiator feeds into a freshly minted DR session:
/// root key plus the ratchet keypair it will use until the first
/// direction switch.
pub struct InitiatorMaterial {
    pub rk: [u8; 32],
    pub my_ratchet_priv: StaticSecret,
    pub my_ratchet_pub: X25519Public,
    pub header: X3dhInitHeader,
}

/// The material the responder feeds into a freshly minted DR session.
/// Unlike the initiator, the responder can derive an initial send chain
/// immediately (`ck_s_seed`), since it already knows `theirRatchetPub`.
pub struct ResponderMaterial {
    pub rk: [u8; 32],
    pub ck_s_seed: [u8; 32],
    pub their_ratchet_pub: X25519Public,
    pub my_ratchet_priv: StaticSecret,
    pub my_ratchet_pub: X25519Public,
}

fn concat_dh(parts: &[&[u8; 32]]) -> Vec<u8> {
    let mut ikm = Vec::with_capacity(32 * parts.len());
    for p in parts {
        ikm.extend_from_slice(p.as_slice());
    }
    ikm
}

/// Verify `peer.spk_sig_b64` against `peer.ik_pub_b64`, then run the
/// initiator side of X3DH: `DH1..DH4?` -> `rk`. A present `opk_pub_b64`
/// on the bundle is folded in as `DH4`; its absence is a normal,
/// non-fatal path (see responder OPK degradation).
pub fn initiate(my_bundle: &DevicePrivateBundle, peer: &PublishedBundle) -> CryptoResult<InitiatorMaterial> {
    let peer_ik_ed = b64d32(&peer.ik_pub_b64)?;
    let peer_spk = X25519Public::from(b64d32(&peer.spk_pub_b64)?);
    let peer_spk_sig: [u8; 64] = STANDARD
        .decode(&peer.spk_sig_b64)?
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("sig expected 64 bytes, got {}", v.len())))?;

    crate::identity::IdentityKeyPair::verify(&peer_ik_ed, peer_spk.as_bytes(), &peer_spk_sig)?;

    let my_ik_x = ed25519_secret_to_x25519(my_bundle.ik.secret_bytes());
    let peer_ik_x = ed25519_pub_to_x25519(&peer_ik_ed)?;

    let ek_priv = StaticSecret::random_from_rng(OsRng);
    let ek_pub = X25519Public::from(&ek_priv);

    let dh1 = my_ik_x.diffie_hellman(&peer_spk);
    let dh2 = ek_priv.diffie_hellman(&peer_ik_x);
    let dh3 = ek_priv.diffie_hellman(&peer_spk);

    let mut ikm = concat_dh(&[dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()]);
    if let Some(ref opk_b64) = peer.opk_pub_b64 {
        let opk_pub = X25519Public::from(b64d32(opk_b64)?);
        let dh4 = ek_priv.diffie_hellman(&opk_pub);
        ikm.extend_from_slice(dh4.as_bytes());
    }

    let rk = kdf::x3dh_root(&ikm)?;
    ikm.zeroize();

    Ok(InitiatorMaterial {
        rk,
        header: X3dhInitHeader {
            ik_pub_b64: my_bundle.ik.public.to_b64(),
            ek_pub_b64: STANDARD.encode(ek_pub.as_bytes()),
            opk_id: peer.opk_id,
        },
        my_ratchet_priv: ek_priv,
        my_ratchet_pub: ek_pub,
    })
}

/// Responder side of X3DH. Mirrors the initiator's DH operands (DH is
/// commutative) and, when `header.opk_id` names a still-available OPK,
/// consumes it for `DH4`. A consumed or never-issued id degrades
/// gracefully: the handshake proceeds without `DH4` rather than failing,
/// per the open question on OPK id reconciliation.
///
/// The responder's initial send chain is seeded through a DH ratchet
/// step against the initiator's ephemeral key, not `kdf_ck(rk)` directly:
/// `kdf_rk(rk, DH(my_ratchet_priv, EK_pub))`. This is the same DH the
/// initiator will compute (commutatively) the first time it receives a
/// reply and runs its own DH-rotation subroutine, so the two sides land
/// on the same chain key. Seeding from `kdf_ck(rk)` instead would leave
/// the initiator unable to decrypt the responder's first message, since
/// `rotate_receive` never derives a chain key that way.
pub fn respond(my_bundle: &mut DevicePrivateBundle, header: &X3dhInitHeader) -> CryptoResult<ResponderMaterial> {
    let sender_ik_ed = b64d32(&header.ik_pub_b64)?;
    let ek_pub = X25519Public::from(b64d32(&header.ek_pub_b64)?);

    let sender_ik_x = ed25519_pub_to_x25519(&sender_ik_ed)?;
    let my_ik_x = ed25519_secret_to_x25519(my_bundle.ik.secret_bytes());

    let dh1 = my_bundle.spk_priv().diffie_hellman(&sender_ik_x);
    let dh2 = my_ik_x.diffie_hellman(&ek_pub);
    let dh3 = my_bundle.spk_priv().diffie_hellman(&ek_pub);

    let mut ikm = concat_dh(&[dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes()]);
    if let Some(id) = header.opk_id {
        if let Some(opk_priv) = my_bundle.consume_opk(id) {
            let dh4 = opk_priv.diffie_hellman(&ek_pub);
            ikm.extend_from_slice(dh4.as_bytes());
        }
    }

    let root_rk = kdf::x3dh_root(&ikm)?;
    ikm.zeroize();

    let my_ratchet_priv = StaticSecret::random_from_rng(OsRng);
    let my_ratchet_pub = X25519Public::from(&my_ratchet_priv);
    let dh = my_ratchet_priv.diffie_hellman(&ek_pub);
    let (rk, ck_s_seed) = kdf::kdf_rk(&root_rk, dh.as_bytes())?;

    Ok(ResponderMaterial {
        rk,
        ck_s_seed,
        their_ratchet_pub: ek_pub,
        my_ratchet_priv,
        my_ratchet_pub,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The initiator's bare X3DH root (`init.rk`) and the responder's
    /// post-ratchet root (`resp.rk`) are deliberately different values —
    /// the responder rotates once during `respond` to seed its send
    /// chain. The shared-secret property that actually matters is that
    /// `DrState::from_responder`'s first message decrypts at a
    /// `DrState::from_initiator` built from the same handshake; that is
    /// exercised end-to-end in `crate::ratchet`'s tests. Here we only
    /// check the OPK bookkeeping.
    #[test]
    fn initiator_and_responder_consume_opk_exactly_once() {
        let mut bob = DevicePrivateBundle::generate_initial("bob", 0, 1);
        let alice = DevicePrivateBundle::generate_initial("alice", 0, 0);

        let bob_published = bob.published(Some(0));
        let init = initiate(&alice, &bob_published).unwrap();
        let _resp = respond(&mut bob, &init.header).unwrap();

        assert_eq!(bob.opk_count(), 0, "OPK must be consumed exactly once");
    }

    #[test]
    fn handshake_degrades_gracefully_without_opk() {
        let mut bob = DevicePrivateBundle::generate_initial("bob", 0, 0);
        let alice = DevicePrivateBundle::generate_initial("alice", 0, 0);

        let bob_published = bob.published(None);
        let init = initiate(&alice, &bob_published).unwrap();
        let resp = respond(&mut bob, &init.header).unwrap();

        // No DH4 on either side, but the responder's ratchet step must
        // still land on the chain key the initiator's first
        // `rotate_receive` will derive.
        let dh = init.my_ratchet_priv.diffie_hellman(&resp.my_ratchet_pub);
        let (_rk, ck) = kdf::kdf_rk(&init.rk, dh.as_bytes()).unwrap();
        assert_eq!(ck, resp.ck_s_seed);
    }

    #[test]
    fn rejects_forged_spk_signature() {
        let bob = DevicePrivateBundle::generate_initial("bob", 0, 0);
        let alice = DevicePrivateBundle::generate_initial("alice", 0, 0);
        let mut forged = bob.published(None);
        let evil = DevicePrivateBundle::generate_initial("evil", 0, 0);
        forged.spk_sig_b64 = STANDARD.encode(evil.ik.sign(
            &STANDARD.decode(&forged.spk_pub_b64).unwrap(),
        ));

        let err = initiate(&alice, &forged).unwrap_err();
        assert!(matches!(err, CryptoError::X3dhSignatureInvalid));
    }

    #[test]
    fn responder_reuses_opk_id_is_a_noop_not_a_double_dh4() {
        let mut bob = DevicePrivateBundle::generate_initial("bob", 0, 1);
        let alice = DevicePrivateBundle::generate_initial("alice", 0, 0);
        let bob_published = bob.published(Some(0));
        let init = initiate(&alice, &bob_published).unwrap();

        let first = respond(&mut bob, &init.header).unwrap();
        let second = respond(&mut bob, &init.header).unwrap();
        assert_ne!(first.rk, second.rk, "second response no longer has DH4 available");
    }
}
