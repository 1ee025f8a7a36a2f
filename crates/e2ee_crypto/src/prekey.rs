//! Prekey bundle manager.
//!
//! Owns the per-device secret material beyond the identity key: the
//! signed prekey (SPK) and the one-time prekey (OPK) pool. The device's
//! full private bundle is only ever persisted as an AEAD envelope under
//! the master key (`devkeys/v1`); the published half is the plaintext
//! DTO handed to peers for X3DH.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::aead::{self, Envelope};
use crate::error::{CryptoError, CryptoResult};
use crate::identity::IdentityKeyPair;

const DEVKEYS_INFO_TAG: &str = "devkeys/v1";

fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn from_b64_32(s: &str) -> CryptoResult<[u8; 32]> {
    STANDARD
        .decode(s)?
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))
}

fn from_b64_64(s: &str) -> CryptoResult<[u8; 64]> {
    STANDARD
        .decode(s)?
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 64 bytes, got {}", v.len())))
}

/// The published half of a device's bundle: what an initiator fetches
/// to start X3DH. `opk` is consumed by at most one initiator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedBundle {
    pub device_id: String,
    pub ik_pub_b64: String,
    pub spk_pub_b64: String,
    pub spk_sig_b64: String,
    pub opk_id: Option<u64>,
    pub opk_pub_b64: Option<String>,
}

/// Live, in-memory device-private bundle. Holds every secret the device
/// needs besides the master key itself; zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct DevicePrivateBundle {
    #[zeroize(skip)]
    pub device_id: String,
    pub ik: IdentityKeyPair,
    spk_priv: StaticSecret,
    #[zeroize(skip)]
    pub spk_pub: X25519Public,
    #[zeroize(skip)]
    pub spk_sig: [u8; 64],
    opks: BTreeMap<u64, StaticSecret>,
    #[zeroize(skip)]
    pub next_opk_id: u64,
}

/// Plaintext-at-rest DTO, the payload wrapped under `devkeys/v1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DevicePrivateBundleDto {
    device_id: String,
    ik_secret_b64: String,
    spk_priv_b64: String,
    spk_sig_b64: String,
    opks: Vec<(u64, String)>,
    next_opk_id: u64,
}

impl DevicePrivateBundle {
    /// Generate a fresh identity key, signed prekey, and `count` one-time
    /// prekeys starting at `next_opk_id_start`.
    pub fn generate_initial(device_id: impl Into<String>, next_opk_id_start: u64, count: u64) -> Self {
        let ik = IdentityKeyPair::generate();
        let spk_priv = StaticSecret::random_from_rng(OsRng);
        let spk_pub = X25519Public::from(&spk_priv);
        let spk_sig = ik.sign(spk_pub.as_bytes());

        let mut bundle = Self {
            device_id: device_id.into(),
            ik,
            spk_priv,
            spk_pub,
            spk_sig,
            opks: BTreeMap::new(),
            next_opk_id: next_opk_id_start,
        };
        bundle.replenish_opks(count);
        bundle
    }

    /// Mint `count` fresh one-time prekeys at `[next_opk_id, next_opk_id + count)`.
    /// Returns the published `(id, pub_b64)` pairs for upload.
    pub fn replenish_opks(&mut self, count: u64) -> Vec<(u64, String)> {
        let mut minted = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = self.next_opk_id;
            let priv_key = StaticSecret::random_from_rng(OsRng);
            let pub_key = X25519Public::from(&priv_key);
            self.opks.insert(id, priv_key);
            minted.push((id, b64(pub_key.as_bytes())));
            self.next_opk_id += 1;
        }
        minted
    }

    /// The published bundle an initiator fetches, optionally offering one OPK.
    pub fn published(&self, opk_id: Option<u64>) -> PublishedBundle {
        let opk_pub_b64 = opk_id.and_then(|id| {
            self.opks.get(&id).map(|priv_key| b64(X25519Public::from(priv_key).as_bytes()))
        });
        PublishedBundle {
            device_id: self.device_id.clone(),
            ik_pub_b64: self.ik.public.to_b64(),
            spk_pub_b64: b64(self.spk_pub.as_bytes()),
            spk_sig_b64: b64(&self.spk_sig),
            opk_id: if opk_pub_b64.is_some() { opk_id } else { None },
            opk_pub_b64,
        }
    }

    pub fn spk_priv(&self) -> &StaticSecret {
        &self.spk_priv
    }

    /// Remove and return the OPK private key for `id`. Consumed ids are
    /// never reused; a missing id is a non-fatal degradation the caller
    /// falls back on by proceeding without DH4.
    pub fn consume_opk(&mut self, id: u64) -> Option<StaticSecret> {
        self.opks.remove(&id)
    }

    pub fn opk_count(&self) -> usize {
        self.opks.len()
    }

    /// Any unconsumed OPK id, for callers publishing a bundle without
    /// caring which one is offered.
    pub fn next_available_opk_id(&self) -> Option<u64> {
        self.opks.keys().next().copied()
    }

    fn to_dto(&self) -> DevicePrivateBundleDto {
        DevicePrivateBundleDto {
            device_id: self.device_id.clone(),
            ik_secret_b64: b64(self.ik.secret_bytes()),
            spk_priv_b64: b64(self.spk_priv.to_bytes().as_slice()),
            spk_sig_b64: b64(&self.spk_sig),
            opks: self.opks.iter().map(|(id, s)| (*id, b64(s.to_bytes().as_slice()))).collect(),
            next_opk_id: self.next_opk_id,
        }
    }

    fn from_dto(dto: DevicePrivateBundleDto) -> CryptoResult<Self> {
        let ik = IdentityKeyPair::from_secret_bytes(from_b64_32(&dto.ik_secret_b64)?);
        let spk_priv = StaticSecret::from(from_b64_32(&dto.spk_priv_b64)?);
        let spk_pub = X25519Public::from(&spk_priv);
        let spk_sig = from_b64_64(&dto.spk_sig_b64)?;
        let mut opks = BTreeMap::new();
        for (id, priv_b64) in dto.opks {
            opks.insert(id, StaticSecret::from(from_b64_32(&priv_b64)?));
        }
        Ok(Self {
            device_id: dto.device_id,
            ik,
            spk_priv,
            spk_pub,
            spk_sig,
            opks,
            next_opk_id: dto.next_opk_id,
        })
    }

    /// Wrap the whole bundle as an AEAD envelope under the master key.
    pub fn wrap_with_mk(&self, mk: &[u8; 32]) -> CryptoResult<Envelope> {
        aead::wrap_json(&self.to_dto(), mk, DEVKEYS_INFO_TAG)
    }

    /// Inverse of [`Self::wrap_with_mk`].
    pub fn unwrap_with_mk(envelope: &Envelope, mk: &[u8; 32]) -> CryptoResult<Self> {
        let dto: DevicePrivateBundleDto = aead::unwrap_json(envelope, mk)
            .map_err(|_| CryptoError::DevicePrivMissing)?;
        Self::from_dto(dto)
    }
}
