//! Double Ratchet engine.
//!
//! Owns the per-peer-device session state: root key, the two symmetric
//! chains, the DH ratchet keypair, and the skipped-key archive for
//! out-of-order delivery. A session starts from either
//! [`crate::x3dh::InitiatorMaterial`] or [`crate::x3dh::ResponderMaterial`]
//! and then only ever moves forward through [`DrState::encrypt`] and
//! [`DrState::decrypt`].

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::aead;
use crate::error::{CryptoError, CryptoResult};
use crate::kdf;
use crate::x3dh::{InitiatorMaterial, ResponderMaterial};

/// Skipped message keys are bounded so a malicious or corrupt `n` can't
/// grow the archive without limit.
pub const MAX_SKIP_KEYS: usize = 1000;

fn b64_32(bytes: &[u8; 32]) -> String {
    STANDARD.encode(bytes)
}

fn from_b64_32(s: &str) -> CryptoResult<[u8; 32]> {
    STANDARD
        .decode(s)?
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))
}

fn from_b64_12(s: &str) -> CryptoResult<[u8; 12]> {
    STANDARD
        .decode(s)?
        .try_into()
        .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 12 bytes, got {}", v.len())))
}

/// Header carried in the clear alongside every ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrHeader {
    pub dr: u8,
    pub ek_pub_b64: String,
    pub pn: u32,
    pub n: u32,
    pub iv_b64: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<bool>,
}

/// A fully assembled wire packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrPacket {
    pub aead: String,
    pub header: DrHeader,
    pub iv_b64: String,
    pub ciphertext_b64: String,
}

/// JSON-serializable snapshot of a `DrState`, as persisted by the
/// contact-secrets store. All byte fields are base64. `ns_total`/
/// `nr_total` extend the documented wire shape so the lifetime
/// counters survive a restart without a separate side-channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrSnapshot {
    pub v: u8,
    pub rk_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ck_s_b64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ck_r_b64: Option<String>,
    #[serde(rename = "Ns")]
    pub ns: u32,
    #[serde(rename = "Nr")]
    pub nr: u32,
    #[serde(rename = "PN")]
    pub pn: u32,
    pub ns_total: u64,
    pub nr_total: u64,
    pub my_ratchet_priv_b64: String,
    pub my_ratchet_pub_b64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub their_ratchet_pub_b64: Option<String>,
    pub pending_send_ratchet: bool,
    pub updated_at: i64,
}

/// Per-peer-device Double Ratchet state.
pub struct DrState {
    rk: [u8; 32],
    ck_s: Option<[u8; 32]>,
    ck_r: Option<[u8; 32]>,
    ns: u32,
    nr: u32,
    pn: u32,
    ns_total: u64,
    nr_total: u64,
    my_ratchet_priv: StaticSecret,
    my_ratchet_pub: X25519Public,
    their_ratchet_pub: Option<X25519Public>,
    pending_send_ratchet: bool,
    /// Keyed by (their ratchet pub, chain index). Survives DH rotation
    /// untouched since the key embeds the chain's own ratchet pubkey.
    skipped_keys: HashMap<(String, u32), [u8; 32]>,
}

impl Drop for DrState {
    fn drop(&mut self) {
        self.rk.zeroize();
        if let Some(ref mut k) = self.ck_s {
            k.zeroize();
        }
        if let Some(ref mut k) = self.ck_r {
            k.zeroize();
        }
        for v in self.skipped_keys.values_mut() {
            v.zeroize();
        }
    }
}

impl DrState {
    /// Build the initial state on the initiator side of X3DH. No send
    /// chain yet; it is lazily derived from `rk` on first send.
    pub fn from_initiator(material: InitiatorMaterial) -> Self {
        Self {
            rk: material.rk,
            ck_s: None,
            ck_r: None,
            ns: 0,
            nr: 0,
            pn: 0,
            ns_total: 0,
            nr_total: 0,
            my_ratchet_priv: material.my_ratchet_priv,
            my_ratchet_pub: material.my_ratchet_pub,
            their_ratchet_pub: None,
            pending_send_ratchet: false,
            skipped_keys: HashMap::new(),
        }
    }

    /// Build the initial state on the responder side of X3DH. `rk` and
    /// `ck_s_seed` already reflect the DH-ratchet step `x3dh::respond`
    /// performed against the initiator's ephemeral key, so the send
    /// chain is ready immediately and matches the chain key the
    /// initiator's first `rotate_receive` will derive.
    pub fn from_responder(material: ResponderMaterial) -> Self {
        Self {
            rk: material.rk,
            ck_s: Some(material.ck_s_seed),
            ck_r: None,
            ns: 0,
            nr: 0,
            pn: 0,
            ns_total: 0,
            nr_total: 0,
            my_ratchet_priv: material.my_ratchet_priv,
            my_ratchet_pub: material.my_ratchet_pub,
            their_ratchet_pub: Some(material.their_ratchet_pub),
            pending_send_ratchet: false,
            skipped_keys: HashMap::new(),
        }
    }

    pub fn ns_total(&self) -> u64 {
        self.ns_total
    }

    pub fn nr_total(&self) -> u64 {
        self.nr_total
    }

    pub fn their_ratchet_pub_b64(&self) -> Option<String> {
        self.their_ratchet_pub.map(|p| b64_32(p.as_bytes()))
    }

    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    /// Force a DH rotation before the next send. Callers set this
    /// explicitly after resuming from a restored snapshot so a restored
    /// state never reuses a message key that predates the snapshot.
    pub fn force_next_send_rotation(&mut self) {
        self.pending_send_ratchet = true;
    }

    fn rotate_send(&mut self) -> CryptoResult<()> {
        let their = self
            .their_ratchet_pub
            .ok_or_else(|| CryptoError::RatchetStep("cannot rotate send chain before first receive".into()))?;

        let new_priv = StaticSecret::random_from_rng(OsRng);
        let new_pub = X25519Public::from(&new_priv);
        let dh = new_priv.diffie_hellman(&their);
        let (new_rk, ck_s_seed) = kdf::kdf_rk(&self.rk, dh.as_bytes())?;

        self.rk = new_rk;
        self.ck_s = Some(ck_s_seed);
        self.pn = self.ns;
        self.ns = 0;
        self.my_ratchet_priv = new_priv;
        self.my_ratchet_pub = new_pub;
        self.pending_send_ratchet = false;
        Ok(())
    }

    fn rotate_receive(&mut self, their_new: X25519Public) -> CryptoResult<()> {
        let dh = self.my_ratchet_priv.diffie_hellman(&their_new);
        let (rk1, ck_r_seed) = kdf::kdf_rk(&self.rk, dh.as_bytes())?;
        self.ck_r = Some(ck_r_seed);

        let new_priv = StaticSecret::random_from_rng(OsRng);
        let new_pub = X25519Public::from(&new_priv);
        let dh2 = new_priv.diffie_hellman(&their_new);
        let (rk2, ck_s_seed) = kdf::kdf_rk(&rk1, dh2.as_bytes())?;

        self.rk = rk2;
        self.ck_s = Some(ck_s_seed);
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;
        self.my_ratchet_priv = new_priv;
        self.my_ratchet_pub = new_pub;
        self.their_ratchet_pub = Some(their_new);
        Ok(())
    }

    /// Encrypt `plaintext` for `device_id`, advancing the send chain by
    /// one message.
    pub fn encrypt(&mut self, plaintext: &[u8], device_id: &str, version: u32) -> CryptoResult<DrPacket> {
        if self.pending_send_ratchet {
            self.rotate_send()?;
        }
        if self.ck_s.is_none() {
            let (_, ck_seed) = kdf::kdf_ck(&self.rk)?;
            self.ck_s = Some(ck_seed);
        }

        let ck_s = self.ck_s.expect("seeded above");
        let (mk, ck_next) = kdf::kdf_ck(&ck_s)?;
        self.ck_s = Some(ck_next);
        self.ns += 1;
        self.ns_total += 1;

        let mut iv = [0u8; 12];
        OsRng.fill_bytes(&mut iv);
        let ct = aead::encrypt_raw(plaintext, &mk, &iv)?;

        let header = DrHeader {
            dr: 1,
            ek_pub_b64: b64_32(self.my_ratchet_pub.as_bytes()),
            pn: self.pn,
            n: self.ns,
            iv_b64: STANDARD.encode(iv),
            device_id: device_id.to_string(),
            version,
            fallback: None,
        };

        Ok(DrPacket {
            aead: "aes-256-gcm".to_string(),
            iv_b64: header.iv_b64.clone(),
            header,
            ciphertext_b64: STANDARD.encode(ct),
        })
    }

    /// Decrypt a received packet, performing DH rotation and skipped-key
    /// gap-filling as needed. `on_skipped_keys`, if given, is invoked
    /// with every newly archived `(n, message_key)` pair so the caller
    /// can persist them durably before this call returns.
    pub fn decrypt(
        &mut self,
        packet: &DrPacket,
        mut on_skipped_keys: Option<&mut dyn FnMut(u32, &[u8; 32])>,
    ) -> CryptoResult<Vec<u8>> {
        if packet.header.fallback == Some(true) {
            return Err(CryptoError::LegacyPacketUnsupported);
        }

        let their_pub = X25519Public::from(from_b64_32(&packet.header.ek_pub_b64)?);
        let their_pub_b64 = b64_32(their_pub.as_bytes());
        let n = packet.header.n;

        // A retried delivery of a message already archived as skipped:
        // use the stored key directly rather than re-walking the chain.
        if let Some(mk) = self.skipped_keys.get(&(their_pub_b64.clone(), n)).copied() {
            let iv = from_b64_12(&packet.header.iv_b64)?;
            let ct = STANDARD.decode(&packet.ciphertext_b64)?;
            let plain = aead::decrypt_raw(&ct, &mk, &iv)?;
            self.skipped_keys.remove(&(their_pub_b64, n));
            return Ok(plain);
        }

        let is_new_chain = match self.their_ratchet_pub {
            Some(known) => known.as_bytes() != their_pub.as_bytes(),
            None => true,
        };
        if is_new_chain {
            self.rotate_receive(their_pub)?;
        }

        if self.ck_r.is_none() {
            let (_, ck_seed) = kdf::kdf_ck(&self.rk)?;
            self.ck_r = Some(ck_seed);
        }

        if n > self.nr + 1 {
            let gap_start = self.nr + 1;
            if (n - gap_start) as usize > MAX_SKIP_KEYS {
                return Err(CryptoError::RatchetStep(format!(
                    "gap of {} messages exceeds skipped-key bound",
                    n - gap_start
                )));
            }
            let mut ck = self.ck_r.expect("seeded above");
            for k in gap_start..n {
                let (mk, ck_next) = kdf::kdf_ck(&ck)?;
                self.skipped_keys.insert((their_pub_b64.clone(), k), mk);
                if let Some(cb) = on_skipped_keys.as_deref_mut() {
                    cb(k, &mk);
                }
                ck = ck_next;
            }
            self.ck_r = Some(ck);
        }

        let ck_r = self.ck_r.expect("seeded above");
        let (mk, ck_next) = kdf::kdf_ck(&ck_r)?;
        self.ck_r = Some(ck_next);
        self.nr = n;
        self.nr_total += 1;

        let iv = from_b64_12(&packet.header.iv_b64)?;
        let ct = STANDARD.decode(&packet.ciphertext_b64)?;
        match aead::decrypt_raw(&ct, &mk, &iv) {
            Ok(plain) => Ok(plain),
            Err(e) => {
                if let Some(fallback_mk) = self.skipped_keys.get(&(their_pub_b64.clone(), n)).copied() {
                    let plain = aead::decrypt_raw(&ct, &fallback_mk, &iv)?;
                    self.skipped_keys.remove(&(their_pub_b64, n));
                    Ok(plain)
                } else {
                    Err(e)
                }
            }
        }
    }

    pub fn snapshot(&self) -> DrSnapshot {
        DrSnapshot {
            v: 1,
            rk_b64: b64_32(&self.rk),
            ck_s_b64: self.ck_s.as_ref().map(b64_32),
            ck_r_b64: self.ck_r.as_ref().map(b64_32),
            ns: self.ns,
            nr: self.nr,
            pn: self.pn,
            ns_total: self.ns_total,
            nr_total: self.nr_total,
            my_ratchet_priv_b64: STANDARD.encode(self.my_ratchet_priv.to_bytes()),
            my_ratchet_pub_b64: b64_32(self.my_ratchet_pub.as_bytes()),
            their_ratchet_pub_b64: self.their_ratchet_pub_b64(),
            pending_send_ratchet: self.pending_send_ratchet,
            updated_at: Utc::now().timestamp_millis(),
        }
    }

    /// Literal inverse of `snapshot`. Does not itself force a rotation —
    /// callers resuming after logout/crash must call
    /// `force_next_send_rotation` afterward.
    pub fn restore(snap: &DrSnapshot) -> CryptoResult<Self> {
        if snap.v != 1 {
            return Err(CryptoError::SnapshotVersionMismatch { expected: 1, got: snap.v });
        }
        let my_ratchet_priv = StaticSecret::from(from_b64_32(&snap.my_ratchet_priv_b64)?);
        let my_ratchet_pub = X25519Public::from(from_b64_32(&snap.my_ratchet_pub_b64)?);
        let their_ratchet_pub = snap
            .their_ratchet_pub_b64
            .as_deref()
            .map(from_b64_32)
            .transpose()?
            .map(X25519Public::from);

        Ok(Self {
            rk: from_b64_32(&snap.rk_b64)?,
            ck_s: snap.ck_s_b64.as_deref().map(from_b64_32).transpose()?,
            ck_r: snap.ck_r_b64.as_deref().map(from_b64_32).transpose()?,
            ns: snap.ns,
            nr: snap.nr,
            pn: snap.pn,
            ns_total: snap.ns_total,
            nr_total: snap.nr_total,
            my_ratchet_priv,
            my_ratchet_pub,
            their_ratchet_pub,
            pending_send_ratchet: snap.pending_send_ratchet,
            skipped_keys: HashMap::new(),
        })
    }
}
