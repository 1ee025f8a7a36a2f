//! Durable storage for the device-private bundle: the wrapped envelope
//! lives in the local persistence tier keyed by `devkeys/v1`; the live,
//! zeroize-on-drop `DevicePrivateBundle` only ever exists unwrapped in
//! process memory, read-many after unlock.

use e2ee_crypto::aead::Envelope;
use e2ee_crypto::prekey::DevicePrivateBundle;

use crate::error::{StoreError, StoreResult};
use crate::kv::{FileTier, PersistenceTier};
use crate::paths;
use crate::vault::VaultCell;

const DEVICE_BUNDLE_KEY: &str = "devkeys-v1";

pub struct DeviceBundleStore {
    tier: FileTier,
}

impl DeviceBundleStore {
    pub fn open(account_digest: &str) -> StoreResult<Self> {
        let tier = FileTier::open(paths::local_tier_dir(account_digest)?)?;
        Ok(Self { tier })
    }

    pub fn save(&self, bundle: &DevicePrivateBundle, vault: &VaultCell, now_ms: i64) -> StoreResult<()> {
        let envelope = vault.with_mk(|mk| bundle.wrap_with_mk(mk))??;
        let bytes = serde_json::to_vec(&envelope)?;
        self.tier.write(DEVICE_BUNDLE_KEY, &bytes, now_ms)
    }

    pub fn load(&self, vault: &VaultCell) -> StoreResult<DevicePrivateBundle> {
        let stored = self.tier.read(DEVICE_BUNDLE_KEY)?.ok_or(StoreError::VaultLocked)?;
        let envelope: Envelope = serde_json::from_slice(&stored.bytes)?;
        Ok(vault.with_mk(|mk| DevicePrivateBundle::unwrap_with_mk(&envelope, mk))??)
    }

    pub fn exists(&self) -> bool {
        self.tier.read(DEVICE_BUNDLE_KEY).ok().flatten().is_some()
    }
}
