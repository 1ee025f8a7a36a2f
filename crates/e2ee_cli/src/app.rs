//! Shared plumbing every subcommand needs: the per-user data directory,
//! the vault envelope (stored alongside everything else in the local
//! tier so a bare password is enough to come back after a restart),
//! and the device-bundle/contacts stores built on top of it.

use anyhow::{anyhow, Result};
use chrono::Utc;

use e2ee_crypto::mk::{ArgonParams, MkEnvelope};
use e2ee_store::contacts::ContactSecretsStore;
use e2ee_store::device_bundle::DeviceBundleStore;
use e2ee_store::kv::{FileTier, PersistenceTier};
use e2ee_store::paths;
use e2ee_store::vault::VaultCell;

const VAULT_ENVELOPE_KEY: &str = "vault-v1";

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A user's durable footprint on this device: one vault envelope, one
/// device-private bundle, one contact-secrets store, all namespaced
/// under the same account digest.
pub struct Account {
    pub digest: String,
    vault_tier: FileTier,
}

impl Account {
    pub fn open(user_id: &str) -> Result<Self> {
        let digest = user_id.to_string();
        let vault_tier = FileTier::open(paths::local_tier_dir(&digest)?)?;
        Ok(Self { digest, vault_tier })
    }

    /// First-time setup: generate a fresh master key, wrap it under
    /// `password`, and hold it unlocked for the rest of this process.
    pub fn create_vault(&self, password: &str) -> Result<VaultCell> {
        let vault = VaultCell::new();
        let envelope = vault.create(password, ArgonParams::default())?;
        let bytes = serde_json::to_vec(&envelope)?;
        self.vault_tier.write(VAULT_ENVELOPE_KEY, &bytes, now_ms())?;
        Ok(vault)
    }

    pub fn unlock_vault(&self, password: &str) -> Result<VaultCell> {
        let stored = self
            .vault_tier
            .read(VAULT_ENVELOPE_KEY)?
            .ok_or_else(|| anyhow!("no identity for '{}' — run `identity new` first", self.digest))?;
        let envelope: MkEnvelope = serde_json::from_slice(&stored.bytes)?;
        let vault = VaultCell::new();
        vault.unlock(password, &envelope).map_err(|_| anyhow!("wrong password, or a corrupt vault"))?;
        Ok(vault)
    }

    pub fn device_store(&self) -> Result<DeviceBundleStore> {
        Ok(DeviceBundleStore::open(&self.digest)?)
    }

    pub fn contacts(&self) -> Result<ContactSecretsStore> {
        let store = ContactSecretsStore::open(&self.digest)?;
        store.hydrate()?;
        Ok(store)
    }
}
