//! The master-key single-holder cell.
//!
//! Realized as an explicit process-scoped handle rather than an ambient
//! global: callers pass `&VaultCell` into whatever needs the unwrapped
//! key, and `lock` zeroizes it on logout.

use std::sync::Mutex;

use e2ee_crypto::mk::{self, ArgonParams, MasterKey, MkEnvelope};

use crate::error::{StoreError, StoreResult};

#[derive(Default)]
pub struct VaultCell {
    inner: Mutex<Option<MasterKey>>,
}

impl VaultCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwrap `envelope` with `password` and hold the resulting MK.
    /// Wrong password and a corrupt envelope are indistinguishable, per
    /// the taxonomy in `e2ee_crypto::error`.
    pub fn unlock(&self, password: &str, envelope: &MkEnvelope) -> StoreResult<()> {
        let mk = mk::unwrap_mk(password.as_bytes(), envelope).ok_or(StoreError::VaultLocked)?;
        *self.inner.lock().unwrap() = Some(mk);
        Ok(())
    }

    /// Generate a fresh MK, wrap it under `password`, and hold it unlocked.
    pub fn create(&self, password: &str, params: ArgonParams) -> StoreResult<MkEnvelope> {
        let raw = mk::generate_mk();
        let envelope = mk::wrap_mk(password.as_bytes(), &raw, params)?;
        *self.inner.lock().unwrap() = Some(MasterKey(raw));
        Ok(envelope)
    }

    /// Run `f` with the unwrapped 32-byte MK. Fails with `VaultLocked`
    /// if no MK is currently held.
    pub fn with_mk<T>(&self, f: impl FnOnce(&[u8; 32]) -> T) -> StoreResult<T> {
        let guard = self.inner.lock().unwrap();
        let mk = guard.as_ref().ok_or(StoreError::VaultLocked)?;
        Ok(f(&mk.0))
    }

    pub fn is_unlocked(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    /// Explicit zeroize-on-logout: drops the held `MasterKey`.
    pub fn lock(&self) {
        *self.inner.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_unlock_use_lock_cycle() {
        let cell = VaultCell::new();
        let envelope = cell.create("hunter2", ArgonParams { m: 8, t: 1, p: 1 }).unwrap();
        assert!(cell.is_unlocked());

        let out = cell.with_mk(|mk| mk.to_vec()).unwrap();
        assert_eq!(out.len(), 32);

        cell.lock();
        assert!(!cell.is_unlocked());
        assert!(cell.with_mk(|_| ()).is_err());

        cell.unlock("hunter2", &envelope).unwrap();
        assert!(cell.is_unlocked());
    }

    #[test]
    fn wrong_password_fails_unlock() {
        let cell = VaultCell::new();
        let envelope = cell.create("correct", ArgonParams { m: 8, t: 1, p: 1 }).unwrap();
        cell.lock();
        assert!(cell.unlock("wrong", &envelope).is_err());
    }
}
