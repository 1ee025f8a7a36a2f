//! OS data-directory resolution, in the same shape as the rest of the
//! ambient configuration layer: no config file format of its own, just
//! a fixed `ProjectDirs` triple with an environment-variable override
//! for tests and CI.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::{StoreError, StoreResult};

const APP_QUALIFIER: &str = "org";
const APP_ORG: &str = "ratchetcore";
const APP_NAME: &str = "e2ee";

/// Root data directory, honoring `E2EE_DATA_DIR` for tests/CI before
/// falling back to the platform default.
pub fn data_dir() -> StoreResult<PathBuf> {
    if let Ok(over_ride) = std::env::var("E2EE_DATA_DIR") {
        return Ok(PathBuf::from(over_ride));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or(StoreError::NoDataDir)?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Durable, per-account "local" persistence tier root.
pub fn local_tier_dir(account_digest: &str) -> StoreResult<PathBuf> {
    Ok(data_dir()?.join("local").join(account_digest))
}

/// Per-process "session" tier root; conventionally a tmpfs-backed path
/// in production, but any writable directory works for the file-backed
/// tier used here.
pub fn session_tier_dir(account_digest: &str) -> StoreResult<PathBuf> {
    Ok(data_dir()?.join("session").join(account_digest))
}
