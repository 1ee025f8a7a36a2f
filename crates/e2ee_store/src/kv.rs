//! Two-tier key-value persistence abstraction.
//!
//! The spec's "browser globals" (sessionStorage/localStorage) are
//! abstracted here as a `PersistenceTier` trait with a durable,
//! file-backed implementation (atomic staging + rename, mirroring
//! `guard-core`'s backup-store write path) and an in-memory
//! implementation used for the per-process session tier and for the
//! optional in-memory seed source.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// A stored payload plus the timestamp it was written at and, when the
/// meta record carried one, the checksum recorded alongside it.
#[derive(Debug, Clone)]
pub struct StoredValue {
    pub bytes: Vec<u8>,
    pub ts: i64,
    pub checksum: Option<String>,
}

/// SHA-256 hex digest of `bytes`, the preferred checksum.
pub fn checksum_sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 32-bit additive fallback checksum, for environments/legacy records
/// where a full hash was judged not worth computing.
pub fn checksum_additive32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
}

/// Recognized shape of a recorded checksum string: a 64-hex-char
/// SHA-256 digest, or a bare decimal `u32` from the additive fallback.
enum RecordedChecksum {
    Sha256(String),
    Additive32(u32),
}

fn parse_checksum(recorded: &str) -> Option<RecordedChecksum> {
    if recorded.len() == 64 && recorded.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(RecordedChecksum::Sha256(recorded.to_ascii_lowercase()))
    } else {
        recorded.parse::<u32>().ok().map(RecordedChecksum::Additive32)
    }
}

/// Verify `bytes` against a checksum string a meta record carried.
/// Picks the algorithm the shape of `recorded` implies — SHA-256 hex
/// when available, the additive fallback for older decimal-only
/// records — per the write side's preference order. An unrecognized
/// shape cannot be verified and is treated as a mismatch.
pub fn checksum_matches(recorded: &str, bytes: &[u8]) -> bool {
    match parse_checksum(recorded) {
        Some(RecordedChecksum::Sha256(want)) => want == checksum_sha256(bytes),
        Some(RecordedChecksum::Additive32(want)) => want == checksum_additive32(bytes),
        None => false,
    }
}

pub trait PersistenceTier: Send + Sync {
    fn read(&self, key: &str) -> StoreResult<Option<StoredValue>>;
    fn write(&self, key: &str, bytes: &[u8], ts: i64) -> StoreResult<()>;
    fn erase(&self, key: &str) -> StoreResult<()>;
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io { path: path.display().to_string(), source }
}

fn sanitize_key(key: &str) -> String {
    key.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

/// Durable tier backed by a directory of `{key}.payload` / `{key}.meta.json`
/// file pairs, written via staging-file-then-rename so a crash mid-write
/// never leaves a half-written payload visible under its real name.
pub struct FileTier {
    root: PathBuf,
    staging: PathBuf,
}

impl FileTier {
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        let staging = root.join(".staging");
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
        Self::cleanup_staging(&staging);
        Ok(Self { root, staging })
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.payload", sanitize_key(key)))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.meta.json", sanitize_key(key)))
    }

    fn write_atomic(&self, dest: &Path, bytes: &[u8]) -> StoreResult<()> {
        let staging_path = self.staging.join(format!("{}.tmp", Uuid::new_v4()));
        {
            let mut f = fs::File::create(&staging_path).map_err(|e| io_err(&staging_path, e))?;
            f.write_all(bytes).map_err(|e| io_err(&staging_path, e))?;
            f.sync_all().map_err(|e| io_err(&staging_path, e))?;
        }
        fs::rename(&staging_path, dest).map_err(|e| io_err(dest, e))?;
        Ok(())
    }

    fn cleanup_staging(staging: &Path) {
        if let Ok(entries) = fs::read_dir(staging) {
            for entry in entries.flatten() {
                if entry.path().extension().map(|e| e == "tmp").unwrap_or(false) {
                    tracing::warn!(path = %entry.path().display(), "removing orphaned kv staging file");
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
    }
}

impl PersistenceTier for FileTier {
    fn read(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        let payload_path = self.payload_path(key);
        if !payload_path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&payload_path).map_err(|e| io_err(&payload_path, e))?;
        let meta_path = self.meta_path(key);
        let (ts, checksum) = if meta_path.exists() {
            let raw = fs::read_to_string(&meta_path).map_err(|e| io_err(&meta_path, e))?;
            let parsed = serde_json::from_str::<serde_json::Value>(&raw).ok();
            let ts = parsed.as_ref().and_then(|v| v.get("ts").and_then(|t| t.as_i64())).unwrap_or(0);
            let checksum =
                parsed.as_ref().and_then(|v| v.get("checksum").and_then(|c| c.as_str())).map(str::to_string);
            (ts, checksum)
        } else {
            (0, None)
        };
        if let Some(ref recorded) = checksum {
            if !checksum_matches(recorded, &bytes) {
                tracing::warn!(path = %payload_path.display(), "payload checksum mismatch against recorded meta checksum");
            }
        }
        Ok(Some(StoredValue { bytes, ts, checksum }))
    }

    fn write(&self, key: &str, bytes: &[u8], ts: i64) -> StoreResult<()> {
        self.write_atomic(&self.payload_path(key), bytes)?;
        let meta = serde_json::json!({ "ts": ts, "checksum": checksum_sha256(bytes) });
        self.write_atomic(&self.meta_path(key), meta.to_string().as_bytes())
    }

    fn erase(&self, key: &str) -> StoreResult<()> {
        for path in [self.payload_path(key), self.meta_path(key)] {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            }
        }
        Ok(())
    }
}

/// In-memory tier: the per-process "session" handoff, or a seed source
/// populated once at login from an out-of-band fetch.
#[derive(Default)]
pub struct MemoryTier {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: &str, bytes: Vec<u8>, ts: i64) {
        let checksum = Some(checksum_sha256(&bytes));
        self.entries.lock().unwrap().insert(key.to_string(), StoredValue { bytes, ts, checksum });
    }

    /// Seed with an explicit checksum, e.g. a bare additive32 decimal
    /// string, for a candidate simulating a legacy producer that never
    /// had a SHA-256 implementation to hand.
    pub fn seed_with_checksum(&self, key: &str, bytes: Vec<u8>, ts: i64, checksum: Option<String>) {
        self.entries.lock().unwrap().insert(key.to_string(), StoredValue { bytes, ts, checksum });
    }
}

impl PersistenceTier for MemoryTier {
    fn read(&self, key: &str) -> StoreResult<Option<StoredValue>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8], ts: i64) -> StoreResult<()> {
        let checksum = Some(checksum_sha256(bytes));
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), StoredValue { bytes: bytes.to_vec(), ts, checksum });
        Ok(())
    }

    fn erase(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_tier_roundtrip_and_erase() {
        let dir = std::env::temp_dir().join(format!("e2ee-kv-test-{}", Uuid::new_v4()));
        let tier = FileTier::open(&dir).unwrap();
        tier.write("k1", b"hello", 42).unwrap();
        let v = tier.read("k1").unwrap().unwrap();
        assert_eq!(v.bytes, b"hello");
        assert_eq!(v.ts, 42);

        tier.erase("k1").unwrap();
        assert!(tier.read("k1").unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn memory_tier_roundtrip() {
        let tier = MemoryTier::new();
        tier.write("k", b"v", 1).unwrap();
        assert_eq!(tier.read("k").unwrap().unwrap().bytes, b"v");
    }

    #[test]
    fn checksum_differs_on_tamper() {
        let a = checksum_sha256(b"payload");
        let b = checksum_sha256(b"payloadX");
        assert_ne!(a, b);
    }

    #[test]
    fn file_tier_write_records_sha256_checksum_read_back() {
        let dir = std::env::temp_dir().join(format!("e2ee-kv-test-{}", Uuid::new_v4()));
        let tier = FileTier::open(&dir).unwrap();
        tier.write("k1", b"hello", 42).unwrap();
        let v = tier.read("k1").unwrap().unwrap();
        assert_eq!(v.checksum.as_deref(), Some(checksum_sha256(b"hello").as_str()));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn checksum_matches_accepts_sha256_and_rejects_tamper() {
        let recorded = checksum_sha256(b"payload");
        assert!(checksum_matches(&recorded, b"payload"));
        assert!(!checksum_matches(&recorded, b"payloadX"));
    }

    #[test]
    fn checksum_matches_falls_back_to_additive32_for_legacy_records() {
        let recorded = checksum_additive32(b"payload").to_string();
        assert!(checksum_matches(&recorded, b"payload"));
        assert!(!checksum_matches(&recorded, b"payloadX"));
    }

    #[test]
    fn checksum_matches_rejects_unrecognized_shape() {
        assert!(!checksum_matches("not-a-checksum", b"payload"));
    }
}
