use thiserror::Error;

/// Unified error taxonomy for the cryptographic core.
///
/// Variants map onto the five classes in the error-handling design:
/// input validation, authentication failure, out-of-band state,
/// ordering violations, and fatal inconsistency. Callers match on this
/// enum rather than inspecting message text.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("envelope malformed: {0}")]
    EnvelopeMalformed(String),

    #[error("info tag not in the domain-separation whitelist: {0}")]
    InvalidInfoTag(String),

    #[error("AEAD authentication failed (tampering or wrong key)")]
    AeadAuthFail,

    #[error("legacy fallback packets are not supported")]
    LegacyPacketUnsupported,

    #[error("ratchet counter too low for retry at n={n}")]
    CounterTooLow { n: u64 },

    #[error("snapshot version mismatch: expected {expected}, got {got}")]
    SnapshotVersionMismatch { expected: u8, got: u8 },

    #[error("device-private bundle missing or unwrap failed")]
    DevicePrivMissing,

    #[error("prekey bundle invalid: {0}")]
    PrekeyBundleInvalid(String),

    #[error("X3DH signed-prekey signature invalid")]
    X3dhSignatureInvalid,

    #[error("ratchet step failed: {0}")]
    RatchetStep(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// `WrongPassword` is intentionally absent as a distinct variant:
/// `unwrap_mk` collapses a wrong password and a corrupt envelope into
/// the same `None` result so callers (and the server) cannot
/// distinguish the two.
pub type CryptoResult<T> = Result<T, CryptoError>;
