use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot determine data directory")]
    NoDataDir,

    #[error("i/o error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Crypto(#[from] e2ee_crypto::CryptoError),

    #[error("store is locked ({reason}); writes are ignored")]
    Locked { reason: String },

    #[error("contact-secrets patch rejected: {0}")]
    PatchRejected(String),

    #[error("no vault unlocked: master key unavailable")]
    VaultLocked,
}

pub type StoreResult<T> = Result<T, StoreError>;
