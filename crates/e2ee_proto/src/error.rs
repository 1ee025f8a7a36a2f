use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server reports counter too low at n={n}")]
    CounterTooLow { n: u64 },

    #[error("no bundle published for {0}")]
    BundleNotFound(String),

    #[error(transparent)]
    Crypto(#[from] e2ee_crypto::CryptoError),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

pub type ProtoResult<T> = Result<T, ProtoError>;
