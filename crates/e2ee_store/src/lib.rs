pub mod contacts;
pub mod device_bundle;
pub mod error;
pub mod kv;
pub mod models;
pub mod paths;
pub mod vault;

pub use error::{StoreError, StoreResult};
