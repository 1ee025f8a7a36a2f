//! Cryptographic core of the secure messenger client: AEAD envelopes,
//! Argon2id master-key wrapping, X3DH handshake, and the Double Ratchet
//! session engine.
//!
//! Module dependency order is bottom-up: [`aead`] and [`kdf`] underlie
//! everything; [`mk`] and [`prekey`] build on them; [`x3dh`] consumes
//! [`prekey`] and [`identity`]; [`ratchet`] consumes [`x3dh`]'s output to
//! seed a session and then only calls back into [`aead`]/[`kdf`].

pub mod aead;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod mk;
pub mod prekey;
pub mod ratchet;
pub mod x3dh;

pub use error::{CryptoError, CryptoResult};
