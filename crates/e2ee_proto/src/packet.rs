//! Wire-level DTOs exchanged between peers and with the identity/SDM
//! exchange. The Double Ratchet packet itself (`DrPacket`/`DrHeader`) is
//! owned by `e2ee_crypto::ratchet` since its shape is load-bearing for
//! the ratchet's own correctness; this module re-exports it alongside
//! the surrounding handshake envelopes that only the transport layer
//! cares about.

use serde::{Deserialize, Serialize};

pub use e2ee_crypto::ratchet::{DrHeader, DrPacket};
pub use e2ee_crypto::prekey::PublishedBundle;
pub use e2ee_crypto::x3dh::X3dhInitHeader;

/// File-friendly envelope for `session initiate`'s `--peer-bundle` input
/// and `identity bundle`'s stdout: a published bundle tagged with the
/// account digest it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleFile {
    pub account_digest: String,
    pub bundle: PublishedBundle,
}

/// File-friendly envelope for `session respond`'s `--header` input: the
/// X3DH init header plus the account digest of the sender, so the
/// responder can key its contact-secrets record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitHeaderFile {
    pub account_digest: String,
    pub header: X3dhInitHeader,
}
