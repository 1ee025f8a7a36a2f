//! Opaque collaborator interfaces. The core treats transport and
//! identity/SDM exchange purely through these traits — no transport
//! code lives in `e2ee_crypto` or `e2ee_store`.

use async_trait::async_trait;

use crate::error::ProtoResult;
use crate::packet::{DrPacket, PublishedBundle};

/// Server-side message relay. `put_envelope` may reject a send with
/// `CounterTooLow`, which the caller handles via the rollback-and-retry
/// policy in the ratchet engine's counter-gap repair.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn list_messages(&self, peer: &str) -> ProtoResult<Vec<DrPacket>>;
    async fn put_envelope(&self, peer: &str, packet: &DrPacket) -> ProtoResult<()>;
    async fn fetch_server_max_counter(&self, peer: &str) -> ProtoResult<u64>;
}

/// Identity/SDM exchange: resolves a peer identifier to its published
/// prekey bundle. The core consumes only the resulting `accountDigest`
/// namespace; tag verification and session/account token issuance are
/// the caller's concern.
#[async_trait]
pub trait IdentityExchange: Send + Sync {
    async fn fetch_bundle(&self, peer_id: &str) -> ProtoResult<PublishedBundle>;
}

/// In-memory `Transport`/`IdentityExchange` used by the CLI's `demo`
/// subcommand and by integration tests, so the handshake and ratchet
/// flows can be exercised without a real network.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{IdentityExchange, Transport};
    use crate::error::{ProtoError, ProtoResult};
    use crate::packet::{DrPacket, PublishedBundle};

    #[derive(Default)]
    pub struct InMemoryTransport {
        inbox: Mutex<HashMap<String, Vec<DrPacket>>>,
        counters: Mutex<HashMap<String, u64>>,
    }

    #[async_trait]
    impl Transport for InMemoryTransport {
        async fn list_messages(&self, peer: &str) -> ProtoResult<Vec<DrPacket>> {
            Ok(self.inbox.lock().unwrap().get(peer).cloned().unwrap_or_default())
        }

        async fn put_envelope(&self, peer: &str, packet: &DrPacket) -> ProtoResult<()> {
            self.inbox.lock().unwrap().entry(peer.to_string()).or_default().push(packet.clone());
            let mut counters = self.counters.lock().unwrap();
            let next = counters.get(peer).copied().unwrap_or(0) + 1;
            counters.insert(peer.to_string(), next);
            Ok(())
        }

        async fn fetch_server_max_counter(&self, peer: &str) -> ProtoResult<u64> {
            Ok(self.counters.lock().unwrap().get(peer).copied().unwrap_or(0))
        }
    }

    #[derive(Default)]
    pub struct InMemoryDirectory {
        bundles: Mutex<HashMap<String, PublishedBundle>>,
    }

    impl InMemoryDirectory {
        pub fn publish(&self, peer_id: &str, bundle: PublishedBundle) {
            self.bundles.lock().unwrap().insert(peer_id.to_string(), bundle);
        }
    }

    #[async_trait]
    impl IdentityExchange for InMemoryDirectory {
        async fn fetch_bundle(&self, peer_id: &str) -> ProtoResult<PublishedBundle> {
            self.bundles
                .lock()
                .unwrap()
                .get(peer_id)
                .cloned()
                .ok_or_else(|| ProtoError::BundleNotFound(peer_id.to_string()))
        }
    }
}
