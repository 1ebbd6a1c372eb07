//! Abstractions over the node-to-node and block-store transports.
//!
//! Concrete gRPC implementations live in `blocksync-net`. Keeping the
//! traits here lets the state machine be exercised with in-process
//! mocks, and isolates the best-effort push so a stronger replication
//! protocol could be substituted without touching the write path.

use async_trait::async_trait;
use blocksync_common::{FileRecord, NodeAddr};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("RPC failed: {0}")]
    Rpc(String),
    #[error("timeout")]
    Timeout,
}

/// Transport for metadata node-to-node RPCs.
///
/// One client instance serves all peers; the target is passed per call.
#[async_trait]
pub trait PeerClient: Send + Sync + 'static {
    /// Push a full record snapshot to a peer. A crashed peer acks and
    /// silently drops it; the caller cannot tell the difference.
    async fn append(
        &self,
        target: &NodeAddr,
        filename: &str,
        record: &FileRecord,
    ) -> Result<(), TransportError>;

    /// The peer's operation-log length (the catch-up watermark).
    async fn log_length(&self, target: &NodeAddr) -> Result<u64, TransportError>;

    /// The filename recorded at a log position on the peer.
    async fn log_entry(&self, target: &NodeAddr, index: u64) -> Result<String, TransportError>;

    /// The peer's current record for a filename.
    async fn current_record(
        &self,
        target: &NodeAddr,
        filename: &str,
    ) -> Result<FileRecord, TransportError>;

    /// Nudge a peer to run crash recovery against its leader.
    async fn restore(&self, target: &NodeAddr) -> Result<(), TransportError>;
}

/// Transport for the leader's block-store connection.
#[async_trait]
pub trait BlockClient: Send + Sync + 'static {
    /// Membership test for a content hash.
    async fn has(&self, hash: &str) -> Result<bool, TransportError>;

    /// Liveness check, no side effects.
    async fn ping(&self) -> Result<(), TransportError>;
}
