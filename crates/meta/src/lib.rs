//! blocksync-meta: the metadata node state machine.
//!
//! Holds the filename → (version, blocklist) table, the append-only
//! operation log, the write-acceptance protocol, and the replication /
//! crash-recovery machinery. Network transports are abstracted behind
//! the [`transport::PeerClient`] and [`transport::BlockClient`] traits;
//! the gRPC implementations live in `blocksync-net`, and unit tests use
//! in-process mocks.

pub mod node;
pub mod restore;
pub mod transport;

pub use node::{MetaError, MetadataNode, Role};
pub use transport::{BlockClient, PeerClient, TransportError};
