//! Generated gRPC code for the blocksync protobuf definitions.

/// Shared messages (FileInfo, WriteResult, SimpleAnswer).
pub mod common {
    tonic::include_proto!("blocksync.common");
}

/// Block store service (StoreBlock, GetBlock, HasBlock, Ping).
pub mod block {
    tonic::include_proto!("blocksync.block");
}

/// Metadata service: client-facing operations plus the node-to-node
/// replication surface (Append, GetLogLength, GetLogEntry,
/// GetCurrentRecord, Restore).
pub mod meta {
    tonic::include_proto!("blocksync.meta");
}

/// Admin service (Health, GetStats).
pub mod admin {
    tonic::include_proto!("blocksync.admin");
}
