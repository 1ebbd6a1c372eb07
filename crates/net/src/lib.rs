//! gRPC networking layer for blocksync.
//!
//! Provides:
//! - `GrpcPeerClient`: implements `PeerClient` over tonic for real network I/O
//! - `GrpcBlockClient`: implements `BlockClient` over tonic
//! - `MetadataStoreService`: bridges the metadata proto to `MetadataNode`
//! - `BlockStoreService`: bridges the block proto to `BlockStore`
//! - `AdminService`: health checks and stats
//! - `build_meta_server` / `build_block_server`: assemble tonic `Router`s

pub mod block_client;
pub mod convert;
pub mod peer_client;
pub mod server;

pub use block_client::GrpcBlockClient;
pub use peer_client::GrpcPeerClient;
pub use server::{AdminService, BlockStoreService, MetadataStoreService};

use blocksync_block::BlockStore;
use blocksync_meta::{BlockClient, MetadataNode, PeerClient};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Build a tonic `Router` serving a metadata node (metadata + admin).
pub fn build_meta_server<P: PeerClient, B: BlockClient>(
    node: Arc<MetadataNode<P, B>>,
) -> tonic::transport::server::Router {
    let meta_svc = MetadataStoreService { node: node.clone() };
    let admin_svc = AdminService {
        node,
        start_time: Instant::now(),
    };

    tonic::transport::Server::builder()
        .add_service(
            blocksync_proto::meta::metadata_store_server::MetadataStoreServer::new(meta_svc),
        )
        .add_service(blocksync_proto::admin::admin_server::AdminServer::new(
            admin_svc,
        ))
}

/// Build a tonic `Router` serving the block store.
pub fn build_block_server(store: Arc<RwLock<BlockStore>>) -> tonic::transport::server::Router {
    let block_svc = BlockStoreService { store };

    tonic::transport::Server::builder().add_service(
        blocksync_proto::block::block_store_server::BlockStoreServer::new(block_svc),
    )
}
