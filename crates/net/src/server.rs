//! gRPC service implementations.
//!
//! Bridges the tonic-generated service traits to the domain logic in
//! `blocksync-meta` and `blocksync-block`.

use crate::convert;
use blocksync_block::BlockStore;
use blocksync_meta::{BlockClient, MetadataNode, PeerClient};
use blocksync_proto::common as pb;
use std::sync::Arc;
use std::time::Instant as StdInstant;
use tokio::sync::RwLock;
use tonic::{Request, Response, Status};

// ---------------------------------------------------------------------------
// Metadata gRPC service
// ---------------------------------------------------------------------------

pub struct MetadataStoreService<P: PeerClient, B: BlockClient> {
    pub node: Arc<MetadataNode<P, B>>,
}

impl<P: PeerClient, B: BlockClient> std::fmt::Debug for MetadataStoreService<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStoreService").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl<P: PeerClient, B: BlockClient> blocksync_proto::meta::metadata_store_server::MetadataStore
    for MetadataStoreService<P, B>
{
    async fn ping(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Empty>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        Ok(Response::new(pb::Empty {}))
    }

    async fn read_file(
        &self,
        request: Request<blocksync_proto::meta::FileRequest>,
    ) -> Result<Response<pb::FileInfo>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["read_file"])
            .inc();
        m.meta_reads.inc();
        let _timer = blocksync_metrics::start_rpc_timer("read_file", "inbound");
        let req = request.into_inner();

        let record = self.node.read_file(&req.filename).await;
        Ok(Response::new(convert::file_info(&req.filename, &record)))
    }

    async fn modify_file(
        &self,
        request: Request<pb::FileInfo>,
    ) -> Result<Response<pb::WriteResult>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["modify_file"])
            .inc();
        m.meta_modifies.inc();
        let _timer = blocksync_metrics::start_rpc_timer("modify_file", "inbound");
        let req = request.into_inner();

        let outcome = self
            .node
            .modify_file(&req.filename, req.version, req.blocklist)
            .await
            .map_err(|e| Status::unavailable(format!("block store unreachable: {}", e)))?;

        m.write_outcomes.with_label_values(&[outcome.label()]).inc();
        Ok(Response::new(convert::write_result(&outcome)))
    }

    async fn delete_file(
        &self,
        request: Request<blocksync_proto::meta::DeleteRequest>,
    ) -> Result<Response<pb::WriteResult>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["delete_file"])
            .inc();
        m.meta_deletes.inc();
        let _timer = blocksync_metrics::start_rpc_timer("delete_file", "inbound");
        let req = request.into_inner();

        let outcome = self.node.delete_file(&req.filename, req.version).await;
        m.write_outcomes.with_label_values(&[outcome.label()]).inc();
        Ok(Response::new(convert::write_result(&outcome)))
    }

    async fn get_version(
        &self,
        request: Request<blocksync_proto::meta::FileRequest>,
    ) -> Result<Response<blocksync_proto::meta::GetVersionResponse>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        let req = request.into_inner();

        // A never-touched filename is data, not a fault.
        let resp = match self.node.get_version(&req.filename).await {
            Ok(version) => blocksync_proto::meta::GetVersionResponse {
                found: true,
                version,
            },
            Err(_) => blocksync_proto::meta::GetVersionResponse {
                found: false,
                version: 0,
            },
        };
        Ok(Response::new(resp))
    }

    async fn is_leader(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::SimpleAnswer>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        Ok(Response::new(pb::SimpleAnswer {
            answer: self.node.is_leader(),
        }))
    }

    async fn is_crashed(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::SimpleAnswer>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        Ok(Response::new(pb::SimpleAnswer {
            answer: self.node.is_crashed(),
        }))
    }

    async fn crash(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Empty>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        self.node.crash();
        Ok(Response::new(pb::Empty {}))
    }

    async fn print_log(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<blocksync_proto::meta::LogDump>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        let entries = self.node.log_entries().await;
        for (i, filename) in entries.iter().enumerate() {
            tracing::info!(node = self.node.name(), index = i, filename = %filename, "log");
        }
        Ok(Response::new(blocksync_proto::meta::LogDump { entries }))
    }

    async fn append(
        &self,
        request: Request<pb::FileInfo>,
    ) -> Result<Response<pb::Empty>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type.with_label_values(&["append"]).inc();
        let req = request.into_inner();

        // The ack is identical whether the snapshot was applied or
        // dropped by a crashed node.
        self.node
            .apply_append(&req.filename, req.version, req.blocklist)
            .await;
        Ok(Response::new(pb::Empty {}))
    }

    async fn get_log_length(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<blocksync_proto::meta::LogLength>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        Ok(Response::new(blocksync_proto::meta::LogLength {
            length: self.node.log_length().await,
        }))
    }

    async fn get_log_entry(
        &self,
        request: Request<blocksync_proto::meta::LogIndex>,
    ) -> Result<Response<blocksync_proto::meta::LogEntry>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        let req = request.into_inner();

        let resp = match self.node.log_entry(req.index).await {
            Ok(filename) => blocksync_proto::meta::LogEntry {
                found: true,
                filename,
            },
            Err(_) => blocksync_proto::meta::LogEntry {
                found: false,
                filename: String::new(),
            },
        };
        Ok(Response::new(resp))
    }

    async fn get_current_record(
        &self,
        request: Request<blocksync_proto::meta::FileRequest>,
    ) -> Result<Response<blocksync_proto::meta::RecordResponse>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        let req = request.into_inner();

        let resp = match self.node.current_record(&req.filename).await {
            Ok(record) => blocksync_proto::meta::RecordResponse {
                found: true,
                info: Some(convert::file_info(&req.filename, &record)),
            },
            Err(_) => blocksync_proto::meta::RecordResponse {
                found: false,
                info: None,
            },
        };
        Ok(Response::new(resp))
    }

    async fn restore(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Empty>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["restore"])
            .inc();

        self.node
            .restore_from_leader()
            .await
            .map_err(|e| Status::unavailable(format!("catch-up failed: {}", e)))?;
        Ok(Response::new(pb::Empty {}))
    }
}

// ---------------------------------------------------------------------------
// Block store gRPC service
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct BlockStoreService {
    pub store: Arc<RwLock<BlockStore>>,
}

#[tonic::async_trait]
impl blocksync_proto::block::block_store_server::BlockStore for BlockStoreService {
    async fn ping(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<pb::Empty>, Status> {
        blocksync_metrics::metrics().rpcs_received.inc();
        Ok(Response::new(pb::Empty {}))
    }

    async fn store_block(
        &self,
        request: Request<blocksync_proto::block::Block>,
    ) -> Result<Response<pb::Empty>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["store_block"])
            .inc();
        let req = request.into_inner();

        let mut store = self.store.write().await;
        store.store(&req.hash, req.data);
        m.blocks_stored.inc();
        Ok(Response::new(pb::Empty {}))
    }

    async fn get_block(
        &self,
        request: Request<blocksync_proto::block::BlockRequest>,
    ) -> Result<Response<blocksync_proto::block::GetBlockResponse>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["get_block"])
            .inc();
        let req = request.into_inner();

        let store = self.store.read().await;
        let resp = match store.get(&req.hash) {
            Ok(data) => blocksync_proto::block::GetBlockResponse {
                found: true,
                block: Some(blocksync_proto::block::Block {
                    hash: req.hash,
                    data: data.to_vec(),
                }),
            },
            Err(_) => {
                m.block_misses.inc();
                blocksync_proto::block::GetBlockResponse {
                    found: false,
                    block: None,
                }
            }
        };
        Ok(Response::new(resp))
    }

    async fn has_block(
        &self,
        request: Request<blocksync_proto::block::BlockRequest>,
    ) -> Result<Response<pb::SimpleAnswer>, Status> {
        let m = blocksync_metrics::metrics();
        m.rpcs_received.inc();
        m.rpcs_received_by_type
            .with_label_values(&["has_block"])
            .inc();
        let req = request.into_inner();

        let store = self.store.read().await;
        Ok(Response::new(pb::SimpleAnswer {
            answer: store.has(&req.hash),
        }))
    }
}

// ---------------------------------------------------------------------------
// Admin gRPC service
// ---------------------------------------------------------------------------

pub struct AdminService<P: PeerClient, B: BlockClient> {
    pub node: Arc<MetadataNode<P, B>>,
    pub start_time: StdInstant,
}

impl<P: PeerClient, B: BlockClient> std::fmt::Debug for AdminService<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminService").finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl<P: PeerClient, B: BlockClient> blocksync_proto::admin::admin_server::Admin
    for AdminService<P, B>
{
    async fn health(
        &self,
        _request: Request<blocksync_proto::admin::HealthRequest>,
    ) -> Result<Response<blocksync_proto::admin::HealthResponse>, Status> {
        Ok(Response::new(blocksync_proto::admin::HealthResponse {
            healthy: true,
            node: self.node.name().to_string(),
            role: self.node.role_name().to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }))
    }

    async fn get_stats(
        &self,
        _request: Request<blocksync_proto::admin::StatsRequest>,
    ) -> Result<Response<blocksync_proto::admin::StatsResponse>, Status> {
        Ok(Response::new(blocksync_proto::admin::StatsResponse {
            file_count: self.node.file_count().await,
            log_length: self.node.log_length().await,
            crashed: self.node.is_crashed(),
            rpcs_received: blocksync_metrics::metrics().rpcs_received.get(),
        }))
    }
}
