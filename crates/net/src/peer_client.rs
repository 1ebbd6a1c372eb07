//! gRPC client implementing `PeerClient`.
//!
//! `GrpcPeerClient` connects to peer metadata nodes via tonic and
//! translates between proto types and the domain `FileRecord` /
//! `TransportError` types. One instance serves every peer, with a pool
//! of cached channels keyed by node name.

use crate::convert;
use async_trait::async_trait;
use blocksync_common::{FileRecord, NodeAddr};
use blocksync_meta::{PeerClient, TransportError};
use blocksync_proto::common as pb;
use blocksync_proto::meta::metadata_store_client::MetadataStoreClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tonic::transport::{Channel, Endpoint};

#[derive(Debug)]
pub struct GrpcPeerClient {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
    rpc_timeout: Duration,
}

impl GrpcPeerClient {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            rpc_timeout,
        }
    }

    async fn get_channel(&self, target: &NodeAddr) -> Result<Channel, TransportError> {
        // Check cache first
        {
            let cache = self.channels.read().await;
            if let Some(channel) = cache.get(&target.name) {
                return Ok(channel.clone());
            }
        }

        // Create new connection
        let endpoint = format!("http://{}", target.addr);
        let channel = Endpoint::from_shared(endpoint)
            .map_err(|e| TransportError::Rpc(format!("invalid endpoint: {}", e)))?
            .timeout(self.rpc_timeout)
            .connect()
            .await
            .map_err(|e| TransportError::Rpc(format!("connect failed: {}", e)))?;

        // Cache it
        {
            let mut cache = self.channels.write().await;
            cache.insert(target.name.clone(), channel.clone());
        }

        Ok(channel)
    }

    async fn client(
        &self,
        target: &NodeAddr,
    ) -> Result<MetadataStoreClient<Channel>, TransportError> {
        Ok(MetadataStoreClient::new(self.get_channel(target).await?))
    }
}

#[async_trait]
impl PeerClient for GrpcPeerClient {
    async fn append(
        &self,
        target: &NodeAddr,
        filename: &str,
        record: &FileRecord,
    ) -> Result<(), TransportError> {
        let m = blocksync_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["append"]).inc();
        let _timer = blocksync_metrics::start_rpc_timer("append", "outbound");

        let mut client = self.client(target).await?;
        client
            .append(convert::file_info(filename, record))
            .await
            .map_err(|e| TransportError::Rpc(format!("append RPC failed: {}", e)))?;
        Ok(())
    }

    async fn log_length(&self, target: &NodeAddr) -> Result<u64, TransportError> {
        let m = blocksync_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type
            .with_label_values(&["get_log_length"])
            .inc();

        let mut client = self.client(target).await?;
        let resp = client
            .get_log_length(pb::Empty {})
            .await
            .map_err(|e| TransportError::Rpc(format!("get_log_length RPC failed: {}", e)))?;
        Ok(resp.into_inner().length)
    }

    async fn log_entry(&self, target: &NodeAddr, index: u64) -> Result<String, TransportError> {
        let m = blocksync_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type
            .with_label_values(&["get_log_entry"])
            .inc();

        let mut client = self.client(target).await?;
        let resp = client
            .get_log_entry(blocksync_proto::meta::LogIndex { index })
            .await
            .map_err(|e| TransportError::Rpc(format!("get_log_entry RPC failed: {}", e)))?
            .into_inner();

        if !resp.found {
            return Err(TransportError::Rpc(format!(
                "log entry {} out of range on {}",
                index, target
            )));
        }
        Ok(resp.filename)
    }

    async fn current_record(
        &self,
        target: &NodeAddr,
        filename: &str,
    ) -> Result<FileRecord, TransportError> {
        let m = blocksync_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type
            .with_label_values(&["get_current_record"])
            .inc();

        let mut client = self.client(target).await?;
        let resp = client
            .get_current_record(blocksync_proto::meta::FileRequest {
                filename: filename.to_string(),
            })
            .await
            .map_err(|e| TransportError::Rpc(format!("get_current_record RPC failed: {}", e)))?
            .into_inner();

        let info = resp
            .info
            .filter(|_| resp.found)
            .ok_or_else(|| TransportError::Rpc(format!("no record for {} on {}", filename, target)))?;
        Ok(convert::record_from_info(&info))
    }

    async fn restore(&self, target: &NodeAddr) -> Result<(), TransportError> {
        let m = blocksync_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["restore"]).inc();
        let _timer = blocksync_metrics::start_rpc_timer("restore", "outbound");

        let mut client = self.client(target).await?;
        client
            .restore(pb::Empty {})
            .await
            .map_err(|e| TransportError::Rpc(format!("restore RPC failed: {}", e)))?;
        Ok(())
    }
}
