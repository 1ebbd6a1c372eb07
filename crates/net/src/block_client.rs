//! gRPC client implementing `BlockClient`.
//!
//! The leader's handle to the block store server. A single lazily
//! connected channel is cached for the process lifetime.

use async_trait::async_trait;
use blocksync_meta::{BlockClient, TransportError};
use blocksync_proto::block::block_store_client::BlockStoreClient;
use blocksync_proto::common as pb;
use std::net::SocketAddr;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tonic::transport::{Channel, Endpoint};

#[derive(Debug)]
pub struct GrpcBlockClient {
    addr: SocketAddr,
    channel: RwLock<Option<Channel>>,
    rpc_timeout: Duration,
}

impl GrpcBlockClient {
    pub fn new(addr: SocketAddr, rpc_timeout: Duration) -> Self {
        Self {
            addr,
            channel: RwLock::new(None),
            rpc_timeout,
        }
    }

    async fn get_channel(&self) -> Result<Channel, TransportError> {
        {
            let cache = self.channel.read().await;
            if let Some(channel) = cache.as_ref() {
                return Ok(channel.clone());
            }
        }

        let endpoint = format!("http://{}", self.addr);
        let channel = Endpoint::from_shared(endpoint)
            .map_err(|e| TransportError::Rpc(format!("invalid endpoint: {}", e)))?
            .timeout(self.rpc_timeout)
            .connect()
            .await
            .map_err(|e| TransportError::Rpc(format!("connect failed: {}", e)))?;

        *self.channel.write().await = Some(channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl BlockClient for GrpcBlockClient {
    async fn has(&self, hash: &str) -> Result<bool, TransportError> {
        let m = blocksync_metrics::metrics();
        m.rpcs_sent.inc();
        m.rpcs_sent_by_type.with_label_values(&["has_block"]).inc();
        let _timer = blocksync_metrics::start_rpc_timer("has_block", "outbound");

        let mut client = BlockStoreClient::new(self.get_channel().await?);
        let resp = client
            .has_block(blocksync_proto::block::BlockRequest {
                hash: hash.to_string(),
            })
            .await
            .map_err(|e| TransportError::Rpc(format!("has_block RPC failed: {}", e)))?;
        Ok(resp.into_inner().answer)
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut client = BlockStoreClient::new(self.get_channel().await?);
        client
            .ping(pb::Empty {})
            .await
            .map_err(|e| TransportError::Rpc(format!("ping RPC failed: {}", e)))?;
        Ok(())
    }
}
