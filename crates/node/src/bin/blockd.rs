//! blockd: entry point for the blocksync block store server.
//!
//! Loads the cluster config for the listen address and serves the
//! content-addressed block store over gRPC.

use blocksync_block::BlockStore;
use blocksync_net::build_block_server;
use std::sync::Arc;
use tokio::sync::RwLock;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    blocksync_metrics::init_tracing();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "cluster.yaml".to_string());
    let config = blocksync_config::load_from_file(std::path::Path::new(&config_path))?;

    let store = Arc::new(RwLock::new(BlockStore::new()));
    tracing::info!("block store listening on {}", config.block_store);

    let router = build_block_server(store);
    tokio::select! {
        result = router.serve(config.block_store) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
