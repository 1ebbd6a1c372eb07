//! metad: entry point for a blocksync metadata node.
//!
//! Loads the cluster config, finds this node in it by name, builds the
//! role context (the leader gets its follower address book and the
//! block-store handle, a follower gets its leader's address), then
//! serves the metadata and admin gRPC services. The leader additionally
//! runs the periodic restore nudge until shutdown.

use blocksync_meta::restore::{spawn_restore_task, RestoreTaskConfig};
use blocksync_meta::{BlockClient, MetadataNode, Role};
use blocksync_net::{build_meta_server, GrpcBlockClient, GrpcPeerClient};
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    blocksync_metrics::init_tracing();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .unwrap_or_else(|| "cluster.yaml".to_string());
    let node_name = args
        .next()
        .ok_or("usage: metad <config.yaml> <node-name>")?;

    let config = blocksync_config::load_from_file(std::path::Path::new(&config_path))?;
    let me = config
        .node(&node_name)
        .ok_or_else(|| format!("node '{}' not listed in {}", node_name, config_path))?
        .clone();

    let rpc_timeout = Duration::from_millis(config.replication.rpc_timeout_ms);
    let push_timeout = Duration::from_millis(config.replication.push_timeout_ms);
    let peers = Arc::new(GrpcPeerClient::new(rpc_timeout));

    let role = if config.is_leader(&node_name) {
        let blocks = Arc::new(GrpcBlockClient::new(config.block_store, rpc_timeout));
        if let Err(e) = blocks.ping().await {
            tracing::warn!("block store at {} not reachable yet: {}", config.block_store, e);
        }
        Role::Leader {
            followers: config.peers_of(&node_name),
            blocks,
        }
    } else {
        let leader = config
            .leader_addr()
            .ok_or("leader missing from config")?
            .clone();
        Role::Follower { leader }
    };

    let node = Arc::new(MetadataNode::new(
        node_name.clone(),
        role,
        peers.clone(),
        push_timeout,
    ));
    tracing::info!(
        node = %node_name,
        role = node.role_name(),
        "metadata node listening on {}",
        me.addr
    );

    // The leader nudges every follower on a fixed interval; the handle
    // is aborted on shutdown.
    let restore_task = if node.is_leader() {
        let followers = config.peers_of(&node_name);
        (!followers.is_empty()).then(|| {
            spawn_restore_task(
                peers,
                followers,
                RestoreTaskConfig {
                    interval: Duration::from_secs(config.replication.restore_interval_secs),
                    call_timeout: rpc_timeout,
                },
            )
        })
    } else {
        None
    };

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr: std::net::SocketAddr = format!("0.0.0.0:{}", metrics_port).parse()?;
        tokio::spawn(async move {
            if let Err(e) = blocksync_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    // Serve with graceful shutdown on Ctrl+C
    let router = build_meta_server(node);
    tokio::select! {
        result = router.serve(me.addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    if let Some(handle) = restore_task {
        handle.abort();
    }

    Ok(())
}
