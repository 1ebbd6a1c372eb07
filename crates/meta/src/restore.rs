//! Background task nudging followers to self-heal.
//!
//! The leader periodically calls `Restore` on every follower,
//! unconditionally and without backoff: a healthy follower treats the
//! nudge as a no-op, a crashed one runs catch-up against the leader. A
//! perpetually crashed follower is simply nudged forever at the same
//! rate.

use crate::transport::PeerClient;
use blocksync_common::NodeAddr;
use std::sync::Arc;
use tokio::time::{interval, Duration};

/// Configuration for the restore nudge task.
#[derive(Debug, Clone)]
pub struct RestoreTaskConfig {
    /// How often every follower is nudged.
    pub interval: Duration,
    /// Deadline for a single nudge.
    pub call_timeout: Duration,
}

impl Default for RestoreTaskConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Spawn the periodic restore task.
///
/// Returns the `JoinHandle`; the caller aborts it on shutdown, which is
/// the task's only cancellation point.
pub fn spawn_restore_task<P: PeerClient>(
    peers: Arc<P>,
    followers: Vec<NodeAddr>,
    config: RestoreTaskConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(config.interval);
        loop {
            tick.tick().await;
            nudge_followers(&peers, &followers, config.call_timeout).await;
        }
    })
}

/// One nudge cycle over every follower.
pub async fn nudge_followers<P: PeerClient>(
    peers: &Arc<P>,
    followers: &[NodeAddr],
    call_timeout: Duration,
) {
    for follower in followers {
        blocksync_metrics::metrics().restores_nudged.inc();
        match tokio::time::timeout(call_timeout, peers.restore(follower)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(follower = %follower, "restore nudge failed: {}", e);
            }
            Err(_) => {
                tracing::debug!(follower = %follower, "restore nudge timed out");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
