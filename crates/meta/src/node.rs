//! The metadata node: write-acceptance protocol, operation log,
//! replication push, and crash recovery.
//!
//! One [`MetadataNode`] exists per process. Its role is fixed at
//! construction from static configuration and never changes; only the
//! leader accepts writes and owns a block-store handle, while followers
//! serve stale-consistent reads and receive replicated snapshots.
//!
//! The record table and the log share a single mutex, held across the
//! block-store checks inside `modify_file`. That makes every
//! read-check-mutate-log sequence one critical section, so the log
//! append order is exactly the order in which writes committed.

use crate::transport::{BlockClient, PeerClient, TransportError};
use blocksync_common::{FileRecord, NodeAddr, WriteOutcome};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("file not tracked: {0}")]
    NotFound(String),
    #[error("log index {index} out of range (length {length})")]
    LogIndexOutOfRange { index: u64, length: u64 },
}

/// The node's fixed role, decided at startup from the cluster config.
///
/// Carried as a tagged variant on the node context instead of
/// process-wide flags: the leader holds its follower address book and
/// the block-store handle, a follower holds its leader's address.
pub enum Role<B> {
    Leader {
        followers: Vec<NodeAddr>,
        blocks: Arc<B>,
    },
    Follower {
        leader: NodeAddr,
    },
}

/// Record table plus operation log, guarded together.
#[derive(Debug, Default)]
struct NodeState {
    records: HashMap<String, FileRecord>,
    log: Vec<String>,
}

impl NodeState {
    fn record(&self, filename: &str) -> Option<FileRecord> {
        self.records.get(filename).cloned()
    }
}

/// A metadata node. Generic over the peer and block-store transports:
/// real deployment uses the gRPC clients from `blocksync-net`; unit
/// tests use mocks.
pub struct MetadataNode<P: PeerClient, B: BlockClient> {
    name: String,
    role: Role<B>,
    peers: Arc<P>,
    state: Mutex<NodeState>,
    /// Simulated-outage marker; meaningful on followers only.
    crashed: AtomicBool,
    push_timeout: Duration,
}

impl<P: PeerClient, B: BlockClient> std::fmt::Debug for MetadataNode<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataNode")
            .field("name", &self.name)
            .field("role", &self.role_name())
            .finish_non_exhaustive()
    }
}

impl<P: PeerClient, B: BlockClient> MetadataNode<P, B> {
    pub fn new(name: impl Into<String>, role: Role<B>, peers: Arc<P>, push_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            role,
            peers,
            state: Mutex::new(NodeState::default()),
            crashed: AtomicBool::new(false),
            push_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader { .. })
    }

    pub fn role_name(&self) -> &'static str {
        if self.is_leader() {
            "leader"
        } else {
            "follower"
        }
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Enter the simulated-outage state. Leaders ignore this: the crash
    /// model only exists to exercise follower recovery.
    pub fn crash(&self) {
        if !self.is_leader() {
            tracing::info!(node = %self.name, "entering simulated crash");
            self.crashed.store(true, Ordering::SeqCst);
        }
    }

    // -----------------------------------------------------------------------
    // Client-facing operations
    // -----------------------------------------------------------------------

    /// Read a file's current record.
    ///
    /// An unseen filename is lazily tracked as `(version 0, tombstone)`,
    /// and every read appends the filename to the operation log. Reads
    /// are served on any node; only writes are leader-restricted.
    pub async fn read_file(&self, filename: &str) -> FileRecord {
        let record = {
            let mut st = self.state.lock().await;
            let record = st
                .records
                .entry(filename.to_string())
                .or_insert_with(|| FileRecord::tombstone(0))
                .clone();
            st.log.push(filename.to_string());
            record
        };
        self.push_to_followers(filename, &record).await;
        record
    }

    /// Apply a versioned write.
    ///
    /// Guard chain, each step terminal:
    /// 1. follower → `NotLeader`, no state change, no push
    /// 2. unseen filename → lazily tracked at `(0, tombstone)`
    /// 3. `version <= current` → `OldVersion(current)`, no mutation
    /// 4. any referenced hash absent from the block store →
    ///    `MissingBlocks` with every absent hash, no mutation
    /// 5. commit: replace blocklist, set version, append to log
    ///
    /// After any branch past step 1, the filename's post-decision record
    /// is pushed to every follower regardless of the outcome.
    pub async fn modify_file(
        &self,
        filename: &str,
        version: u64,
        blocks: Vec<String>,
    ) -> Result<WriteOutcome, TransportError> {
        let Role::Leader { blocks: store, .. } = &self.role else {
            return Ok(WriteOutcome::NotLeader);
        };

        let (outcome, snapshot) = {
            let mut st = self.state.lock().await;
            let current = st
                .records
                .entry(filename.to_string())
                .or_insert_with(|| FileRecord::tombstone(0))
                .version;

            if version <= current {
                (WriteOutcome::OldVersion(current), st.record(filename))
            } else {
                // The has-checks run under the state lock so the whole
                // check-commit sequence is a single critical section.
                let mut missing = Vec::new();
                for hash in &blocks {
                    if !store.has(hash).await? {
                        missing.push(hash.clone());
                    }
                }
                if !missing.is_empty() {
                    (WriteOutcome::MissingBlocks(missing), st.record(filename))
                } else {
                    let record = FileRecord::new(version, blocks);
                    st.records.insert(filename.to_string(), record.clone());
                    st.log.push(filename.to_string());
                    (WriteOutcome::Ok(version), Some(record))
                }
            }
        };

        tracing::debug!(
            node = %self.name,
            filename,
            version,
            outcome = outcome.label(),
            "modify_file"
        );
        if let Some(record) = snapshot {
            self.push_to_followers(filename, &record).await;
        }
        Ok(outcome)
    }

    /// Delete a file under the same version discipline as `modify_file`.
    ///
    /// An unseen filename yields `MissingBlocks` with an empty list
    /// ("not found"); a tracked record, live or already tombstoned, is
    /// replaced by a tombstone at the supplied version when it is newer.
    pub async fn delete_file(&self, filename: &str, version: u64) -> WriteOutcome {
        if !self.is_leader() {
            return WriteOutcome::NotLeader;
        }

        let (outcome, snapshot) = {
            let mut st = self.state.lock().await;
            match st.records.get(filename).map(|r| r.version) {
                // No record exists, so there is also nothing to push.
                None => (WriteOutcome::MissingBlocks(Vec::new()), None),
                Some(current) if version <= current => {
                    (WriteOutcome::OldVersion(current), st.record(filename))
                }
                Some(_) => {
                    let record = FileRecord::tombstone(version);
                    st.records.insert(filename.to_string(), record.clone());
                    st.log.push(filename.to_string());
                    (WriteOutcome::Ok(version), Some(record))
                }
            }
        };

        tracing::debug!(
            node = %self.name,
            filename,
            version,
            outcome = outcome.label(),
            "delete_file"
        );
        if let Some(record) = snapshot {
            self.push_to_followers(filename, &record).await;
        }
        outcome
    }

    /// Current version of a tracked filename; explicit miss otherwise.
    pub async fn get_version(&self, filename: &str) -> Result<u64, MetaError> {
        let st = self.state.lock().await;
        st.records
            .get(filename)
            .map(|r| r.version)
            .ok_or_else(|| MetaError::NotFound(filename.to_string()))
    }

    /// A copy of the operation log, for the PrintLog debug dump.
    pub async fn log_entries(&self) -> Vec<String> {
        self.state.lock().await.log.clone()
    }

    /// Number of tracked filenames.
    pub async fn file_count(&self) -> u64 {
        self.state.lock().await.records.len() as u64
    }

    // -----------------------------------------------------------------------
    // Node-to-node operations
    // -----------------------------------------------------------------------

    /// Apply a replicated snapshot pushed by the leader.
    ///
    /// While the crash flag is set the snapshot is silently dropped; the
    /// ack looks identical either way. That asymmetry is the simulated
    /// partial failure the catch-up path exists to repair.
    pub async fn apply_append(&self, filename: &str, version: u64, blocks: Vec<String>) {
        if self.is_crashed() {
            blocksync_metrics::metrics().appends_dropped.inc();
            tracing::trace!(node = %self.name, filename, "append dropped while crashed");
            return;
        }
        let mut st = self.state.lock().await;
        st.records
            .insert(filename.to_string(), FileRecord::new(version, blocks));
        st.log.push(filename.to_string());
        blocksync_metrics::metrics().appends_applied.inc();
    }

    /// Operation-log length (the catch-up watermark).
    pub async fn log_length(&self) -> u64 {
        self.state.lock().await.log.len() as u64
    }

    /// The filename at a log position; explicit error when out of range.
    pub async fn log_entry(&self, index: u64) -> Result<String, MetaError> {
        let st = self.state.lock().await;
        st.log
            .get(index as usize)
            .cloned()
            .ok_or(MetaError::LogIndexOutOfRange {
                index,
                length: st.log.len() as u64,
            })
    }

    /// Authoritative current record for a filename, used during catch-up.
    pub async fn current_record(&self, filename: &str) -> Result<FileRecord, MetaError> {
        let st = self.state.lock().await;
        st.record(filename)
            .ok_or_else(|| MetaError::NotFound(filename.to_string()))
    }

    /// Run crash recovery against the leader.
    ///
    /// No-op unless this node is a crashed follower. Otherwise: fetch
    /// the leader's log length, pull every log entry past the local
    /// length, dedup them into the set of filenames touched during the
    /// outage, fetch the leader's current record for each, then apply
    /// everything and clear the crash flag. Catch-up is state-based;
    /// intermediate versions missed during the outage are never
    /// reconstructed.
    ///
    /// All remote fetches happen before any state is applied: a
    /// transport failure mid-pass leaves the flag set, so the leader's
    /// next periodic nudge retries the whole pass.
    pub async fn restore_from_leader(&self) -> Result<(), TransportError> {
        if !self.is_crashed() {
            return Ok(());
        }
        let Role::Follower { leader } = &self.role else {
            return Ok(());
        };

        let leader_len = self.peers.log_length(leader).await?;
        let local_len = self.state.lock().await.log.len() as u64;

        let mut gap = Vec::new();
        let mut seen = HashSet::new();
        let mut touched = Vec::new();
        for index in local_len..leader_len {
            let filename = self.peers.log_entry(leader, index).await?;
            if seen.insert(filename.clone()) {
                touched.push(filename.clone());
            }
            gap.push(filename);
        }

        let mut latest = Vec::with_capacity(touched.len());
        for filename in &touched {
            let record = self.peers.current_record(leader, filename).await?;
            latest.push((filename.clone(), record));
        }

        {
            let mut st = self.state.lock().await;
            st.log.extend(gap);
            for (filename, record) in latest {
                st.records.insert(filename, record);
            }
        }
        self.crashed.store(false, Ordering::SeqCst);
        blocksync_metrics::metrics().restores_completed.inc();
        tracing::info!(
            node = %self.name,
            files = touched.len(),
            "crash recovery complete"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: replication push
    // -----------------------------------------------------------------------

    /// Push the post-decision record to every follower.
    ///
    /// Eager best-effort snapshot replication: the outcome of each push
    /// is logged and counted but never affects the client's result, and
    /// there is no vote or abort phase. A stronger protocol would slot
    /// in here without touching the write path.
    async fn push_to_followers(&self, filename: &str, record: &FileRecord) {
        let Role::Leader { followers, .. } = &self.role else {
            return;
        };
        if followers.is_empty() {
            return;
        }

        let pushes = followers.iter().map(|follower| {
            let record = record.clone();
            async move {
                let m = blocksync_metrics::metrics();
                m.pushes_sent.inc();
                match tokio::time::timeout(
                    self.push_timeout,
                    self.peers.append(follower, filename, &record),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        m.pushes_failed.inc();
                        tracing::debug!(follower = %follower, filename, "push failed: {}", e);
                    }
                    Err(_) => {
                        m.pushes_failed.inc();
                        tracing::debug!(follower = %follower, filename, "push timed out");
                    }
                }
            }
        });
        futures::future::join_all(pushes).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
