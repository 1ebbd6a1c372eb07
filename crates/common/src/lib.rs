//! blocksync-common: shared types for the blocksync project.
//!
//! Provides the `FileRecord` metadata entry, the tombstone sentinel,
//! the `WriteOutcome` contract shared by every metadata write, node
//! addressing, and the content-hash helper used by block producers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;

/// Reserved blocklist marker meaning "known filename, currently deleted".
///
/// A record whose blocklist is exactly `[TOMBSTONE]` is a tombstone; the
/// marker is not a valid content hash (real hashes are 64 hex chars).
pub const TOMBSTONE: &str = "0";

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// The metadata entry for a single filename.
///
/// `version` never decreases over the record's lifetime. `blocks` is
/// ordered: concatenating the referenced blocks in sequence reconstructs
/// the file content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub version: u64,
    pub blocks: Vec<String>,
}

impl FileRecord {
    /// A live record pointing at real content.
    pub fn new(version: u64, blocks: Vec<String>) -> Self {
        Self { version, blocks }
    }

    /// A tombstone record at the given version.
    pub fn tombstone(version: u64) -> Self {
        Self {
            version,
            blocks: vec![TOMBSTONE.to_string()],
        }
    }

    /// Whether this record marks a deleted file.
    pub fn is_tombstone(&self) -> bool {
        self.blocks.len() == 1 && self.blocks[0] == TOMBSTONE
    }
}

// ---------------------------------------------------------------------------
// WriteOutcome
// ---------------------------------------------------------------------------

/// The decision a metadata node reaches for a write request.
///
/// The variant set and its attached fields are the stable contract the
/// sync client consumes; conflict and missing-block conditions are data
/// the caller recovers from, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write committed at this version.
    Ok(u64),
    /// The supplied version was not newer than the current one.
    OldVersion(u64),
    /// Some referenced blocks are absent from the block store. Also
    /// reused (with an empty list) for "delete of an unknown filename".
    MissingBlocks(Vec<String>),
    /// This node is a follower; writes go to the leader.
    NotLeader,
}

impl WriteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, WriteOutcome::Ok(_))
    }

    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            WriteOutcome::Ok(_) => "ok",
            WriteOutcome::OldVersion(_) => "old_version",
            WriteOutcome::MissingBlocks(_) => "missing_blocks",
            WriteOutcome::NotLeader => "not_leader",
        }
    }
}

// ---------------------------------------------------------------------------
// NodeAddr
// ---------------------------------------------------------------------------

/// Address book entry for a metadata node: stable name plus listen address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddr {
    pub name: String,
    pub addr: SocketAddr,
}

impl NodeAddr {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.addr)
    }
}

// ---------------------------------------------------------------------------
// Content hashing
// ---------------------------------------------------------------------------

/// Hash a block's content to its storage key (lowercase hex SHA-256).
///
/// The block store trusts callers to pair data with this hash; nothing
/// downstream re-validates it.
pub fn block_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_record() {
        let rec = FileRecord::tombstone(0);
        assert_eq!(rec.version, 0);
        assert!(rec.is_tombstone());

        let live = FileRecord::new(1, vec![block_hash(b"chunk")]);
        assert!(!live.is_tombstone());
    }

    #[test]
    fn test_tombstone_marker_is_not_a_hash() {
        // A record holding a real hash that happens to be short-listed
        // must never be mistaken for a tombstone.
        let rec = FileRecord::new(3, vec![block_hash(b"x")]);
        assert!(!rec.is_tombstone());
        assert_ne!(block_hash(b"0"), TOMBSTONE);
    }

    #[test]
    fn test_empty_blocklist_is_not_tombstone() {
        let rec = FileRecord::new(1, vec![]);
        assert!(!rec.is_tombstone());
    }

    #[test]
    fn test_block_hash_deterministic() {
        let h1 = block_hash(b"hello");
        let h2 = block_hash(b"hello");
        assert_eq!(h1, h2);
        assert_ne!(h1, block_hash(b"world"));
    }

    #[test]
    fn test_block_hash_format() {
        let h = block_hash(b"hello");
        assert_eq!(h.len(), 64, "SHA-256 hex digest is 64 chars");
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, h.to_lowercase());
    }

    #[test]
    fn test_write_outcome_is_ok() {
        assert!(WriteOutcome::Ok(1).is_ok());
        assert!(!WriteOutcome::OldVersion(1).is_ok());
        assert!(!WriteOutcome::MissingBlocks(vec![]).is_ok());
        assert!(!WriteOutcome::NotLeader.is_ok());
    }

    #[test]
    fn test_node_addr_display() {
        let n = NodeAddr::new("meta1", "127.0.0.1:7001".parse().unwrap());
        assert_eq!(format!("{}", n), "meta1@127.0.0.1:7001");
    }

    #[test]
    fn test_node_addr_serde_roundtrip() {
        let n = NodeAddr::new("meta2", "10.0.0.2:7002".parse().unwrap());
        let yaml = serde_yaml::to_string(&n).unwrap();
        let back: NodeAddr = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(n, back);
    }
}
