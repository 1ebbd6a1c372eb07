//! blocksync-block: content-addressed block store.
//!
//! The leaf component of the system: an in-memory map from content hash
//! to immutable bytes. The store never checks that data actually hashes
//! to its key; producers compute hashes with
//! [`blocksync_common::block_hash`] and are trusted to get it right.
//!
//! All operations are synchronous; the async boundary is at the caller
//! (the gRPC layer wraps the store in an `RwLock`).

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block not found: {0}")]
    NotFound(String),
}

/// In-memory content-addressed blob store.
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: HashMap<String, Vec<u8>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the blob under `hash`. Never fails; storing
    /// the same content twice is an idempotent overwrite.
    pub fn store(&mut self, hash: &str, data: Vec<u8>) {
        tracing::trace!(hash, len = data.len(), "store block");
        self.blocks.insert(hash.to_string(), data);
    }

    /// Fetch the blob under `hash`, or an explicit miss for an unknown
    /// hash. Never panics on a missing key.
    pub fn get(&self, hash: &str) -> Result<&[u8], BlockError> {
        self.blocks
            .get(hash)
            .map(Vec::as_slice)
            .ok_or_else(|| BlockError::NotFound(hash.to_string()))
    }

    /// Membership test.
    pub fn has(&self, hash: &str) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
