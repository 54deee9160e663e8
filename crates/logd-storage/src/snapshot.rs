// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot materialisation: serialise a [`Node`] to bytes, store it
//! content-addressed via `logd-cas` (spec.md §3 "Snapshot", §4.C "Snapshots").

use logd_cas::{BlobHash, BlobStore, MemoryTier};
use logd_node::Node;
use std::sync::RwLock;

/// Errors materialising or reading a snapshot blob.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The node could not be serialised to CBOR.
    #[error("snapshot encode failed: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// The stored bytes could not be deserialised back into a [`Node`].
    #[error("snapshot decode failed: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
    /// The blob hash was not found in the store.
    #[error("snapshot blob missing")]
    MissingBlob,
}

/// Owns the CAS tier snapshot blobs are written to. One per `Storage`.
#[derive(Default)]
pub struct SnapshotStore {
    blobs: RwLock<MemoryTier>,
}

impl SnapshotStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(MemoryTier::new()),
        }
    }

    /// Serialise `state` and store it, returning its content hash.
    ///
    /// # Errors
    /// [`SnapshotError::Encode`] if CBOR encoding fails.
    pub fn put(&self, state: &Node) -> Result<BlobHash, SnapshotError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(state, &mut bytes)?;
        #[allow(clippy::unwrap_used)]
        let hash = self.blobs.write().unwrap().put(&bytes);
        Ok(hash)
    }

    /// Fetch and deserialise the state stored at `hash`.
    ///
    /// # Errors
    /// [`SnapshotError::MissingBlob`] if `hash` is unknown; [`SnapshotError::Decode`]
    /// if the bytes are not a valid `Node`.
    pub fn get(&self, hash: &BlobHash) -> Result<Node, SnapshotError> {
        #[allow(clippy::unwrap_used)]
        let bytes = self.blobs.read().unwrap().get(hash).ok_or(SnapshotError::MissingBlob)?;
        Ok(ciborium::from_reader(&bytes[..])?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::Value;

    #[test]
    fn round_trips_a_node_through_the_blob_store() {
        let store = SnapshotStore::new();
        let node = Node::new(Value::String("alice".into()));
        let hash = store.put(&node).unwrap();
        assert_eq!(store.get(&hash).unwrap(), node);
    }

    #[test]
    fn missing_hash_errors() {
        let store = SnapshotStore::new();
        assert!(matches!(store.get(&BlobHash([0u8; 32])), Err(SnapshotError::MissingBlob)));
    }
}
