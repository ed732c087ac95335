//! RAM-only chunk storage.
//!
//! This module provides an in-memory chunk storage implementation that
//! doesn't persist chunks to disk. Useful for:
//! - Testing
//! - Minigame worlds
//! - Temporary worlds that don't need persistence
use scc::HashMap;
use steel_utils::ChunkPos;

use super::SerializedChunk;

/// In-memory chunk storage.
///
/// Written chunks are kept until the storage is dropped. A read of a position that was never
/// written returns nothing, which makes the chunk system start that chunk from scratch.
pub struct RamOnlyStorage {
    chunks: HashMap<i64, SerializedChunk>,
}

impl RamOnlyStorage {
    /// Creates a storage without any chunks. Every chunk gets generated on first use.
    #[must_use]
    pub fn empty_world() -> Self {
        Self {
            chunks: HashMap::new(),
        }
    }

    /// Creates a storage holding `chunks`.
    #[must_use]
    pub fn preloaded(chunks: impl IntoIterator<Item = SerializedChunk>) -> Self {
        let storage = Self::empty_world();
        for chunk in chunks {
            let _ = storage.chunks.upsert_sync(chunk.pos.as_i64(), chunk);
        }
        storage
    }

    /// Reads the chunk at `pos`.
    pub async fn read(&self, pos: ChunkPos) -> Option<SerializedChunk> {
        self.chunks
            .read_async(&pos.as_i64(), |_, chunk| chunk.clone())
            .await
    }

    /// Stores `chunk` at `pos`, replacing what was there.
    pub async fn write(&self, pos: ChunkPos, chunk: SerializedChunk) {
        let _ = self.chunks.upsert_async(pos.as_i64(), chunk).await;
    }

    /// The stored chunk at `pos`, if any.
    #[must_use]
    pub fn get(&self, pos: ChunkPos) -> Option<SerializedChunk> {
        self.chunks.read_sync(&pos.as_i64(), |_, chunk| chunk.clone())
    }

    /// The number of stored chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether no chunk is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_access::ChunkStatus, section::LevelHeight};

    #[tokio::test]
    async fn test_writes_are_read_back() {
        let storage = RamOnlyStorage::empty_world();
        let pos = ChunkPos::new(4, 5);
        assert!(storage.read(pos).await.is_none());

        let mut chunk = SerializedChunk::empty(pos, LevelHeight::default());
        chunk.status = ChunkStatus::Noise;
        storage.write(pos, chunk.clone()).await;

        assert_eq!(storage.read(pos).await, Some(chunk));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_preloaded_chunks_are_visible() {
        let pos = ChunkPos::new(-1, 0);
        let storage =
            RamOnlyStorage::preloaded([SerializedChunk::empty(pos, LevelHeight::default())]);
        assert!(storage.get(pos).is_some());
        assert!(storage.get(ChunkPos::new(0, 0)).is_none());
    }
}
