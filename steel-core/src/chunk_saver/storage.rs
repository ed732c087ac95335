//! Chunk storage abstraction.
//!
//! This module provides the `ChunkStorage` enum which abstracts chunk persistence.
//! Chunks are kept in memory (via `RamOnlyStorage`) or handed to any [`ChunkIo`] backend.
use std::{io, sync::Arc};

use futures::future::BoxFuture;
use steel_utils::ChunkPos;

use super::{SerializedChunk, ram_only::RamOnlyStorage};

/// An asynchronous chunk persistence backend.
pub trait ChunkIo: Send + Sync {
    /// Reads the chunk at `pos`. `None` if nothing was stored there.
    fn read(&self, pos: ChunkPos) -> BoxFuture<'_, io::Result<Option<SerializedChunk>>>;

    /// Writes `chunk` at `pos`.
    fn write(&self, pos: ChunkPos, chunk: SerializedChunk) -> BoxFuture<'_, io::Result<()>>;

    /// Waits until every accepted write is durable.
    fn flush(&self) -> BoxFuture<'_, io::Result<()>>;
}

/// Chunk storage backend.
pub enum ChunkStorage {
    /// In-memory storage for testing and minigames.
    RamOnly(RamOnlyStorage),
    /// Any other backend.
    Custom(Arc<dyn ChunkIo>),
}

impl ChunkStorage {
    /// Loads a chunk from storage.
    ///
    /// Returns `Ok(None)` if the chunk doesn't exist in storage.
    pub async fn read(&self, pos: ChunkPos) -> io::Result<Option<SerializedChunk>> {
        match self {
            Self::RamOnly(ram) => Ok(ram.read(pos).await),
            Self::Custom(io) => io.read(pos).await,
        }
    }

    /// Saves a chunk to storage.
    pub async fn write(&self, pos: ChunkPos, chunk: SerializedChunk) -> io::Result<()> {
        match self {
            Self::RamOnly(ram) => {
                ram.write(pos, chunk).await;
                Ok(())
            }
            Self::Custom(io) => io.write(pos, chunk).await,
        }
    }

    /// Flushes pending writes.
    pub async fn flush(&self) -> io::Result<()> {
        match self {
            Self::RamOnly(_) => Ok(()),
            Self::Custom(io) => io.flush().await,
        }
    }
}
