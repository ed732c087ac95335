//! Callbacks the chunk system invokes on the rest of the server.
//!
//! Every hook has a no-op default so embedders only implement what they care about.
use std::{io, sync::Arc};

use steel_utils::ChunkPos;

use crate::chunk::{chunk_access::FullChunkStatus, chunk_holder::ChunkChanges};

/// Told about tier changes of loaded chunks. Always called on the main thread.
pub trait ChunkStatusListener: Send + Sync {
    /// The confirmed tier of `pos` changed to `status`.
    fn on_full_chunk_status_change(&self, _pos: ChunkPos, _status: FullChunkStatus) {}

    /// The chunk at `pos` was saved and dropped from memory.
    fn on_chunk_unloaded(&self, _pos: ChunkPos) {}
}

/// Storage living next to the chunks, such as points of interest or entities.
pub trait ChunkStorageHooks: Send + Sync {
    /// Called before the chunk at `pos` is saved.
    fn flush_on_save(&self, _pos: ChunkPos) {}

    /// Called when the chunk at `pos` starts loading from storage.
    fn prefetch_on_load(&self, _pos: ChunkPos) {}
}

/// Central sink for contained storage failures.
pub trait ChunkFailureReporter: Send + Sync {
    /// Reading the chunk at `pos` failed. An empty chunk is used instead.
    fn report_load_failure(&self, _pos: ChunkPos, _error: &io::Error) {}

    /// Writing the chunk at `pos` failed.
    fn report_save_failure(&self, _pos: ChunkPos, _error: &io::Error) {}
}

/// Receives block and light changes of ticking chunks once per tick.
pub trait ChunkUpdateBroadcaster: Send + Sync {
    /// Sends `changes` to whoever watches the chunk.
    fn broadcast(&self, _changes: ChunkChanges) {}
}

/// A hook implementation that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ChunkStatusListener for NoopHooks {}
impl ChunkStorageHooks for NoopHooks {}
impl ChunkFailureReporter for NoopHooks {}
impl ChunkUpdateBroadcaster for NoopHooks {}

/// Every hook of a chunk map.
#[derive(Clone)]
pub struct ChunkMapHooks {
    /// Tier change and unload notifications.
    pub status_listener: Arc<dyn ChunkStatusListener>,
    /// Companion storage flushing and prefetching.
    pub storage: Arc<dyn ChunkStorageHooks>,
    /// Storage failures.
    pub failure_reporter: Arc<dyn ChunkFailureReporter>,
    /// Change broadcasting.
    pub broadcaster: Arc<dyn ChunkUpdateBroadcaster>,
}

impl Default for ChunkMapHooks {
    fn default() -> Self {
        let noop = Arc::new(NoopHooks);
        Self {
            status_listener: noop.clone(),
            storage: noop.clone(),
            failure_reporter: noop.clone(),
            broadcaster: noop,
        }
    }
}
