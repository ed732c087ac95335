//! Result and error types of the chunk system.
use std::sync::{Arc, LazyLock};

use thiserror::Error;

use crate::chunk::{
    chunk_access::ChunkAccess,
    chunk_future::{ChunkFuture, Completable},
};

/// The outcome of asking for a chunk at some stage.
pub type ChunkResult<T> = Result<T, ChunkLoadError>;

/// Why a chunk could not be produced. These are recoverable: callers get an empty result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkLoadError {
    /// The chunk's ticket level no longer allows the requested stage.
    #[error("chunk unloaded")]
    Unloaded,
    /// A generation step failed.
    #[error("chunk generation failed: {0}")]
    Generation(String),
    /// Reading the chunk from storage failed.
    #[error("chunk load failed: {0}")]
    Io(String),
    /// Some chunk of a neighbourhood could not be provided.
    #[error("unloaded or missing chunks in range: {0}")]
    MissingChunks(String),
}

/// A broken invariant of the chunk system. Always fatal.
#[derive(Debug, Clone, Error)]
#[error("{message}\n{diagnostic}")]
pub struct ChunkSystemError {
    /// What went wrong.
    pub message: String,
    /// A snapshot of every holder's in-flight futures at the time of the failure.
    pub diagnostic: String,
}

static UNLOADED_CHUNK_FUTURE: LazyLock<ChunkFuture<Arc<ChunkAccess>>> =
    LazyLock::new(|| Completable::completed(Err(ChunkLoadError::Unloaded)));

/// The shared future every unloaded request resolves to.
#[must_use]
pub fn unloaded_chunk_future() -> ChunkFuture<Arc<ChunkAccess>> {
    UNLOADED_CHUNK_FUTURE.clone()
}

/// Returns true if `future` is the shared unloaded future.
#[must_use]
pub fn is_unloaded_future(future: &ChunkFuture<Arc<ChunkAccess>>) -> bool {
    Arc::ptr_eq(future, &UNLOADED_CHUNK_FUTURE)
}

/// Aborts the current operation because an invariant of the chunk system does not hold.
///
/// On worker threads the panic is recorded by the pool and re-raised on the main thread,
/// which attaches a snapshot of every holder's futures.
#[track_caller]
pub fn invariant_violation(message: impl Into<String>) -> ! {
    let message = message.into();
    log::error!("Chunk system invariant violated: {message}");
    panic!("{message}")
}
