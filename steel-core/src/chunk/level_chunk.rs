//! This module contains the `LevelChunk` struct, a chunk that finished generating and can be used by the game.
use std::{
    fmt::{self, Debug},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use steel_utils::ChunkPos;

use crate::chunk::{proto_chunk::ProtoChunk, section::Sections};

/// Called with a chunk's position the moment a saved chunk gains unsaved changes.
pub type UnsavedListener = Arc<dyn Fn(ChunkPos) + Send + Sync>;

/// A chunk that is ready to be used by the game.
pub struct LevelChunk {
    /// The sections of the chunk.
    pub sections: Sections,
    /// The position of the chunk.
    pub pos: ChunkPos,
    unsaved: AtomicBool,
    light_correct: AtomicBool,
    loaded: AtomicBool,
    post_processed: AtomicBool,
    unsaved_listener: OnceLock<UnsavedListener>,
}

impl LevelChunk {
    /// Creates a new `LevelChunk` from a `ProtoChunk`, sharing its sections.
    #[must_use]
    pub fn from_proto(proto_chunk: &ProtoChunk) -> Self {
        Self {
            sections: proto_chunk.sections.clone(),
            pos: proto_chunk.pos,
            unsaved: AtomicBool::new(proto_chunk.is_unsaved()),
            light_correct: AtomicBool::new(proto_chunk.is_light_correct()),
            loaded: AtomicBool::new(false),
            post_processed: AtomicBool::new(false),
            unsaved_listener: OnceLock::new(),
        }
    }

    /// Creates a new `LevelChunk` that was loaded from disk (not dirty).
    #[must_use]
    pub fn from_disk(sections: Sections, pos: ChunkPos, light_correct: bool) -> Self {
        Self {
            sections,
            pos,
            unsaved: AtomicBool::new(false),
            light_correct: AtomicBool::new(light_correct),
            loaded: AtomicBool::new(false),
            post_processed: AtomicBool::new(false),
            unsaved_listener: OnceLock::new(),
        }
    }

    /// Installs the listener notified when this chunk becomes unsaved. Only the first call has an effect.
    pub fn set_unsaved_listener(&self, listener: UnsavedListener) {
        let _ = self.unsaved_listener.set(listener);
    }

    /// Marks the chunk as having changes that still need to be written.
    pub fn mark_unsaved(&self) {
        let was_unsaved = self.unsaved.swap(true, Ordering::AcqRel);
        if !was_unsaved && let Some(listener) = self.unsaved_listener.get() {
            listener(self.pos);
        }
    }

    /// Whether the chunk has changes that were not written yet.
    #[must_use]
    pub fn is_unsaved(&self) -> bool {
        self.unsaved.load(Ordering::Acquire)
    }

    /// Clears the unsaved flag, returning whether it was set.
    pub fn try_mark_saved(&self) -> bool {
        self.unsaved.swap(false, Ordering::AcqRel)
    }

    /// Whether the light data is up to date.
    #[must_use]
    pub fn is_light_correct(&self) -> bool {
        self.light_correct.load(Ordering::Acquire)
    }

    /// Sets whether the light data is up to date.
    pub fn set_light_correct(&self, correct: bool) {
        self.light_correct.store(correct, Ordering::Release);
    }

    /// Whether the chunk is currently part of the loaded world.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Sets whether the chunk is part of the loaded world.
    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::Release);
    }

    /// Marks the chunk post processed, returning false if it already was.
    pub fn post_process_generation(&self) -> bool {
        !self.post_processed.swap(true, Ordering::AcqRel)
    }
}

impl Debug for LevelChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelChunk")
            .field("pos", &self.pos)
            .field("unsaved", &self.is_unsaved())
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}
