//! This module contains the `ProtoChunk` struct, a chunk that is still moving through the generation pipeline.
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use steel_utils::ChunkPos;

use crate::chunk::{chunk_access::ChunkStatus, section::Sections};

/// A chunk that is currently being generated.
#[derive(Debug)]
pub struct ProtoChunk {
    /// The sections of the chunk.
    pub sections: Sections,
    /// The position of the chunk.
    pub pos: ChunkPos,
    status: AtomicU8,
    unsaved: AtomicBool,
    light_correct: AtomicBool,
}

impl ProtoChunk {
    /// Creates a fresh proto chunk that has not been through any stage.
    #[must_use]
    pub const fn new(sections: Sections, pos: ChunkPos) -> Self {
        Self::with_status(sections, pos, ChunkStatus::Empty, false)
    }

    /// Creates a proto chunk restored from storage.
    #[must_use]
    pub const fn with_status(
        sections: Sections,
        pos: ChunkPos,
        status: ChunkStatus,
        light_correct: bool,
    ) -> Self {
        Self {
            sections,
            pos,
            status: AtomicU8::new(status as u8),
            unsaved: AtomicBool::new(false),
            light_correct: AtomicBool::new(light_correct),
        }
    }

    /// The furthest stage this chunk's data has been through.
    #[must_use]
    pub fn persisted_status(&self) -> ChunkStatus {
        ChunkStatus::from_index(self.status.load(Ordering::Acquire) as usize)
            .unwrap_or(ChunkStatus::Empty)
    }

    /// Records that the chunk's data went through `status`. Never moves backwards.
    pub fn set_persisted_status(&self, status: ChunkStatus) {
        let previous = self.status.fetch_max(status as u8, Ordering::AcqRel);
        if previous < status as u8 {
            self.mark_unsaved();
        }
    }

    /// Marks the chunk as having changes that still need to be written.
    pub fn mark_unsaved(&self) {
        self.unsaved.store(true, Ordering::Release);
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_status_never_moves_back() {
        let chunk = ProtoChunk::new(Sections::new_empty(1), ChunkPos::new(0, 0));
        assert!(!chunk.is_unsaved());

        chunk.set_persisted_status(ChunkStatus::Noise);
        assert!(chunk.try_mark_saved());
        chunk.set_persisted_status(ChunkStatus::Biomes);

        assert_eq!(chunk.persisted_status(), ChunkStatus::Noise);
        assert!(!chunk.is_unsaved());
    }
}
