//! Chunk persistence: the serialized chunk record and the storage backends it is written to.
pub mod ram_only;
pub mod storage;

use steel_utils::ChunkPos;

use crate::chunk::{
    chunk_access::{ChunkAccess, ChunkStatus},
    level_chunk::LevelChunk,
    proto_chunk::ProtoChunk,
    section::{ChunkSection, LevelHeight, SectionStates, Sections},
};

/// A snapshot of a chunk as it is handed to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedChunk {
    /// The position of the chunk.
    pub pos: ChunkPos,
    /// The furthest stage the chunk's data went through.
    pub status: ChunkStatus,
    /// Whether the stored light is up to date.
    pub light_correct: bool,
    /// The block states of every section, bottom up.
    pub sections: Vec<SectionStates>,
}

impl SerializedChunk {
    /// Takes a snapshot of `chunk`.
    #[must_use]
    pub fn from_chunk(chunk: &ChunkAccess) -> Self {
        Self {
            pos: chunk.pos(),
            status: chunk.persisted_status(),
            light_correct: chunk.is_light_correct(),
            sections: chunk.sections().snapshot(),
        }
    }

    /// A record of a chunk that has not been through any stage.
    #[must_use]
    pub fn empty(pos: ChunkPos, height: LevelHeight) -> Self {
        Self {
            pos,
            status: ChunkStatus::Empty,
            light_correct: false,
            sections: vec![SectionStates::Homogeneous(Default::default()); height.section_count],
        }
    }

    /// Restores the chunk. Missing sections are filled with air and extra ones are dropped.
    #[must_use]
    pub fn into_chunk(self, height: LevelHeight) -> ChunkAccess {
        let mut sections: Vec<ChunkSection> = self
            .sections
            .into_iter()
            .take(height.section_count)
            .map(ChunkSection::new)
            .collect();
        sections.resize_with(height.section_count, ChunkSection::new_empty);
        let sections = Sections::from_owned(sections.into_boxed_slice());

        if self.status == ChunkStatus::Full {
            ChunkAccess::Full(LevelChunk::from_disk(sections, self.pos, self.light_correct))
        } else {
            ChunkAccess::Proto(ProtoChunk::with_status(
                sections,
                self.pos,
                self.status,
                self.light_correct,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use steel_utils::BlockStateId;

    use super::*;

    #[test]
    fn test_restored_chunk_keeps_status_and_blocks() {
        let height = LevelHeight::new(0, 2);
        let chunk = ChunkAccess::Proto(ProtoChunk::with_status(
            Sections::new_empty(2),
            ChunkPos::new(3, -3),
            ChunkStatus::Features,
            false,
        ));
        chunk.set_relative_block(1, 20, 1, BlockStateId(7));

        let restored = SerializedChunk::from_chunk(&chunk).into_chunk(height);
        assert!(!restored.is_full());
        assert_eq!(restored.persisted_status(), ChunkStatus::Features);
        assert_eq!(restored.get_relative_block(1, 20, 1), Some(BlockStateId(7)));
        assert!(!restored.is_unsaved());
    }

    #[test]
    fn test_full_record_restores_a_level_chunk_of_the_world_height() {
        let mut record = SerializedChunk::empty(ChunkPos::new(0, 0), LevelHeight::new(0, 1));
        record.status = ChunkStatus::Full;
        record.light_correct = true;

        let restored = record.into_chunk(LevelHeight::new(0, 3));
        assert!(restored.is_full());
        assert!(restored.is_light_correct());
        assert_eq!(restored.sections().len(), 3);
    }
}
