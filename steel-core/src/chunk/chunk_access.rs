//! This module contains the `ChunkAccess` enum and the status types describing where a chunk is in its lifecycle.
use std::fmt::{self, Display};

use steel_utils::{BlockStateId, ChunkPos};

use crate::chunk::{level_chunk::LevelChunk, proto_chunk::ProtoChunk, section::Sections};

/// The stages of the chunk pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ChunkStatus {
    #[allow(missing_docs)]
    Empty = 0,
    #[allow(missing_docs)]
    StructureStarts = 1,
    #[allow(missing_docs)]
    StructureReferences = 2,
    #[allow(missing_docs)]
    Biomes = 3,
    #[allow(missing_docs)]
    Noise = 4,
    #[allow(missing_docs)]
    Surface = 5,
    #[allow(missing_docs)]
    Carvers = 6,
    #[allow(missing_docs)]
    Features = 7,
    #[allow(missing_docs)]
    InitializeLight = 8,
    #[allow(missing_docs)]
    Light = 9,
    #[allow(missing_docs)]
    Spawn = 10,
    #[allow(missing_docs)]
    Full = 11,
}

impl ChunkStatus {
    /// The number of stages.
    pub const COUNT: usize = 12;

    /// Every stage in pipeline order.
    pub const ALL: [ChunkStatus; Self::COUNT] = [
        ChunkStatus::Empty,
        ChunkStatus::StructureStarts,
        ChunkStatus::StructureReferences,
        ChunkStatus::Biomes,
        ChunkStatus::Noise,
        ChunkStatus::Surface,
        ChunkStatus::Carvers,
        ChunkStatus::Features,
        ChunkStatus::InitializeLight,
        ChunkStatus::Light,
        ChunkStatus::Spawn,
        ChunkStatus::Full,
    ];

    /// The position of this stage in the pipeline.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Looks a stage up by its index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < Self::COUNT {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// The stage that has to be completed before this one. `Empty` is its own parent.
    #[must_use]
    pub const fn parent(self) -> Self {
        match self {
            Self::Empty | Self::StructureStarts => Self::Empty,
            Self::StructureReferences => Self::StructureStarts,
            Self::Biomes => Self::StructureReferences,
            Self::Noise => Self::Biomes,
            Self::Surface => Self::Noise,
            Self::Carvers => Self::Surface,
            Self::Features => Self::Carvers,
            Self::InitializeLight => Self::Features,
            Self::Light => Self::InitializeLight,
            Self::Spawn => Self::Light,
            Self::Full => Self::Spawn,
        }
    }

    /// The stage following this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    /// Whether chunks at this stage are proto chunks or full level chunks.
    #[must_use]
    pub const fn chunk_type(self) -> ChunkType {
        match self {
            Self::Full => ChunkType::Level,
            _ => ChunkType::Proto,
        }
    }

    /// Returns true if this stage is the same as or later than `other`.
    #[must_use]
    pub fn is_or_after(self, other: Self) -> bool {
        self >= other
    }

    /// The lowercase name of the stage.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::StructureStarts => "structure_starts",
            Self::StructureReferences => "structure_references",
            Self::Biomes => "biomes",
            Self::Noise => "noise",
            Self::Surface => "surface",
            Self::Carvers => "carvers",
            Self::Features => "features",
            Self::InitializeLight => "initialize_light",
            Self::Light => "light",
            Self::Spawn => "spawn",
            Self::Full => "full",
        }
    }
}

impl Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The kind of chunk a stage produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// A chunk still being generated.
    Proto,
    /// A chunk that has finished generating.
    Level,
}

/// How accessible a loaded chunk is to the rest of the server. Ordered from least to most.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FullChunkStatus {
    /// The chunk may be loaded but is not usable by the game.
    Inaccessible,
    /// The chunk is usable but nothing in it ticks.
    Full,
    /// Blocks in the chunk tick.
    BlockTicking,
    /// Blocks and entities in the chunk tick.
    EntityTicking,
}

impl FullChunkStatus {
    /// The lowercase name of the status.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inaccessible => "inaccessible",
            Self::Full => "full",
            Self::BlockTicking => "block_ticking",
            Self::EntityTicking => "entity_ticking",
        }
    }
}

impl Display for FullChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A chunk that is either being generated or fully generated.
#[derive(Debug)]
pub enum ChunkAccess {
    /// A fully generated chunk.
    Full(LevelChunk),
    /// A chunk that is still being generated.
    Proto(ProtoChunk),
}

impl ChunkAccess {
    /// The position of the chunk.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        match self {
            Self::Full(chunk) => chunk.pos,
            Self::Proto(chunk) => chunk.pos,
        }
    }

    /// The sections of the chunk.
    #[must_use]
    pub const fn sections(&self) -> &Sections {
        match self {
            Self::Full(chunk) => &chunk.sections,
            Self::Proto(chunk) => &chunk.sections,
        }
    }

    /// The furthest stage this chunk's data has been through.
    #[must_use]
    pub fn persisted_status(&self) -> ChunkStatus {
        match self {
            Self::Full(_) => ChunkStatus::Full,
            Self::Proto(chunk) => chunk.persisted_status(),
        }
    }

    /// Returns true for full level chunks.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    /// Returns the level chunk if this is one.
    #[must_use]
    pub const fn as_level_chunk(&self) -> Option<&LevelChunk> {
        match self {
            Self::Full(chunk) => Some(chunk),
            Self::Proto(_) => None,
        }
    }

    /// Gets a block at a position relative to the chunk's lowest corner.
    #[must_use]
    pub fn get_relative_block(
        &self,
        relative_x: usize,
        relative_y: usize,
        relative_z: usize,
    ) -> Option<BlockStateId> {
        self.sections()
            .get_relative_block(relative_x, relative_y, relative_z)
    }

    /// Sets a block at a position relative to the chunk's lowest corner and marks the chunk unsaved.
    pub fn set_relative_block(
        &self,
        relative_x: usize,
        relative_y: usize,
        relative_z: usize,
        value: BlockStateId,
    ) {
        self.sections()
            .set_relative_block(relative_x, relative_y, relative_z, value);
        self.mark_unsaved();
    }

    /// Marks the chunk as having changes that still need to be written.
    pub fn mark_unsaved(&self) {
        match self {
            Self::Full(chunk) => chunk.mark_unsaved(),
            Self::Proto(chunk) => chunk.mark_unsaved(),
        }
    }

    /// Whether the chunk has changes that were not written yet.
    #[must_use]
    pub fn is_unsaved(&self) -> bool {
        match self {
            Self::Full(chunk) => chunk.is_unsaved(),
            Self::Proto(chunk) => chunk.is_unsaved(),
        }
    }

    /// Clears the unsaved flag, returning whether it was set.
    pub fn try_mark_saved(&self) -> bool {
        match self {
            Self::Full(chunk) => chunk.try_mark_saved(),
            Self::Proto(chunk) => chunk.try_mark_saved(),
        }
    }

    /// Whether the light data of this chunk is up to date.
    #[must_use]
    pub fn is_light_correct(&self) -> bool {
        match self {
            Self::Full(chunk) => chunk.is_light_correct(),
            Self::Proto(chunk) => chunk.is_light_correct(),
        }
    }

    /// Sets whether the light data of this chunk is up to date.
    pub fn set_light_correct(&self, correct: bool) {
        match self {
            Self::Full(chunk) => chunk.set_light_correct(correct),
            Self::Proto(chunk) => chunk.set_light_correct(correct),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parents_step_back_one_stage() {
        assert_eq!(ChunkStatus::Empty.parent(), ChunkStatus::Empty);
        for pair in ChunkStatus::ALL.windows(2) {
            assert_eq!(pair[1].parent(), pair[0]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(ChunkStatus::Full.next(), None);
    }

    #[test]
    fn test_status_index_round_trip() {
        for status in ChunkStatus::ALL {
            assert_eq!(ChunkStatus::from_index(status.index()), Some(status));
        }
        assert_eq!(ChunkStatus::from_index(ChunkStatus::COUNT), None);
    }

    #[test]
    fn test_only_full_is_level_type() {
        assert_eq!(ChunkStatus::Full.chunk_type(), ChunkType::Level);
        assert_eq!(ChunkStatus::Spawn.chunk_type(), ChunkType::Proto);
    }

    #[test]
    fn test_full_status_ordering() {
        assert!(FullChunkStatus::EntityTicking > FullChunkStatus::BlockTicking);
        assert!(FullChunkStatus::Full > FullChunkStatus::Inaccessible);
    }
}
