use crate::chunk::chunk_access::{ChunkStatus, FullChunkStatus};
use crate::chunk::chunk_pyramid::GENERATION_PYRAMID;

/// Utilities for converting between chunk levels and statuses.
pub struct ChunkLevel;

impl ChunkLevel {
    /// Ticket levels at or below this threshold require a full chunk.
    pub const FULL_STATUS_LEVEL: u8 = 33;
    /// Ticket levels at or below this threshold tick blocks.
    pub const BLOCK_TICKING_LEVEL: u8 = 32;
    /// Ticket levels at or below this threshold tick entities.
    pub const ENTITY_TICKING_LEVEL: u8 = 31;
    /// How far a full chunk's generation requirements reach.
    pub const RADIUS_AROUND_FULL_CHUNK: u8 = 11;
    /// The highest level at which a chunk is still loaded.
    pub const MAX_LEVEL: u8 = Self::FULL_STATUS_LEVEL + Self::RADIUS_AROUND_FULL_CHUNK;
    /// The level of positions nothing is interested in.
    pub const UNLOADED_LEVEL: u8 = Self::MAX_LEVEL + 1;

    /// Returns the highest stage a chunk at `level` may be generated to, or `None` if it should not be loaded.
    #[must_use]
    pub fn generation_status(level: u8) -> Option<ChunkStatus> {
        if level > Self::MAX_LEVEL {
            None
        } else if level <= Self::FULL_STATUS_LEVEL {
            Some(ChunkStatus::Full)
        } else {
            GENERATION_PYRAMID
                .get_step_to(ChunkStatus::Full)
                .accumulated_dependencies
                .get((level - Self::FULL_STATUS_LEVEL) as usize)
        }
    }

    /// Returns the accessibility tier for the given level.
    #[must_use]
    pub const fn full_status(level: u8) -> FullChunkStatus {
        if level <= Self::ENTITY_TICKING_LEVEL {
            FullChunkStatus::EntityTicking
        } else if level <= Self::BLOCK_TICKING_LEVEL {
            FullChunkStatus::BlockTicking
        } else if level <= Self::FULL_STATUS_LEVEL {
            FullChunkStatus::Full
        } else {
            FullChunkStatus::Inaccessible
        }
    }

    /// The highest level at which a chunk reaches the given tier.
    #[must_use]
    pub const fn by_full_status(status: FullChunkStatus) -> u8 {
        match status {
            FullChunkStatus::Inaccessible => Self::MAX_LEVEL,
            FullChunkStatus::Full => Self::FULL_STATUS_LEVEL,
            FullChunkStatus::BlockTicking => Self::BLOCK_TICKING_LEVEL,
            FullChunkStatus::EntityTicking => Self::ENTITY_TICKING_LEVEL,
        }
    }

    /// The highest level at which a chunk may still be generated to `status`.
    #[must_use]
    pub fn by_status(status: ChunkStatus) -> u8 {
        let radius = GENERATION_PYRAMID
            .get_step_to(ChunkStatus::Full)
            .get_accumulated_radius_of(status);
        Self::FULL_STATUS_LEVEL + radius as u8
    }

    /// Whether a chunk at `level` is loaded at all.
    #[must_use]
    pub const fn is_loaded(level: u8) -> bool {
        level <= Self::MAX_LEVEL
    }

    /// Whether a chunk at `level` ticks blocks.
    #[must_use]
    pub const fn is_block_ticking(level: u8) -> bool {
        level <= Self::BLOCK_TICKING_LEVEL
    }

    /// Whether a chunk at `level` ticks entities.
    #[must_use]
    pub const fn is_entity_ticking(level: u8) -> bool {
        level <= Self::ENTITY_TICKING_LEVEL
    }
}
