// Wrapper types making it harder to accidentaly use the wrong underlying type.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::math::{vector2::Vector2, vector3::Vector3};

/// A raw block state id. Id 0 is always air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockStateId(pub u16);

impl BlockStateId {
    /// The air block state.
    pub const AIR: Self = Self(0);

    /// Returns true for the air block state.
    #[must_use]
    pub const fn is_air(self) -> bool {
        self.0 == 0
    }
}

/// A chunk position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkPos(pub Vector2<i32>);

impl ChunkPos {
    /// A packed position no real chunk can ever occupy, used as a marker key.
    pub const INVALID: i64 = Self::pack(1_875_066, 1_875_066);

    /// Creates a new chunk position.
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self(Vector2::new(x, z))
    }

    /// The chunk x coordinate.
    #[must_use]
    pub const fn x(&self) -> i32 {
        self.0.x
    }

    /// The chunk z coordinate.
    #[must_use]
    pub const fn z(&self) -> i32 {
        self.0.y
    }

    /// Packs two chunk coordinates into a single key.
    #[must_use]
    pub const fn pack(x: i32, z: i32) -> i64 {
        (x as i64 & 0xFFFF_FFFF) | ((z as i64 & 0xFFFF_FFFF) << 32)
    }

    /// Packs this position into a single key.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        Self::pack(self.0.x, self.0.y)
    }

    /// Unpacks a key produced by [`ChunkPos::as_i64`].
    #[must_use]
    pub const fn from_i64(packed: i64) -> Self {
        Self::new(packed as i32, (packed >> 32) as i32)
    }

    /// Returns the position offset by the given amount of chunks.
    #[must_use]
    pub const fn offset(&self, dx: i32, dz: i32) -> Self {
        Self::new(self.0.x + dx, self.0.y + dz)
    }

    /// The chessboard (Chebyshev) distance between two positions.
    #[must_use]
    pub fn chessboard_distance(&self, other: &Self) -> i32 {
        (self.0.x - other.0.x)
            .abs()
            .max((self.0.y - other.0.y).abs())
    }

    /// The lowest block x coordinate inside this chunk.
    #[must_use]
    pub const fn min_block_x(&self) -> i32 {
        self.0.x << 4
    }

    /// The lowest block z coordinate inside this chunk.
    #[must_use]
    pub const fn min_block_z(&self) -> i32 {
        self.0.y << 4
    }
}

impl Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.0.x, self.0.y)
    }
}

/// A block position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos(pub Vector3<i32>);

impl BlockPos {
    /// Creates a new block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(Vector3::new(x, y, z))
    }

    /// The chunk this block lives in.
    #[must_use]
    pub const fn chunk_pos(&self) -> ChunkPos {
        ChunkPos::new(self.0.x >> 4, self.0.z >> 4)
    }

    /// The position relative to the section it lives in, packed as `x << 8 | z << 4 | y`.
    #[must_use]
    pub const fn section_relative(&self) -> u16 {
        (((self.0.x & 15) << 8) | ((self.0.z & 15) << 4) | (self.0.y & 15)) as u16
    }
}

impl Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.0.x, self.0.y, self.0.z)
    }
}

/// A section position, the chunk position plus the section's y coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectionPos(pub Vector3<i32>);

impl SectionPos {
    /// Creates a new section position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(Vector3::new(x, y, z))
    }

    /// The section containing the given block.
    #[must_use]
    pub const fn of_block(pos: &BlockPos) -> Self {
        Self::new(
            Self::block_to_section_coord(pos.0.x),
            Self::block_to_section_coord(pos.0.y),
            Self::block_to_section_coord(pos.0.z),
        )
    }

    /// Converts a block coordinate into a section coordinate.
    #[must_use]
    pub const fn block_to_section_coord(coord: i32) -> i32 {
        coord >> 4
    }

    /// The chunk this section belongs to.
    #[must_use]
    pub const fn chunk_pos(&self) -> ChunkPos {
        ChunkPos::new(self.0.x, self.0.z)
    }

    /// The section's y coordinate.
    #[must_use]
    pub const fn y(&self) -> i32 {
        self.0.y
    }
}
