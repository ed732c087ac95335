//! This module contains the `Sections` and `ChunkSection` structs.
use std::{mem, sync::Arc};

use steel_utils::{BlockStateId, locks::SyncRwLock};

/// Edge length of a section in blocks.
pub const SECTION_SIZE: usize = 16;
const SECTION_VOLUME: usize = SECTION_SIZE * SECTION_SIZE * SECTION_SIZE;

/// The vertical extent of a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelHeight {
    /// The lowest block y coordinate.
    pub min_y: i32,
    /// The number of 16 block tall sections.
    pub section_count: usize,
}

impl LevelHeight {
    /// Creates a new level height.
    #[must_use]
    pub const fn new(min_y: i32, section_count: usize) -> Self {
        Self {
            min_y,
            section_count,
        }
    }

    /// The section y coordinate of the lowest section.
    #[must_use]
    pub const fn min_section(&self) -> i32 {
        self.min_y >> 4
    }

    /// Maps an absolute block y to a section index, if it is inside the world.
    #[must_use]
    pub fn section_index(&self, block_y: i32) -> Option<usize> {
        let index = (block_y >> 4) - self.min_section();
        usize::try_from(index)
            .ok()
            .filter(|index| *index < self.section_count)
    }

    /// The lowest light section; light storage pads one section above and below.
    #[must_use]
    pub const fn min_light_section(&self) -> i32 {
        self.min_section() - 1
    }

    /// The number of light sections.
    #[must_use]
    pub const fn light_section_count(&self) -> usize {
        self.section_count + 2
    }
}

impl Default for LevelHeight {
    fn default() -> Self {
        Self::new(-64, 24)
    }
}

/// Block storage of a single section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionStates {
    /// Every block in the section is the same.
    Homogeneous(BlockStateId),
    /// One entry per block, indexed `y << 8 | z << 4 | x`.
    Heterogeneous(Box<[BlockStateId]>),
}

impl SectionStates {
    const fn index(x: usize, y: usize, z: usize) -> usize {
        (y << 8) | (z << 4) | x
    }

    /// Gets the block at a section relative position.
    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockStateId {
        match self {
            Self::Homogeneous(value) => *value,
            Self::Heterogeneous(values) => values[Self::index(x, y, z)],
        }
    }

    /// Sets the block at a section relative position, returning the previous value.
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: BlockStateId) -> BlockStateId {
        match self {
            Self::Homogeneous(current) => {
                let old = *current;
                if old != value {
                    let mut values = vec![old; SECTION_VOLUME].into_boxed_slice();
                    values[Self::index(x, y, z)] = value;
                    *self = Self::Heterogeneous(values);
                }
                old
            }
            Self::Heterogeneous(values) => {
                mem::replace(&mut values[Self::index(x, y, z)], value)
            }
        }
    }

    /// Returns true if the section only holds air.
    #[must_use]
    pub fn has_only_air(&self) -> bool {
        match self {
            Self::Homogeneous(value) => value.is_air(),
            Self::Heterogeneous(values) => values.iter().all(|value| value.is_air()),
        }
    }
}

/// A chunk section.
#[derive(Debug, Clone)]
pub struct ChunkSection {
    /// The block states in the section.
    pub states: SectionStates,
}

impl ChunkSection {
    /// Creates a new chunk section.
    #[must_use]
    pub const fn new(states: SectionStates) -> Self {
        Self { states }
    }

    /// Creates a new empty chunk section.
    #[must_use]
    pub const fn new_empty() -> Self {
        Self {
            states: SectionStates::Homogeneous(BlockStateId::AIR),
        }
    }
}

/// A collection of chunk sections.
#[derive(Debug, Clone)]
pub struct Sections {
    /// The sections in the collection.
    pub sections: Box<[Arc<SyncRwLock<ChunkSection>>]>,
}

impl Sections {
    /// Creates a new `Sections` from a box of owned `ChunkSection`s.
    #[must_use]
    pub fn from_owned(sections: Box<[ChunkSection]>) -> Self {
        Self {
            sections: sections
                .into_iter()
                .map(|section| Arc::new(SyncRwLock::new(section)))
                .collect(),
        }
    }

    /// Creates `count` empty sections.
    #[must_use]
    pub fn new_empty(count: usize) -> Self {
        Self::from_owned((0..count).map(|_| ChunkSection::new_empty()).collect())
    }

    /// The number of sections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Returns true if there are no sections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Gets a block at a relative position in the chunk.
    #[must_use]
    pub fn get_relative_block(
        &self,
        relative_x: usize,
        relative_y: usize,
        relative_z: usize,
    ) -> Option<BlockStateId> {
        debug_assert!(relative_x < SECTION_SIZE);
        debug_assert!(relative_z < SECTION_SIZE);

        let section_index = relative_y / SECTION_SIZE;
        let relative_y = relative_y % SECTION_SIZE;
        self.sections.get(section_index).map(|section| {
            section
                .read()
                .states
                .get(relative_x, relative_y, relative_z)
        })
    }

    /// Sets a block at a relative position in the chunk. Positions above the top section are ignored.
    pub fn set_relative_block(
        &self,
        relative_x: usize,
        relative_y: usize,
        relative_z: usize,
        value: BlockStateId,
    ) -> Option<BlockStateId> {
        debug_assert!(relative_x < SECTION_SIZE);
        debug_assert!(relative_z < SECTION_SIZE);

        let idx = relative_y / SECTION_SIZE;
        let relative_y = relative_y % SECTION_SIZE;
        self.sections.get(idx).map(|section| {
            section
                .write()
                .states
                .set(relative_x, relative_y, relative_z, value)
        })
    }

    /// Copies the block states of every section.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SectionStates> {
        self.sections
            .iter()
            .map(|section| section.read().states.clone())
            .collect()
    }

    /// Returns true if the section at `index` only holds air. Missing sections count as air.
    #[must_use]
    pub fn has_only_air(&self, index: usize) -> bool {
        self.sections
            .get(index)
            .is_none_or(|section| section.read().states.has_only_air())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_promotes_homogeneous_section() {
        let sections = Sections::new_empty(2);
        assert!(sections.has_only_air(1));

        let old = sections.set_relative_block(3, 20, 5, BlockStateId(7));
        assert_eq!(old, Some(BlockStateId::AIR));
        assert_eq!(sections.get_relative_block(3, 20, 5), Some(BlockStateId(7)));
        assert_eq!(sections.get_relative_block(3, 21, 5), Some(BlockStateId::AIR));
        assert!(sections.has_only_air(0));
        assert!(!sections.has_only_air(1));
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let sections = Sections::new_empty(1);
        assert_eq!(sections.set_relative_block(0, 40, 0, BlockStateId(1)), None);
        assert_eq!(sections.get_relative_block(0, 40, 0), None);
    }

    #[test]
    fn test_level_height_section_index() {
        let height = LevelHeight::default();
        assert_eq!(height.section_index(-64), Some(0));
        assert_eq!(height.section_index(-1), Some(3));
        assert_eq!(height.section_index(319), Some(23));
        assert_eq!(height.section_index(320), None);
        assert_eq!(height.section_index(-65), None);
    }
}
