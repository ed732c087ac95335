use steel_utils::BlockStateId;

use crate::chunk::{
    chunk_access::ChunkAccess,
    chunk_generator::ChunkGenerator,
    section::SECTION_SIZE,
};

/// A chunk generator that generates a flat world.
#[derive(Debug, Clone)]
pub struct FlatChunkGenerator {
    /// The block of every layer, from the bottom of the world up.
    pub layers: Vec<BlockStateId>,
}

impl FlatChunkGenerator {
    /// Creates a new `FlatChunkGenerator` placing `layers` from the bottom of the world up.
    #[must_use]
    pub const fn new(layers: Vec<BlockStateId>) -> Self {
        Self { layers }
    }

    /// Bedrock, two layers of dirt and grass, using the given block states.
    #[must_use]
    pub fn classic(bedrock: BlockStateId, dirt: BlockStateId, grass: BlockStateId) -> Self {
        Self::new(vec![bedrock, dirt, dirt, grass])
    }
}

impl ChunkGenerator for FlatChunkGenerator {
    fn fill_from_noise(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        let height = chunk.sections().len() * SECTION_SIZE;
        anyhow::ensure!(
            self.layers.len() <= height,
            "{} flat layers do not fit into {height} blocks",
            self.layers.len()
        );

        for (y, block) in self.layers.iter().enumerate() {
            for x in 0..SECTION_SIZE {
                for z in 0..SECTION_SIZE {
                    chunk.set_relative_block(x, y, z, *block);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use steel_utils::ChunkPos;

    use super::*;
    use crate::chunk::{proto_chunk::ProtoChunk, section::Sections};

    #[test]
    fn test_flat_layers_fill_from_the_bottom() {
        let generator = FlatChunkGenerator::classic(BlockStateId(1), BlockStateId(2), BlockStateId(3));
        let chunk = ChunkAccess::Proto(ProtoChunk::new(Sections::new_empty(2), ChunkPos::new(0, 0)));
        generator.fill_from_noise(&chunk).expect("layers fit");

        assert_eq!(chunk.get_relative_block(4, 0, 9), Some(BlockStateId(1)));
        assert_eq!(chunk.get_relative_block(15, 2, 0), Some(BlockStateId(2)));
        assert_eq!(chunk.get_relative_block(0, 3, 15), Some(BlockStateId(3)));
        assert!(chunk.get_relative_block(0, 4, 0).is_some_and(BlockStateId::is_air));
        assert!(chunk.sections().has_only_air(1));
    }

    #[test]
    fn test_too_many_layers_fail() {
        let generator = FlatChunkGenerator::new(vec![BlockStateId(1); 17]);
        let chunk = ChunkAccess::Proto(ProtoChunk::new(Sections::new_empty(1), ChunkPos::new(0, 0)));
        assert!(generator.fill_from_noise(&chunk).is_err());
    }
}
