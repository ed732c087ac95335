use crate::chunk::{chunk_access::ChunkAccess, chunk_generator::ChunkGenerator};

/// A chunk generator that leaves every chunk empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidChunkGenerator;

impl ChunkGenerator for VoidChunkGenerator {
    fn fill_from_noise(&self, _chunk: &ChunkAccess) -> anyhow::Result<()> {
        Ok(())
    }
}
