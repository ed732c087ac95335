//! This module contains the `ChunkGenerator` trait, which is used to generate chunks.
use std::sync::Arc;

use enum_dispatch::enum_dispatch;

use crate::chunk::chunk_access::ChunkAccess;

/// The per-stage hooks of a terrain generator.
///
/// Hooks run on the worker pool against the chunk of the stage before theirs. Every hook may
/// fail; a failure cancels the generation of that chunk.
#[enum_dispatch]
pub trait ChunkGenerator: Send + Sync {
    /// Creates the structure starts of a chunk.
    fn create_structures(&self, _chunk: &ChunkAccess) -> anyhow::Result<()> {
        Ok(())
    }

    /// Links the chunk to the structures of its neighbours.
    fn create_references(&self, _chunk: &ChunkAccess) -> anyhow::Result<()> {
        Ok(())
    }

    /// Creates the biomes in a chunk.
    fn create_biomes(&self, _chunk: &ChunkAccess) -> anyhow::Result<()> {
        Ok(())
    }

    /// Fills the chunk with its base terrain.
    fn fill_from_noise(&self, chunk: &ChunkAccess) -> anyhow::Result<()>;

    /// Builds the surface of the chunk.
    fn build_surface(&self, _chunk: &ChunkAccess) -> anyhow::Result<()> {
        Ok(())
    }

    /// Applies carvers to the chunk.
    fn apply_carvers(&self, _chunk: &ChunkAccess) -> anyhow::Result<()> {
        Ok(())
    }

    /// Places features and decorations.
    fn apply_biome_decorations(&self, _chunk: &ChunkAccess) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A generator supplied from outside the crate.
#[derive(Clone)]
pub struct CustomChunkGenerator(pub Arc<dyn ChunkGenerator>);

impl ChunkGenerator for CustomChunkGenerator {
    fn create_structures(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.0.create_structures(chunk)
    }

    fn create_references(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.0.create_references(chunk)
    }

    fn create_biomes(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.0.create_biomes(chunk)
    }

    fn fill_from_noise(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.0.fill_from_noise(chunk)
    }

    fn build_surface(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.0.build_surface(chunk)
    }

    fn apply_carvers(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.0.apply_carvers(chunk)
    }

    fn apply_biome_decorations(&self, chunk: &ChunkAccess) -> anyhow::Result<()> {
        self.0.apply_biome_decorations(chunk)
    }
}
