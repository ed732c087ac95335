//! This module contains the `WorldGenContext` struct, which is used to provide context for chunk generation.
use std::sync::Arc;

use enum_dispatch::enum_dispatch;

use crate::chunk::{
    chunk_access::ChunkAccess,
    chunk_generator::{ChunkGenerator, CustomChunkGenerator},
    flat_chunk_generator::FlatChunkGenerator,
    level_chunk::UnsavedListener,
    light_engine::ThreadedLevelLightEngine,
    main_thread_executor::MainThreadExecutor,
    section::LevelHeight,
    void_chunk_generator::VoidChunkGenerator,
    worker_pool::TaskExecutor,
};

#[allow(missing_docs)]
#[enum_dispatch(ChunkGenerator)]
pub enum ChunkGeneratorType {
    Flat(FlatChunkGenerator),
    Void(VoidChunkGenerator),
    Custom(CustomChunkGenerator),
}

/// Context for world generation.
pub struct WorldGenContext {
    /// The chunk generator to use.
    pub generator: Arc<ChunkGeneratorType>,
    /// The light engine for chunk lighting.
    pub light_engine: Arc<ThreadedLevelLightEngine>,
    /// The executor heavy generation work is moved to.
    pub worker: Arc<dyn TaskExecutor>,
    /// The executor of the thread owning the chunk tables.
    pub main_thread: Arc<MainThreadExecutor>,
    /// The vertical extent of the world.
    pub height: LevelHeight,
    /// Installed on every chunk that reaches the full stage.
    pub unsaved_listener: UnsavedListener,
}
