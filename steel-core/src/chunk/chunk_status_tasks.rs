//! The work performed by each step of the chunk pyramids.
//!
//! Every task receives the chunk of the parent stage and returns a future of the chunk at its
//! own stage. Cheap hooks run inline on the worker that applies the step. Noise is moved to a
//! separate worker job and promotion to a level chunk runs on the main thread.
use std::sync::Arc;

use anyhow::Context;

use crate::chunk::{
    chunk_access::{ChunkAccess, ChunkStatus},
    chunk_future::{ChunkFuture, Completable},
    chunk_generation_task::StaticCache2D,
    chunk_generator::ChunkGenerator,
    chunk_holder::ChunkHolder,
    chunk_level::ChunkLevel,
    chunk_pyramid::ChunkStep,
    chunk_result::{ChunkLoadError, ChunkResult},
    level_chunk::LevelChunk,
    world_gen_context::WorldGenContext,
    worker_pool::TaskExecutor,
};

/// Holder of the status task functions.
pub struct ChunkStatusTasks;

fn generation_error(error: &anyhow::Error) -> ChunkLoadError {
    ChunkLoadError::Generation(format!("{error:#}"))
}

fn finish(
    step: &ChunkStep,
    chunk: Arc<ChunkAccess>,
    outcome: anyhow::Result<()>,
) -> ChunkResult<Arc<ChunkAccess>> {
    let pos = chunk.pos();
    outcome
        .with_context(|| format!("{} failed at {pos}", step.target_status))
        .map(|()| chunk)
        .map_err(|error| generation_error(&error))
}

fn queue_level(cache: &StaticCache2D<Arc<ChunkHolder>>, chunk: &ChunkAccess) -> u8 {
    let pos = chunk.pos();
    cache
        .get(pos.x(), pos.z())
        .map_or(ChunkLevel::MAX_LEVEL, |holder| holder.queue_level())
}

impl ChunkStatusTasks {
    /// Whether the chunk's light was already computed and is still correct.
    #[must_use]
    pub fn is_lighted(chunk: &ChunkAccess) -> bool {
        chunk.persisted_status() >= ChunkStatus::Light && chunk.is_light_correct()
    }

    /// Returns the chunk unchanged.
    pub fn pass_through(
        _context: &Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        Completable::completed(Ok(chunk))
    }

    /// Generates structure starts.
    pub fn generate_structure_starts(
        context: &Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let outcome = context.generator.create_structures(&chunk);
        Completable::completed(finish(step, chunk, outcome))
    }

    /// Restores structure starts of a chunk that already went through that stage.
    pub fn load_structure_starts(
        _context: &Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        Completable::completed(Ok(chunk))
    }

    /// Links structures of neighbouring chunks.
    pub fn generate_structure_references(
        context: &Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let outcome = context.generator.create_references(&chunk);
        Completable::completed(finish(step, chunk, outcome))
    }

    /// Generates biomes.
    pub fn generate_biomes(
        context: &Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let outcome = context.generator.create_biomes(&chunk);
        Completable::completed(finish(step, chunk, outcome))
    }

    /// Fills the chunk with base terrain on a separate worker job.
    pub fn generate_noise(
        context: &Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let future = Completable::new();
        let result = future.clone();
        let generator = context.generator.clone();
        let status = step.target_status;
        context.worker.execute(Box::new(move || {
            let pos = chunk.pos();
            let outcome = generator
                .fill_from_noise(&chunk)
                .with_context(|| format!("{status} failed at {pos}"))
                .map(|()| chunk)
                .map_err(|error| generation_error(&error));
            result.complete(outcome);
        }));
        future
    }

    /// Builds the surface.
    pub fn generate_surface(
        context: &Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let outcome = context.generator.build_surface(&chunk);
        Completable::completed(finish(step, chunk, outcome))
    }

    /// Applies carvers.
    pub fn generate_carvers(
        context: &Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let outcome = context.generator.apply_carvers(&chunk);
        Completable::completed(finish(step, chunk, outcome))
    }

    /// Places features.
    pub fn generate_features(
        context: &Arc<WorldGenContext>,
        step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let outcome = context.generator.apply_biome_decorations(&chunk);
        Completable::completed(finish(step, chunk, outcome))
    }

    /// Registers the chunk's sections with the light engine. This does not compute light.
    pub fn initialize_light(
        context: &Arc<WorldGenContext>,
        _step: &ChunkStep,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let lighted = Self::is_lighted(&chunk);
        let level = queue_level(cache, &chunk);
        context.light_engine.initialize_light(chunk, lighted, level)
    }

    /// Computes the chunk's light.
    pub fn light(
        context: &Arc<WorldGenContext>,
        _step: &ChunkStep,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let lighted = Self::is_lighted(&chunk);
        let level = queue_level(cache, &chunk);
        context.light_engine.light_chunk(chunk, lighted, level)
    }

    /// Initial mob spawning. Nothing is spawned by the chunk system itself.
    pub fn generate_spawn(
        _context: &Arc<WorldGenContext>,
        _step: &ChunkStep,
        _cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        Completable::completed(Ok(chunk))
    }

    /// Promotes the proto chunk to a level chunk on the main thread.
    pub fn full(
        context: &Arc<WorldGenContext>,
        _step: &ChunkStep,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
        chunk: Arc<ChunkAccess>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let pos = chunk.pos();
        let Some(holder) = cache.get(pos.x(), pos.z()).cloned() else {
            return Completable::completed(Err(ChunkLoadError::MissingChunks(format!(
                "no holder for {pos} in its own generation cache"
            ))));
        };

        let future = Completable::new();
        let result = future.clone();
        let listener = context.unsaved_listener.clone();
        context.main_thread.execute(Box::new(move || {
            let level = match &*chunk {
                ChunkAccess::Full(_) => chunk.clone(),
                ChunkAccess::Proto(proto) => {
                    let level = Arc::new(ChunkAccess::Full(LevelChunk::from_proto(proto)));
                    if !holder.generation().replace_proto_chunk(&level) {
                        result.complete(Err(ChunkLoadError::Unloaded));
                        return;
                    }
                    level
                }
            };
            if let Some(level_chunk) = level.as_level_chunk() {
                level_chunk.set_loaded(true);
                level_chunk.set_unsaved_listener(listener);
            }
            result.complete(Ok(level));
        }));
        future
    }
}
