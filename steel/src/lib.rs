//! # Steel
//!
//! A standalone world host that drives the Steel chunk system.
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    missing_docs,
    clippy::unwrap_used
)]
#![allow(
    clippy::single_call_fn,
    clippy::multiple_inherent_impl,
    clippy::shadow_unrelated,
    clippy::missing_errors_doc,
    clippy::struct_excessive_bools,
    clippy::needless_pass_by_value,
    clippy::cargo_common_metadata
)]
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use steel_core::{
    chunk::{
        chunk_cache::{ChunkCache, ChunkCacheError},
        flat_chunk_generator::FlatChunkGenerator,
        hooks::ChunkMapHooks,
        section::LevelHeight,
        world_gen_context::ChunkGeneratorType,
    },
    chunk_saver::{ram_only::RamOnlyStorage, storage::ChunkStorage},
    config::ChunkSystemConfig,
};
use steel_utils::BlockStateId;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// Spawn area preparation.
pub mod spawn_progress;

/// Length of one game tick.
pub const TICK_DURATION: Duration = Duration::from_millis(50);

/// Overworld height: 24 sections starting at y -64.
pub const WORLD_HEIGHT: LevelHeight = LevelHeight::new(-64, 24);

/// The main server struct.
pub struct SteelServer {
    /// The cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// The chunk system of the only world.
    pub chunks: ChunkCache,
    /// Runtime running storage io.
    pub runtime: Arc<Runtime>,
}

impl SteelServer {
    /// Creates a server with a flat world kept in memory.
    ///
    /// Must be called on the thread that will tick the server.
    pub fn new(config: ChunkSystemConfig, runtime: Arc<Runtime>) -> Result<Self, ChunkCacheError> {
        log::info!("Starting Steel Server");

        let generator = ChunkGeneratorType::Flat(FlatChunkGenerator::classic(
            BlockStateId(1),
            BlockStateId(2),
            BlockStateId(3),
        ));
        let chunks = ChunkCache::new(
            config,
            generator,
            ChunkStorage::RamOnly(RamOnlyStorage::empty_world()),
            runtime.clone(),
            ChunkMapHooks::default(),
            WORLD_HEIGHT,
        )?;

        Ok(Self {
            cancel_token: CancellationToken::new(),
            chunks,
            runtime,
        })
    }

    /// Runs one tick, then works on main thread tasks until the tick budget is used up.
    pub fn tick(&self) {
        let deadline = Instant::now() + TICK_DURATION;
        let has_time = || Instant::now() < deadline;
        self.chunks.tick(&has_time);
        while has_time() {
            if !self.chunks.poll_task() {
                let left = deadline.saturating_duration_since(Instant::now());
                thread::sleep(left.min(Duration::from_millis(1)));
            }
        }
    }

    /// Ticks until the cancel token fires, then saves and closes the world.
    pub fn run(&self) {
        log::info!("Started Steel Server");
        let mut ticks: u64 = 0;
        while !self.cancel_token.is_cancelled() {
            self.tick();
            ticks += 1;
            if ticks % 6000 == 0 {
                self.chunks.save(false);
                log::debug!(
                    "{} chunks loaded after {ticks} ticks",
                    self.chunks.loaded_chunk_count()
                );
            }
        }
        self.stop();
    }

    /// Saves every chunk and shuts the chunk system down.
    pub fn stop(&self) {
        log::info!("Stopping Steel Server");
        self.chunks.close(true);
        log::info!("Server stopped");
    }
}
