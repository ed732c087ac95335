//! The synchronous face of the chunk system used by game logic.
//!
//! Requests made on the main thread are served directly, blocking on the pipeline while
//! draining other main thread work. Requests from other threads are posted to the main thread
//! and waited for.
use std::{
    io,
    sync::Arc,
    thread::{self, ThreadId},
};

use futures::executor::block_on;
use rayon::ThreadPoolBuildError;
use steel_utils::{BlockPos, ChunkPos, SectionPos, locks::SyncMutex};
use thiserror::Error;
use tokio::runtime::Runtime;

use crate::{
    chunk::{
        chunk_access::{ChunkAccess, ChunkStatus},
        chunk_future::{ChunkFuture, Completable},
        chunk_level::ChunkLevel,
        chunk_map::{ChunkMap, ChunkMapParts},
        chunk_result::{ChunkLoadError, ChunkResult, invariant_violation},
        chunk_ticket_manager::PlayerId,
        hooks::ChunkMapHooks,
        light_engine::LightLayer,
        main_thread_executor::MainThreadExecutor,
        section::LevelHeight,
        ticket::TicketType,
        world_gen_context::ChunkGeneratorType,
        worker_pool::{TaskExecutor, WorkerPool},
    },
    chunk_saver::storage::ChunkStorage,
    config::{ChunkSystemConfig, ConfigError},
};

const RECENT_CHUNKS: usize = 4;

/// Why a chunk cache could not be built.
#[derive(Debug, Error)]
pub enum ChunkCacheError {
    /// The configuration is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The worker pool could not be started.
    #[error("failed to start the chunk workers: {0}")]
    Workers(#[from] ThreadPoolBuildError),
}

#[derive(Clone)]
struct RecentChunk {
    pos: i64,
    status: ChunkStatus,
    chunk: Option<Arc<ChunkAccess>>,
}

/// The last few lookups, valid until the chunk map's next scheduling change.
#[derive(Default)]
struct RecentChunks {
    epoch: u64,
    entries: Vec<RecentChunk>,
}

impl RecentChunks {
    fn get(&mut self, epoch: u64, pos: i64, status: ChunkStatus) -> Option<Option<Arc<ChunkAccess>>> {
        if self.epoch != epoch {
            self.epoch = epoch;
            self.entries.clear();
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.pos == pos && entry.status == status)
            .map(|entry| entry.chunk.clone())
    }

    fn store(&mut self, epoch: u64, pos: i64, status: ChunkStatus, chunk: Option<Arc<ChunkAccess>>) {
        if self.epoch != epoch {
            self.epoch = epoch;
            self.entries.clear();
        }
        self.entries.insert(0, RecentChunk { pos, status, chunk });
        self.entries.truncate(RECENT_CHUNKS);
    }
}

fn ticket_key(pos: ChunkPos) -> u64 {
    u64::from_ne_bytes(pos.as_i64().to_ne_bytes())
}

/// Synchronous chunk access for one world.
pub struct ChunkCache {
    chunk_map: Arc<ChunkMap>,
    main_thread_id: ThreadId,
    recent_chunks: SyncMutex<RecentChunks>,
}

impl ChunkCache {
    /// Builds the chunk system of one world. The calling thread becomes its main thread.
    pub fn new(
        config: ChunkSystemConfig,
        generator: ChunkGeneratorType,
        storage: ChunkStorage,
        runtime: Arc<Runtime>,
        hooks: ChunkMapHooks,
        height: LevelHeight,
    ) -> Result<Self, ChunkCacheError> {
        config.validate()?;
        let main_thread = Arc::new(MainThreadExecutor::new());
        let worker = Arc::new(WorkerPool::new(
            "chunk-worker",
            config.worker_threads,
            &main_thread,
        )?);
        log::info!(
            "Chunk system started with {} workers, view distance {} and simulation distance {}",
            worker.threads(),
            config.view_distance,
            config.simulation_distance
        );

        let chunk_map = ChunkMap::new(
            config,
            ChunkMapParts {
                generator: Arc::new(generator),
                storage,
                worker,
                main_thread,
                runtime,
                hooks,
                height,
            },
        );
        Ok(Self {
            chunk_map,
            main_thread_id: thread::current().id(),
            recent_chunks: SyncMutex::new(RecentChunks::default()),
        })
    }

    /// The chunk map behind this cache.
    #[must_use]
    pub const fn chunk_map(&self) -> &Arc<ChunkMap> {
        &self.chunk_map
    }

    /// The mailbox of the main thread.
    #[must_use]
    pub fn main_thread(&self) -> &Arc<MainThreadExecutor> {
        self.chunk_map.main_thread()
    }

    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread_id
    }

    /// Returns the chunk at `pos` once it reached `status`.
    ///
    /// With `load` the chunk is loaded or generated as needed and this blocks until it is there.
    /// Without it, only a chunk that is already at `status` is returned.
    pub fn get_chunk(&self, pos: ChunkPos, status: ChunkStatus, load: bool) -> ChunkResult<Arc<ChunkAccess>> {
        if !self.is_main_thread() {
            let result = Completable::new();
            let done = result.clone();
            let map = self.chunk_map.clone();
            self.main_thread().execute(Box::new(move || {
                done.complete(Self::get_chunk_blocking(&map, pos, status, load));
            }));
            return block_on(result.wait());
        }

        let key = pos.as_i64();
        let epoch = self.chunk_map.update_epoch();
        if let Some(recent) = self.recent_chunks.lock().get(epoch, key, status) {
            if let Some(chunk) = recent {
                return Ok(chunk);
            }
            if !load {
                return Err(ChunkLoadError::Unloaded);
            }
        }

        let result = Self::get_chunk_blocking(&self.chunk_map, pos, status, load);
        self.recent_chunks.lock().store(
            self.chunk_map.update_epoch(),
            key,
            status,
            result.as_ref().ok().cloned(),
        );
        result
    }

    fn get_chunk_blocking(
        map: &ChunkMap,
        pos: ChunkPos,
        status: ChunkStatus,
        load: bool,
    ) -> ChunkResult<Arc<ChunkAccess>> {
        let future = Self::get_chunk_future_main_thread(map, pos, status, load);
        map.managed_block(|| future.is_done());
        let result = future
            .get_now()
            .cloned()
            .unwrap_or(Err(ChunkLoadError::Unloaded));
        if load && let Err(error) = &result {
            log::error!("Chunk {pos} not there when requested at {status}: {error}");
        }
        result
    }

    fn get_chunk_future_main_thread(
        map: &ChunkMap,
        pos: ChunkPos,
        status: ChunkStatus,
        load: bool,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let level = ChunkLevel::by_status(status);
        if load {
            map.with_distance_manager(|distance_manager| {
                distance_manager.add_ticket(pos, TicketType::Unknown, level, ticket_key(pos));
            });
            let absent = |map: &ChunkMap| {
                map.visible_chunk_if_present(pos.as_i64())
                    .is_none_or(|holder| holder.ticket_level() > level)
            };
            if absent(map) {
                map.run_distance_manager_updates();
                if absent(map) {
                    invariant_violation(format!(
                        "No chunk holder at {pos} after a ticket at level {level} was added"
                    ));
                }
            }
        }
        map.schedule_chunk(pos, status)
    }

    /// Like [`Self::get_chunk`], but returns the future instead of blocking on it.
    #[must_use]
    pub fn get_chunk_future(
        &self,
        pos: ChunkPos,
        status: ChunkStatus,
        load: bool,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        if self.is_main_thread() {
            return Self::get_chunk_future_main_thread(&self.chunk_map, pos, status, load);
        }
        let result = Completable::new();
        let forward = result.clone();
        let map = self.chunk_map.clone();
        self.main_thread().execute(Box::new(move || {
            Self::get_chunk_future_main_thread(&map, pos, status, load).on_complete(move |outcome| {
                forward.complete(outcome.clone());
            });
        }));
        result
    }

    /// The chunk at `pos` if it is at least accessible. Never blocks.
    #[must_use]
    pub fn get_chunk_now(&self, pos: ChunkPos) -> Option<Arc<ChunkAccess>> {
        self.chunk_map
            .visible_chunk_if_present(pos.as_i64())?
            .full_chunk()
    }

    /// Whether the chunk at `pos` is at least accessible.
    #[must_use]
    pub fn has_chunk(&self, pos: ChunkPos) -> bool {
        self.get_chunk_now(pos).is_some()
    }

    /// Adds a ticket at an explicit level. Main thread only.
    pub fn add_ticket(&self, pos: ChunkPos, ticket_type: TicketType, level: u8, key: u64) {
        self.chunk_map
            .with_distance_manager(|manager| manager.add_ticket(pos, ticket_type, level, key));
    }

    /// Removes a ticket added with [`Self::add_ticket`]. Main thread only.
    pub fn remove_ticket(&self, pos: ChunkPos, ticket_type: TicketType, level: u8, key: u64) {
        self.chunk_map
            .with_distance_manager(|manager| manager.remove_ticket(pos, ticket_type, level, key));
    }

    /// Keeps every chunk within `distance` of `pos` accessible and ticking. Main thread only.
    pub fn add_region_ticket(&self, ticket_type: TicketType, pos: ChunkPos, distance: u8, key: u64) {
        self.chunk_map.with_distance_manager(|manager| {
            manager.add_region_ticket(ticket_type, pos, distance, key);
        });
    }

    /// Removes a ticket added with [`Self::add_region_ticket`]. Main thread only.
    pub fn remove_region_ticket(&self, ticket_type: TicketType, pos: ChunkPos, distance: u8, key: u64) {
        self.chunk_map.with_distance_manager(|manager| {
            manager.remove_region_ticket(ticket_type, pos, distance, key);
        });
    }

    /// Forces the chunk at `pos` to stay loaded and ticking, or releases it. Main thread only.
    pub fn update_chunk_forced(&self, pos: ChunkPos, forced: bool) {
        self.chunk_map
            .with_distance_manager(|manager| manager.update_chunk_forced(pos, forced));
    }

    /// Whether blocks in `pos` tick.
    #[must_use]
    pub fn is_position_ticking(&self, pos: ChunkPos) -> bool {
        self.chunk_map
            .with_distance_manager(|manager| manager.in_block_ticking_range(pos))
    }

    /// Whether entities in `pos` tick.
    #[must_use]
    pub fn is_position_entity_ticking(&self, pos: ChunkPos) -> bool {
        self.chunk_map
            .with_distance_manager(|manager| manager.in_entity_ticking_range(pos))
    }

    /// Whether a player is close enough to `pos` for natural spawning.
    #[must_use]
    pub fn has_players_nearby(&self, pos: ChunkPos) -> bool {
        self.chunk_map
            .with_distance_manager(|manager| manager.has_players_nearby(pos))
    }

    /// The number of chunks eligible for natural spawning.
    #[must_use]
    pub fn natural_spawn_chunk_count(&self) -> usize {
        self.chunk_map
            .with_distance_manager(|manager| manager.natural_spawn_chunk_count())
    }

    /// Every chunk eligible for natural spawning.
    #[must_use]
    pub fn spawn_candidate_chunks(&self) -> Vec<ChunkPos> {
        self.chunk_map
            .with_distance_manager(|manager| manager.spawn_candidate_chunks())
    }

    /// Registers a player standing in `pos`. Main thread only.
    pub fn add_player(&self, player: PlayerId, pos: ChunkPos) {
        self.chunk_map
            .with_distance_manager(|manager| manager.add_player(pos, player));
    }

    /// Moves a player between chunks. Main thread only.
    pub fn move_player(&self, player: PlayerId, from: ChunkPos, to: ChunkPos) {
        if from != to {
            self.chunk_map
                .with_distance_manager(|manager| manager.move_player(from, to, player));
        }
    }

    /// Unregisters a player standing in `pos`. Main thread only.
    pub fn remove_player(&self, player: PlayerId, pos: ChunkPos) {
        self.chunk_map
            .with_distance_manager(|manager| manager.remove_player(pos, player));
    }

    /// Changes the radius of player tickets. Main thread only.
    pub fn set_view_distance(&self, view_distance: u8) {
        log::info!("Changing view distance to {view_distance}");
        self.chunk_map
            .with_distance_manager(|manager| manager.update_player_tickets(view_distance));
    }

    /// Changes the ticking radius around players. Main thread only.
    pub fn set_simulation_distance(&self, simulation_distance: u8) {
        log::info!("Changing simulation distance to {simulation_distance}");
        self.chunk_map.with_distance_manager(|manager| {
            manager.update_simulation_distance(simulation_distance);
        });
    }

    /// Records a block change for broadcasting and relighting. Main thread only.
    pub fn block_changed(&self, pos: &BlockPos) {
        self.chunk_map.block_changed(pos);
    }

    /// Records a light change of a section for broadcasting. Main thread only.
    pub fn on_light_update(&self, layer: LightLayer, pos: SectionPos) {
        self.chunk_map.on_light_update(layer, pos);
    }

    /// Runs one server tick worth of chunk work. Main thread only.
    pub fn tick(&self, has_time: &dyn Fn() -> bool) {
        self.chunk_map.tick(has_time);
    }

    /// Runs one piece of pending chunk work. Returns false if there was none. Main thread only.
    pub fn poll_task(&self) -> bool {
        self.chunk_map.poll_task()
    }

    /// Runs pending chunk work until `done` returns true. Main thread only.
    pub fn managed_block(&self, done: impl FnMut() -> bool) {
        self.chunk_map.managed_block(done);
    }

    /// Saves chunks, waiting for every accessible chunk with `flush`. Main thread only.
    pub fn save(&self, flush: bool) {
        self.chunk_map.save_all_chunks(flush);
    }

    /// Drops transient tickets, optionally saves everything and waits for storage. Main thread only.
    pub fn close(&self, save: bool) {
        self.chunk_map
            .with_distance_manager(|manager| manager.remove_tickets_on_closing());
        self.chunk_map.run_distance_manager_updates();
        if save {
            self.save(true);
        }
        self.chunk_map.close();
    }

    /// The number of holders in memory.
    #[must_use]
    pub fn loaded_chunk_count(&self) -> usize {
        self.chunk_map.loaded_chunk_count()
    }

    /// How many chunks became block ticking since startup.
    #[must_use]
    pub fn ticking_generated(&self) -> usize {
        self.chunk_map.ticking_generated()
    }

    /// A short description of the holder at `pos`.
    #[must_use]
    pub fn chunk_debug_data(&self, pos: ChunkPos) -> String {
        self.chunk_map.chunk_debug_data(pos)
    }

    /// Writes the scheduling state of every chunk as CSV. Main thread only.
    pub fn dump_chunks(&self, out: &mut impl io::Write) -> io::Result<()> {
        self.chunk_map.dump_chunks(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{proto_chunk::ProtoChunk, section::Sections};

    fn chunk(x: i32) -> Arc<ChunkAccess> {
        Arc::new(ChunkAccess::Proto(ProtoChunk::new(
            Sections::new_empty(1),
            ChunkPos::new(x, 0),
        )))
    }

    #[test]
    fn test_recent_chunks_keep_the_last_four() {
        let mut recent = RecentChunks::default();
        for x in 0..5 {
            recent.store(0, i64::from(x), ChunkStatus::Full, Some(chunk(x)));
        }
        assert!(recent.get(0, 0, ChunkStatus::Full).is_none());
        for x in 1..5 {
            let hit = recent.get(0, i64::from(x), ChunkStatus::Full);
            assert!(matches!(hit, Some(Some(chunk)) if chunk.pos() == ChunkPos::new(x, 0)));
        }
        assert!(recent.get(0, 1, ChunkStatus::Empty).is_none());
    }

    #[test]
    fn test_recent_chunks_are_dropped_on_a_new_epoch() {
        let mut recent = RecentChunks::default();
        recent.store(0, 7, ChunkStatus::Full, None);
        assert!(matches!(recent.get(0, 7, ChunkStatus::Full), Some(None)));
        assert!(recent.get(1, 7, ChunkStatus::Full).is_none());
        assert!(recent.entries.is_empty());
    }
}
