//! The chunk map owns every chunk holder and drives them through generation, saving and unloading.
//!
//! All table mutation happens on the main thread. Other threads only reach holders through the
//! generation tasks they were handed and through the visible table, a snapshot of the updating
//! table republished after every scheduling pass.
mod debug;
mod persistence;

use std::{
    io, mem,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Instant,
};

use arc_swap::ArcSwap;
use crossbeam::queue::SegQueue;
use rustc_hash::{FxHashMap, FxHashSet};
use steel_utils::{BlockPos, ChunkPos, SectionPos, locks::SyncMutex};
use tokio::runtime::Runtime;

pub use persistence::CachedChunkType;

use crate::{
    chunk::{
        chunk_access::{ChunkAccess, ChunkStatus, FullChunkStatus},
        chunk_future::{ChunkFuture, Completable},
        chunk_generation_task::{ChunkGenerationTask, GeneratingChunkMap, StaticCache2D},
        chunk_holder::{ChunkHolder, ChunkTierScheduler},
        chunk_level::ChunkLevel,
        chunk_pyramid::ChunkStep,
        chunk_result::{ChunkLoadError, ChunkResult, ChunkSystemError, invariant_violation},
        chunk_task_dispatcher::ChunkTaskDispatcher,
        chunk_ticket_manager::{
            ChunkLevelSink, DistanceManager, PlayerTicketChange, PlayerTicketUpdate,
        },
        hooks::ChunkMapHooks,
        level_chunk::UnsavedListener,
        light_engine::{LightLayer, LightListener, SectionLightEngine, ThreadedLevelLightEngine},
        main_thread_executor::MainThreadExecutor,
        proto_chunk::ProtoChunk,
        section::{LevelHeight, Sections},
        world_gen_context::{ChunkGeneratorType, WorldGenContext},
        worker_pool::{Task, TaskExecutor},
    },
    chunk_saver::{SerializedChunk, storage::ChunkStorage},
    config::ChunkSystemConfig,
};

type HolderTable = FxHashMap<i64, Arc<ChunkHolder>>;

/// Everything a chunk map is built from besides its configuration.
pub struct ChunkMapParts {
    /// Produces terrain for chunks that were never stored.
    pub generator: Arc<ChunkGeneratorType>,
    /// Where chunks are loaded from and saved to.
    pub storage: ChunkStorage,
    /// Runs generation and light work.
    pub worker: Arc<dyn TaskExecutor>,
    /// The mailbox of the thread owning the chunk tables.
    pub main_thread: Arc<MainThreadExecutor>,
    /// Runs storage reads and writes.
    pub runtime: Arc<Runtime>,
    /// Callbacks into the rest of the server.
    pub hooks: ChunkMapHooks,
    /// The vertical extent of the world.
    pub height: LevelHeight,
}

/// Owns the chunk holders of one world.
pub struct ChunkMap {
    this: Weak<Self>,
    config: ChunkSystemConfig,
    height: LevelHeight,
    updating_chunk_map: SyncMutex<HolderTable>,
    visible_chunk_map: ArcSwap<HolderTable>,
    modified: AtomicBool,
    pending_unloads: SyncMutex<HolderTable>,
    to_drop: SyncMutex<FxHashSet<i64>>,
    unload_queue: SegQueue<Task>,
    pending_generation_tasks: SyncMutex<Vec<Arc<ChunkGenerationTask>>>,
    holders_to_broadcast: SyncMutex<Vec<Arc<ChunkHolder>>>,
    distance_manager: SyncMutex<DistanceManager>,
    main_thread: Arc<MainThreadExecutor>,
    world_gen_dispatcher: Arc<ChunkTaskDispatcher>,
    ticket_dispatcher: Arc<ChunkTaskDispatcher>,
    light_engine: Arc<ThreadedLevelLightEngine>,
    world_gen_context: Arc<WorldGenContext>,
    storage: Arc<ChunkStorage>,
    runtime: Arc<Runtime>,
    hooks: ChunkMapHooks,
    chunk_type_cache: SyncMutex<FxHashMap<i64, CachedChunkType>>,
    chunk_save_cooldowns: SyncMutex<FxHashMap<i64, Instant>>,
    chunks_to_eagerly_save: SyncMutex<FxHashSet<i64>>,
    active_chunk_writes: Arc<AtomicUsize>,
    ticking_generated: AtomicUsize,
    update_epoch: AtomicU64,
}

impl ChunkMap {
    /// Creates an empty chunk map.
    #[must_use]
    pub fn new(config: ChunkSystemConfig, parts: ChunkMapParts) -> Arc<Self> {
        let ChunkMapParts {
            generator,
            storage,
            worker,
            main_thread,
            runtime,
            hooks,
            height,
        } = parts;

        Arc::new_cyclic(|this: &Weak<Self>| {
            let light_map = this.clone();
            let light_main_thread = main_thread.clone();
            let light_listener: LightListener = Arc::new(move |pos, layer, section_y| {
                let map = light_map.clone();
                light_main_thread.execute(Box::new(move || {
                    if let Some(map) = map.upgrade() {
                        map.on_light_update(layer, SectionPos::new(pos.x(), section_y, pos.z()));
                    }
                }));
            });
            let light_engine = ThreadedLevelLightEngine::new(
                Box::new(SectionLightEngine::new(height, light_listener)),
                worker.clone(),
                config.light_batch_size,
                height,
            );

            let unsaved_map = this.clone();
            let unsaved_listener: UnsavedListener = Arc::new(move |pos: ChunkPos| {
                if let Some(map) = unsaved_map.upgrade() {
                    map.chunks_to_eagerly_save.lock().insert(pos.as_i64());
                }
            });

            let world_gen_context = Arc::new(WorldGenContext {
                generator,
                light_engine: light_engine.clone(),
                worker: worker.clone(),
                main_thread: main_thread.clone(),
                height,
                unsaved_listener,
            });

            let mut distance_manager =
                DistanceManager::new(config.natural_spawn_radius, config.simulation_distance);
            distance_manager.update_player_tickets(config.view_distance);

            Self {
                this: this.clone(),
                height,
                updating_chunk_map: SyncMutex::new(FxHashMap::default()),
                visible_chunk_map: ArcSwap::from_pointee(FxHashMap::default()),
                modified: AtomicBool::new(false),
                pending_unloads: SyncMutex::new(FxHashMap::default()),
                to_drop: SyncMutex::new(FxHashSet::default()),
                unload_queue: SegQueue::new(),
                pending_generation_tasks: SyncMutex::new(Vec::new()),
                holders_to_broadcast: SyncMutex::new(Vec::new()),
                distance_manager: SyncMutex::new(distance_manager),
                world_gen_dispatcher: ChunkTaskDispatcher::new(worker),
                ticket_dispatcher: ChunkTaskDispatcher::throttling(
                    main_thread.clone(),
                    config.player_ticket_throttle,
                ),
                main_thread,
                light_engine,
                world_gen_context,
                storage: Arc::new(storage),
                runtime,
                hooks,
                chunk_type_cache: SyncMutex::new(FxHashMap::default()),
                chunk_save_cooldowns: SyncMutex::new(FxHashMap::default()),
                chunks_to_eagerly_save: SyncMutex::new(FxHashSet::default()),
                active_chunk_writes: Arc::new(AtomicUsize::new(0)),
                ticking_generated: AtomicUsize::new(0),
                update_epoch: AtomicU64::new(0),
                config,
            }
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.this
            .upgrade()
            .unwrap_or_else(|| invariant_violation("The chunk map was used while being dropped"))
    }

    /// The configuration the map was built with.
    #[must_use]
    pub const fn config(&self) -> &ChunkSystemConfig {
        &self.config
    }

    /// The vertical extent of the world.
    #[must_use]
    pub const fn height(&self) -> LevelHeight {
        self.height
    }

    /// The mailbox of the main thread.
    #[must_use]
    pub const fn main_thread(&self) -> &Arc<MainThreadExecutor> {
        &self.main_thread
    }

    /// The light engine of this world.
    #[must_use]
    pub const fn light_engine(&self) -> &Arc<ThreadedLevelLightEngine> {
        &self.light_engine
    }

    /// Runs `f` with exclusive access to the distance manager. Main thread only.
    pub fn with_distance_manager<R>(&self, f: impl FnOnce(&mut DistanceManager) -> R) -> R {
        f(&mut self.distance_manager.lock())
    }

    /// Increases whenever a scheduling pass changed ticket levels or republished the visible table.
    #[must_use]
    pub fn update_epoch(&self) -> u64 {
        self.update_epoch.load(Ordering::Acquire)
    }

    /// How many chunks became block ticking since the map was created.
    #[must_use]
    pub fn ticking_generated(&self) -> usize {
        self.ticking_generated.load(Ordering::Relaxed)
    }

    /// The holder at `pos` in the table being updated. Main thread only.
    #[must_use]
    pub fn updating_chunk_if_present(&self, pos: i64) -> Option<Arc<ChunkHolder>> {
        self.updating_chunk_map.lock().get(&pos).cloned()
    }

    /// The holder at `pos` as of the last published snapshot.
    #[must_use]
    pub fn visible_chunk_if_present(&self, pos: i64) -> Option<Arc<ChunkHolder>> {
        self.visible_chunk_map.load().get(&pos).cloned()
    }

    /// The number of holders in the published snapshot.
    #[must_use]
    pub fn loaded_chunk_count(&self) -> usize {
        self.visible_chunk_map.load().len()
    }

    /// Every chunk that is at least accessible, in no particular order.
    #[must_use]
    pub fn accessible_chunks(&self) -> Vec<Arc<ChunkAccess>> {
        self.visible_chunk_map
            .load()
            .values()
            .filter_map(|holder| holder.full_chunk())
            .collect()
    }

    fn promote_chunk_map(&self) -> bool {
        if !self.modified.swap(false, Ordering::AcqRel) {
            return false;
        }
        let snapshot = self.updating_chunk_map.lock().clone();
        self.visible_chunk_map.store(Arc::new(snapshot));
        true
    }

    /// Brings ticket levels to a fixed point and applies them to the holders.
    ///
    /// Ceilings are raised or lowered on every changed holder before any tier future is updated.
    /// Returns true if anything changed.
    pub fn run_distance_manager_updates(&self) -> bool {
        let update = {
            let mut distance_manager = self.distance_manager.lock();
            distance_manager.run_all_updates(self)
        };
        let updated = !update.is_empty();

        for holder in &update.holders {
            let pos = holder.pos();
            holder
                .generation()
                .update_highest_allowed_status(holder.ticket_level(), |status| {
                    self.schedule_generation_task(status, pos)
                });
        }
        let map = self.arc();
        for holder in &update.holders {
            holder.update_futures(&map);
        }

        self.apply_player_tickets(&update.player_tickets);
        for pos in update.tickets_to_release {
            self.release_player_ticket_once_ticking(pos);
        }

        let promoted = self.publish_chunk_map();
        self.run_generation_tasks();
        if updated && !promoted {
            self.update_epoch.fetch_add(1, Ordering::AcqRel);
        }
        updated || promoted
    }

    fn publish_chunk_map(&self) -> bool {
        let promoted = self.promote_chunk_map();
        if promoted {
            self.update_epoch.fetch_add(1, Ordering::AcqRel);
        }
        promoted
    }

    fn apply_player_tickets(&self, updates: &[PlayerTicketUpdate]) {
        for update in updates {
            if let Some(old_level) = update.old_queue_level {
                self.ticket_dispatcher
                    .on_level_change(update.pos, old_level, update.level);
            }
            let pos = update.pos;
            match update.change {
                Some(PlayerTicketChange::Add) => {
                    let map = self.this.clone();
                    self.ticket_dispatcher.submit(
                        Box::new(move || {
                            if let Some(map) = map.upgrade() {
                                map.apply_player_ticket(pos);
                            }
                        }),
                        pos,
                        update.level,
                    );
                }
                Some(PlayerTicketChange::Remove) => {
                    self.ticket_dispatcher.release(pos, true, || {
                        self.distance_manager.lock().remove_player_ticket(pos);
                    });
                }
                None => {}
            }
        }
    }

    fn apply_player_ticket(&self, pos: i64) {
        let applied = self.distance_manager.lock().apply_player_ticket(pos);
        if !applied {
            self.ticket_dispatcher.release(pos, false, || {});
        }
    }

    fn release_player_ticket_once_ticking(&self, pos: i64) {
        let Some(holder) = self.updating_chunk_if_present(pos) else {
            invariant_violation(format!(
                "No chunk holder at {} after its player ticket was applied",
                ChunkPos::from_i64(pos)
            ));
        };
        let dispatcher = self.ticket_dispatcher.clone();
        let main_thread = self.main_thread.clone();
        holder.entity_ticking_chunk_future().on_complete(move |_| {
            main_thread.execute(Box::new(move || dispatcher.release(pos, false, || {})));
        });
    }

    fn schedule_generation_task(&self, target: ChunkStatus, pos: ChunkPos) -> Arc<ChunkGenerationTask> {
        let map: Arc<dyn GeneratingChunkMap> = self.arc();
        let task = ChunkGenerationTask::create(map, target, pos);
        self.pending_generation_tasks.lock().push(task.clone());
        task
    }

    fn run_generation_tasks(&self) {
        let tasks = mem::take(&mut *self.pending_generation_tasks.lock());
        for task in tasks {
            self.run_generation_task(task);
        }
    }

    fn run_generation_task(&self, task: Arc<ChunkGenerationTask>) {
        let pos = task.pos().as_i64();
        let queue_level = task.center().queue_level();
        let map = self.this.clone();
        self.world_gen_dispatcher.submit(
            Box::new(move || {
                if let Some(waiting) = task.run_until_wait() {
                    waiting.on_complete(move |_| {
                        if let Some(map) = map.upgrade() {
                            map.run_generation_task(task);
                        }
                    });
                }
            }),
            pos,
            queue_level,
        );
    }

    /// Requests the chunk at `pos` at `status`. Main thread only.
    ///
    /// Resolves to unloaded if the position's ticket level does not allow `status`.
    #[must_use]
    pub fn schedule_chunk(&self, pos: ChunkPos, status: ChunkStatus) -> ChunkFuture<Arc<ChunkAccess>> {
        let Some(holder) = self.visible_chunk_if_present(pos.as_i64()) else {
            return Completable::completed(Err(ChunkLoadError::Unloaded));
        };
        if holder.ticket_level() > ChunkLevel::by_status(status) {
            return Completable::completed(Err(ChunkLoadError::Unloaded));
        }
        let future = holder
            .generation()
            .schedule_chunk_generation_task(status, |target| {
                self.schedule_generation_task(target, pos)
            });
        self.run_generation_tasks();
        future
    }

    /// Resolves once every chunk within `range` of the holder reached the stage `status_at(distance)` gives.
    ///
    /// The result is the holder's own chunk. A missing neighbour fails the whole range.
    fn chunk_range_future(
        &self,
        holder: &Arc<ChunkHolder>,
        range: i32,
        status_at: impl Fn(i32) -> ChunkStatus,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let center = holder.pos();
        let mut neighbours = Vec::new();
        {
            let updating = self.updating_chunk_map.lock();
            for dz in -range..=range {
                for dx in -range..=range {
                    let pos = ChunkPos::new(center.x() + dx, center.z() + dz);
                    let Some(neighbour) = updating.get(&pos.as_i64()) else {
                        return Completable::completed(Err(ChunkLoadError::MissingChunks(format!(
                            "{pos} is not loaded while preparing {center}"
                        ))));
                    };
                    neighbours.push((dx.abs().max(dz.abs()), neighbour.clone()));
                }
            }
        }

        let futures: Vec<_> = neighbours
            .iter()
            .map(|(distance, neighbour)| {
                let pos = neighbour.pos();
                neighbour
                    .generation()
                    .schedule_chunk_generation_task(status_at(*distance), |target| {
                        self.schedule_generation_task(target, pos)
                    })
            })
            .collect();
        let center_index = futures.len() / 2;

        Completable::all(futures).map(move |results| {
            let failures: Vec<&ChunkLoadError> = results
                .iter()
                .filter_map(|result| result.as_ref().err())
                .collect();
            if failures.is_empty() {
                return results[center_index].clone();
            }
            match failures
                .iter()
                .find(|error| ***error != ChunkLoadError::Unloaded)
            {
                None => Err(ChunkLoadError::Unloaded),
                Some(error) => Err(ChunkLoadError::MissingChunks(format!(
                    "around {center}: {error}"
                ))),
            }
        })
    }

    fn status_around_full_chunk(distance: i32) -> ChunkStatus {
        let distance = u8::try_from(distance).unwrap_or(u8::MAX);
        ChunkLevel::generation_status(ChunkLevel::FULL_STATUS_LEVEL.saturating_add(distance))
            .unwrap_or(ChunkStatus::Empty)
    }

    /// Completes with the outcome of `future` on the main thread after running `on_ready` with the chunk.
    fn then_on_main_thread(
        &self,
        future: &ChunkFuture<Arc<ChunkAccess>>,
        on_ready: impl FnOnce(&Self, &Arc<ChunkAccess>) + Send + 'static,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let ready = Completable::new();
        let result = ready.clone();
        let map = self.this.clone();
        let main_thread = self.main_thread.clone();
        future.on_complete(move |outcome| {
            let outcome = outcome.clone();
            main_thread.execute(Box::new(move || {
                if let (Ok(chunk), Some(map)) = (&outcome, map.upgrade()) {
                    on_ready(&map, chunk);
                }
                result.complete(outcome);
            }));
        });
        ready
    }

    fn create_empty_chunk(&self, pos: ChunkPos) -> Arc<ChunkAccess> {
        Arc::new(ChunkAccess::Proto(ProtoChunk::new(
            Sections::new_empty(self.height.section_count),
            pos,
        )))
    }

    fn schedule_chunk_load(&self, pos: ChunkPos) -> ChunkFuture<Arc<ChunkAccess>> {
        self.hooks.storage.prefetch_on_load(pos);

        let future = Completable::new();
        let result = future.clone();
        let storage = self.storage.clone();
        let main_thread = self.main_thread.clone();
        let map = self.this.clone();
        self.runtime.spawn(async move {
            let read = storage.read(pos).await;
            let mailbox = main_thread.clone();
            mailbox.execute(Box::new(move || {
                let loaded = match map.upgrade() {
                    Some(map) => map.finish_chunk_load(pos, read),
                    None => Err(ChunkLoadError::Unloaded),
                };
                result.complete(loaded);
            }));
        });
        future
    }

    fn finish_chunk_load(
        &self,
        pos: ChunkPos,
        read: io::Result<Option<SerializedChunk>>,
    ) -> ChunkResult<Arc<ChunkAccess>> {
        match read {
            Ok(Some(serialized)) if serialized.pos == pos => {
                let chunk = serialized.into_chunk(self.height);
                self.mark_position(pos, chunk.persisted_status().chunk_type());
                Ok(Arc::new(chunk))
            }
            Ok(Some(serialized)) => {
                log::error!(
                    "Chunk stored at {pos} claims to be at {}, replacing it",
                    serialized.pos
                );
                self.mark_position_replaceable(pos);
                Ok(self.create_empty_chunk(pos))
            }
            Ok(None) => Ok(self.create_empty_chunk(pos)),
            Err(error) => {
                log::error!("Couldn't load chunk {pos}, using an empty chunk: {error}");
                self.hooks.failure_reporter.report_load_failure(pos, &error);
                self.mark_position_replaceable(pos);
                Ok(self.create_empty_chunk(pos))
            }
        }
    }

    /// Records a block change for broadcasting. Main thread only.
    pub fn block_changed(&self, pos: &BlockPos) {
        let Some(holder) = self.visible_chunk_if_present(pos.chunk_pos().as_i64()) else {
            return;
        };
        if holder.block_changed(pos) {
            self.holders_to_broadcast.lock().push(holder.clone());
        }
        self.light_engine.check_block(*pos, holder.queue_level());
    }

    /// Records a light change of one section for broadcasting. Main thread only.
    pub fn on_light_update(&self, layer: LightLayer, pos: SectionPos) {
        let Some(holder) = self.visible_chunk_if_present(pos.chunk_pos().as_i64()) else {
            return;
        };
        if holder.section_light_changed(layer, pos.y()) {
            self.holders_to_broadcast.lock().push(holder);
        }
    }

    /// Hands every pending block and light change to the broadcaster.
    pub fn broadcast_changed_chunks(&self) {
        let holders = mem::take(&mut *self.holders_to_broadcast.lock());
        let mut seen = FxHashSet::default();
        for holder in holders {
            if !seen.insert(holder.pos().as_i64()) {
                continue;
            }
            if let Some(changes) = holder.broadcast_changes() {
                self.hooks.broadcaster.broadcast(changes);
            }
        }
    }

    /// Runs one piece of main thread work: a scheduling pass if tickets changed, otherwise one queued task.
    ///
    /// Returns false if there was nothing to do.
    pub fn poll_task(&self) -> bool {
        if self.run_distance_manager_updates() {
            return true;
        }
        self.light_engine.try_schedule_update();
        self.main_thread.poll_task()
    }

    /// Keeps the main thread busy with chunk work until `done` returns true.
    ///
    /// # Panics
    /// Panics with the chunk system diagnostic if a worker parked a fatal error meanwhile.
    pub fn managed_block(&self, done: impl FnMut() -> bool) {
        if let Err(message) = self.main_thread.managed_block(done, || self.poll_task()) {
            self.raise_fatal(message);
        }
    }

    /// Re-raises a fatal error parked by a worker.
    ///
    /// # Panics
    /// Panics if there is one.
    pub fn rethrow_fatal(&self) {
        if let Some(message) = self.main_thread.take_fatal() {
            self.raise_fatal(message);
        }
    }

    fn raise_fatal(&self, message: String) -> ! {
        let error = ChunkSystemError {
            message,
            diagnostic: self.future_diagnostic(),
        };
        log::error!("{error}");
        panic!("{error}")
    }

    /// Periodic work: expiring tickets, a scheduling pass, broadcasting, unloading and eager saving.
    pub fn tick(&self, has_time: &dyn Fn() -> bool) {
        self.rethrow_fatal();
        self.distance_manager.lock().purge_stale_tickets();
        self.run_distance_manager_updates();
        self.broadcast_changed_chunks();
        self.process_unloads(has_time);
        self.publish_chunk_map();
        self.light_engine.try_schedule_update();
    }

    /// Whether generation, light or ticket work is queued.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.world_gen_dispatcher.has_work()
            || self.light_engine.has_work()
            || self.light_engine.dispatcher().has_work()
            || self.ticket_dispatcher.has_work()
            || self.main_thread.pending() > 0
            || !self.unload_queue.is_empty()
    }

    /// One line per dispatcher describing its queue.
    #[must_use]
    pub fn dispatcher_status(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.world_gen_dispatcher.debug_status(),
            self.light_engine.dispatcher().debug_status(),
            self.ticket_dispatcher.debug_status()
        )
    }
}

impl ChunkLevelSink for ChunkMap {
    fn update_chunk_scheduling(
        &self,
        pos: i64,
        new_level: u8,
        old_level: u8,
    ) -> Option<Arc<ChunkHolder>> {
        let existing = self.updating_chunk_if_present(pos);
        if !ChunkLevel::is_loaded(old_level) && !ChunkLevel::is_loaded(new_level) {
            return existing;
        }

        if let Some(holder) = &existing {
            holder.set_ticket_level(new_level);
            let mut to_drop = self.to_drop.lock();
            if ChunkLevel::is_loaded(new_level) {
                to_drop.remove(&pos);
            } else {
                to_drop.insert(pos);
            }
        }

        if ChunkLevel::is_loaded(new_level) && existing.is_none() {
            let revived = self.pending_unloads.lock().remove(&pos);
            let holder = match revived {
                Some(holder) => {
                    holder.set_ticket_level(new_level);
                    holder
                }
                None => Arc::new(ChunkHolder::new(
                    ChunkPos::from_i64(pos),
                    new_level,
                    self.height,
                )),
            };
            self.updating_chunk_map.lock().insert(pos, holder.clone());
            self.modified.store(true, Ordering::Release);
            return Some(holder);
        }
        existing
    }
}

impl GeneratingChunkMap for ChunkMap {
    fn acquire_generation(&self, pos: ChunkPos) -> Option<Arc<ChunkHolder>> {
        let holder = self.updating_chunk_if_present(pos.as_i64())?;
        if let Some(save_sync) = holder.generation().increase_generation_ref_count() {
            holder.add_save_dependency(&save_sync);
        }
        Some(holder)
    }

    fn release_generation(&self, holder: &Arc<ChunkHolder>) {
        holder.generation().decrease_generation_ref_count();
    }

    fn apply_step(
        &self,
        holder: &Arc<ChunkHolder>,
        step: &Arc<ChunkStep>,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let pos = holder.pos();
        if step.target_status == ChunkStatus::Empty {
            return self.schedule_chunk_load(pos);
        }

        let parent_status = step.target_status.parent();
        let Some(parent) = holder.generation().chunk_if_present_unchecked(parent_status) else {
            invariant_violation(format!(
                "Parent chunk missing at {pos} for {}. Expected {parent_status} to be present",
                step.target_status
            ));
        };

        let future = step.apply(&self.world_gen_context, cache, parent);
        let map = self.this.clone();
        future.on_complete(move |result| {
            if let Err(ChunkLoadError::Generation(message)) = result {
                log::error!("Failed to generate chunk {pos}: {message}");
                if let Some(map) = map.upgrade() {
                    map.mark_position_replaceable(pos);
                }
            }
        });
        future
    }
}

impl ChunkTierScheduler for ChunkMap {
    fn prepare_accessible_chunk(&self, holder: &Arc<ChunkHolder>) -> ChunkFuture<Arc<ChunkAccess>> {
        self.chunk_range_future(holder, 1, Self::status_around_full_chunk)
    }

    fn prepare_ticking_chunk(&self, holder: &Arc<ChunkHolder>) -> ChunkFuture<Arc<ChunkAccess>> {
        let ranged = self.chunk_range_future(holder, 1, |_| ChunkStatus::Full);
        self.then_on_main_thread(&ranged, |map, chunk| {
            if let Some(level_chunk) = chunk.as_level_chunk() {
                level_chunk.post_process_generation();
            }
            map.ticking_generated.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn prepare_entity_ticking_chunk(
        &self,
        holder: &Arc<ChunkHolder>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        self.chunk_range_future(holder, 2, |_| ChunkStatus::Full)
    }

    fn on_full_chunk_status_change(&self, pos: ChunkPos, status: FullChunkStatus) {
        log::trace!("Chunk {pos} is now {status}");
        self.hooks
            .status_listener
            .on_full_chunk_status_change(pos, status);
    }

    fn execute_on_main_thread(&self, task: Box<dyn FnOnce() + Send>) {
        self.main_thread.execute(task);
    }

    fn on_level_change(&self, pos: ChunkPos, queue_level: u8, ticket_level: u8) {
        let key = pos.as_i64();
        self.world_gen_dispatcher
            .on_level_change(key, queue_level, ticket_level);
        self.light_engine
            .dispatcher()
            .on_level_change(key, queue_level, ticket_level);
    }
}
