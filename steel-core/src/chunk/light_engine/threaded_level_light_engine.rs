//! Threaded light engine with task queue system.
//!
//! Light work is queued per chunk through a priority dispatcher and executed in batches.
//! Each batch runs its `PreUpdate` tasks, then light propagation, then its `PostUpdate` tasks,
//! so a chunk's light future only completes after the propagation covering it ran.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use steel_utils::{BlockPos, ChunkPos, SectionPos, locks::SyncMutex};

use crate::chunk::{
    chunk_access::ChunkAccess,
    chunk_future::{ChunkFuture, Completable},
    chunk_task_dispatcher::ChunkTaskDispatcher,
    light_engine::LightEngine,
    section::LevelHeight,
    worker_pool::{Task, TaskExecutor},
};

/// When a light task runs relative to propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// Before propagation, to feed it.
    PreUpdate,
    /// After propagation, to publish its results.
    PostUpdate,
}

/// Light engine driven through a chunk task dispatcher.
pub struct ThreadedLevelLightEngine {
    engine: SyncMutex<Box<dyn LightEngine>>,
    light_tasks: SyncMutex<Vec<(TaskType, Task)>>,
    update_lock: SyncMutex<()>,
    dispatcher: Arc<ChunkTaskDispatcher>,
    executor: Arc<dyn TaskExecutor>,
    scheduled: AtomicBool,
    batch_size: usize,
    height: LevelHeight,
}

impl ThreadedLevelLightEngine {
    /// Wraps `engine`, running its batches on `executor`.
    #[must_use]
    pub fn new(
        engine: Box<dyn LightEngine>,
        executor: Arc<dyn TaskExecutor>,
        batch_size: usize,
        height: LevelHeight,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine: SyncMutex::new(engine),
            light_tasks: SyncMutex::new(Vec::new()),
            update_lock: SyncMutex::new(()),
            dispatcher: ChunkTaskDispatcher::new(executor.clone()),
            executor,
            scheduled: AtomicBool::new(false),
            batch_size: batch_size.max(1),
            height,
        })
    }

    /// The dispatcher light tasks are queued on.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<ChunkTaskDispatcher> {
        &self.dispatcher
    }

    /// Registers the non-empty sections of `chunk` and enables its light once they are known.
    ///
    /// This does not compute light. The returned future completes with the chunk after the
    /// batch containing the registration ran.
    pub fn initialize_light(
        self: &Arc<Self>,
        chunk: Arc<ChunkAccess>,
        light_enabled: bool,
        queue_level: u8,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let pos = chunk.pos();
        let section_chunk = chunk.clone();
        let height = self.height;
        let engine = self.clone();
        self.add_task(pos, queue_level, TaskType::PreUpdate, move || {
            let mut light = engine.engine.lock();
            let sections = section_chunk.sections();
            for index in 0..sections.len() {
                if !sections.has_only_air(index) {
                    let y = height.min_section() + index as i32;
                    light.update_section_status(SectionPos::new(pos.x(), y, pos.z()), false);
                }
            }
        });

        let future = Completable::new();
        let result = future.clone();
        let engine = self.clone();
        self.add_task(pos, queue_level, TaskType::PostUpdate, move || {
            let mut light = engine.engine.lock();
            light.set_light_enabled(pos, light_enabled);
            light.retain_data(pos, false);
            drop(light);
            result.complete(Ok(chunk));
        });
        future
    }

    /// Computes the light of `chunk`. Its light is marked correct once the future completes.
    pub fn light_chunk(
        self: &Arc<Self>,
        chunk: Arc<ChunkAccess>,
        lighted: bool,
        queue_level: u8,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        let pos = chunk.pos();
        chunk.set_light_correct(false);
        let engine = self.clone();
        self.add_task(pos, queue_level, TaskType::PreUpdate, move || {
            if !lighted {
                engine.engine.lock().propagate_light_sources(pos);
            }
        });

        let future = Completable::new();
        let result = future.clone();
        self.add_task(pos, queue_level, TaskType::PostUpdate, move || {
            chunk.set_light_correct(true);
            result.complete(Ok(chunk));
        });
        future
    }

    /// Drops the light of a chunk that left the loaded world.
    pub fn update_chunk_status(self: &Arc<Self>, pos: ChunkPos, queue_level: u8) {
        let engine = self.clone();
        self.add_task(pos, queue_level, TaskType::PreUpdate, move || {
            let mut light = engine.engine.lock();
            light.retain_data(pos, false);
            light.set_light_enabled(pos, false);
        });
    }

    /// Queues a light recheck around a changed block.
    pub fn check_block(self: &Arc<Self>, pos: BlockPos, queue_level: u8) {
        let engine = self.clone();
        self.add_task(pos.chunk_pos(), queue_level, TaskType::PreUpdate, move || {
            engine.engine.lock().check_block(pos);
        });
    }

    fn add_task(
        self: &Arc<Self>,
        pos: ChunkPos,
        queue_level: u8,
        task_type: TaskType,
        task: impl FnOnce() + Send + 'static,
    ) {
        let engine = self.clone();
        self.dispatcher.submit(
            Box::new(move || {
                let full = {
                    let mut tasks = engine.light_tasks.lock();
                    tasks.push((task_type, Box::new(task)));
                    tasks.len() >= engine.batch_size
                };
                if full {
                    engine.run_update();
                }
            }),
            pos.as_i64(),
            queue_level,
        );
    }

    /// Schedules a batch if there is queued work and none is scheduled yet.
    pub fn try_schedule_update(self: &Arc<Self>) {
        if !self.has_work() {
            return;
        }
        if self
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let engine = self.clone();
            self.executor.execute(Box::new(move || {
                engine.run_update();
                engine.scheduled.store(false, Ordering::Release);
            }));
        }
    }

    /// Runs one batch of at most `batch_size` tasks.
    pub fn run_update(&self) {
        let _update = self.update_lock.lock();
        let batch: Vec<(TaskType, Task)> = {
            let mut tasks = self.light_tasks.lock();
            let size = tasks.len().min(self.batch_size);
            tasks.drain(..size).collect()
        };

        let (pre, post): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|(task_type, _)| *task_type == TaskType::PreUpdate);
        for (_, task) in pre {
            task();
        }
        let changed = self.engine.lock().run_light_updates();
        if changed > 0 {
            log::trace!("Light batch changed {changed} sections");
        }
        for (_, task) in post {
            task();
        }
    }

    /// Whether tasks or light updates are queued.
    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.light_tasks.lock().is_empty() || self.engine.lock().has_light_work()
    }
}
