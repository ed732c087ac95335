//! Drives one chunk to a target stage, one dependency layer at a time.
//!
//! A task claims every holder within the radius its target needs, then repeatedly schedules the
//! next stage on every neighbour that stage requires. Whenever a scheduled step is still running
//! the task hands the step's future back to its runner and is resumed once it completes.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use steel_utils::{ChunkPos, locks::SyncMutex};

use crate::chunk::{
    chunk_access::{ChunkAccess, ChunkStatus},
    chunk_future::ChunkFuture,
    chunk_holder::ChunkHolder,
    chunk_pyramid::{ChunkStep, GENERATION_PYRAMID, LOADING_PYRAMID},
    chunk_result::{ChunkLoadError, invariant_violation},
};

/// A fixed square of values around a center, indexed by absolute chunk coordinates.
pub struct StaticCache2D<T> {
    min_x: i32,
    min_z: i32,
    size: i32,
    cache: Box<[T]>,
}

impl<T> StaticCache2D<T> {
    /// Fills the square of `radius` around the center with `initializer(x, z)`.
    pub fn create(
        center_x: i32,
        center_z: i32,
        radius: i32,
        mut initializer: impl FnMut(i32, i32) -> T,
    ) -> Self {
        let size = radius * 2 + 1;
        let min_x = center_x - radius;
        let min_z = center_z - radius;
        let mut cache = Vec::with_capacity((size * size) as usize);
        for z in 0..size {
            for x in 0..size {
                cache.push(initializer(min_x + x, min_z + z));
            }
        }
        Self {
            min_x,
            min_z,
            size,
            cache: cache.into_boxed_slice(),
        }
    }

    /// Returns true if `(x, z)` lies inside the square.
    #[must_use]
    pub fn contains(&self, x: i32, z: i32) -> bool {
        let dx = x - self.min_x;
        let dz = z - self.min_z;
        dx >= 0 && dx < self.size && dz >= 0 && dz < self.size
    }

    /// The value at `(x, z)`, if it lies inside the square.
    #[must_use]
    pub fn get(&self, x: i32, z: i32) -> Option<&T> {
        if self.contains(x, z) {
            let index = (x - self.min_x) + (z - self.min_z) * self.size;
            self.cache.get(index as usize)
        } else {
            None
        }
    }

    /// Every value in the square.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cache.iter()
    }

    /// The radius of the square.
    #[must_use]
    pub const fn radius(&self) -> i32 {
        self.size / 2
    }
}

/// What a generation task needs from the chunk map.
pub trait GeneratingChunkMap: Send + Sync {
    /// Claims the holder at `pos` for generation. `None` if no holder exists there.
    fn acquire_generation(&self, pos: ChunkPos) -> Option<Arc<ChunkHolder>>;

    /// Releases a claim taken with [`GeneratingChunkMap::acquire_generation`].
    fn release_generation(&self, holder: &Arc<ChunkHolder>);

    /// Runs `step` on `holder`, which has been started for the step's stage.
    fn apply_step(
        &self,
        holder: &Arc<ChunkHolder>,
        step: &Arc<ChunkStep>,
        cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
    ) -> ChunkFuture<Arc<ChunkAccess>>;
}

struct TaskState {
    scheduled_status: Option<ChunkStatus>,
    needs_generation: bool,
    scheduled_layer: Vec<ChunkFuture<Arc<ChunkAccess>>>,
    failure: Option<ChunkLoadError>,
    released: bool,
}

/// Advances one chunk to its target stage.
pub struct ChunkGenerationTask {
    chunk_map: Arc<dyn GeneratingChunkMap>,
    pos: ChunkPos,
    target_status: ChunkStatus,
    center: Arc<ChunkHolder>,
    cache: Arc<StaticCache2D<Arc<ChunkHolder>>>,
    marked_for_cancellation: AtomicBool,
    state: SyncMutex<TaskState>,
}

impl ChunkGenerationTask {
    /// Creates a task and claims every holder it may need.
    #[must_use]
    pub fn create(
        chunk_map: Arc<dyn GeneratingChunkMap>,
        target_status: ChunkStatus,
        pos: ChunkPos,
    ) -> Arc<Self> {
        let radius = GENERATION_PYRAMID
            .get_step_to(target_status)
            .get_accumulated_radius_of(ChunkStatus::Empty) as i32;
        let cache = StaticCache2D::create(pos.x(), pos.z(), radius, |x, z| {
            chunk_map
                .acquire_generation(ChunkPos::new(x, z))
                .unwrap_or_else(|| {
                    invariant_violation(format!(
                        "No holder at [{x}, {z}] while scheduling {target_status} for {pos}"
                    ))
                })
        });
        let Some(center) = cache.get(pos.x(), pos.z()).cloned() else {
            invariant_violation(format!("Generation cache of {pos} misses its center"));
        };

        Arc::new(Self {
            chunk_map,
            pos,
            target_status,
            center,
            cache: Arc::new(cache),
            marked_for_cancellation: AtomicBool::new(false),
            state: SyncMutex::new(TaskState {
                scheduled_status: None,
                needs_generation: false,
                scheduled_layer: Vec::new(),
                failure: None,
                released: false,
            }),
        })
    }

    /// The stage this task is heading to.
    #[must_use]
    pub const fn target_status(&self) -> ChunkStatus {
        self.target_status
    }

    /// The chunk this task advances.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// The holder this task advances.
    #[must_use]
    pub const fn center(&self) -> &Arc<ChunkHolder> {
        &self.center
    }

    /// Asks the task to stop. It stops scheduling at its next iteration; running steps still finish.
    pub fn mark_for_cancellation(&self) {
        self.marked_for_cancellation.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_marked_for_cancellation(&self) -> bool {
        self.marked_for_cancellation.load(Ordering::Acquire)
    }

    /// Whether the task has finished and released its claims.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Schedules layers until one of them has to be waited on.
    ///
    /// Returns the future to wait on, or `None` once the task is done.
    pub fn run_until_wait(self: &Arc<Self>) -> Option<ChunkFuture<Arc<ChunkAccess>>> {
        let mut state = self.state.lock();
        if state.released {
            return None;
        }
        loop {
            if let Some(waiting) = Self::wait_for_scheduled_layer(&mut state) {
                return Some(waiting);
            }

            let stopped = self.is_marked_for_cancellation() || state.failure.is_some();
            if stopped || state.scheduled_status == Some(self.target_status) {
                self.release_claim(&mut state);
                return None;
            }
            self.schedule_next_layer(&mut state);
        }
    }

    fn is_current_task(self: &Arc<Self>) -> bool {
        self.center
            .generation()
            .task()
            .is_some_and(|task| Arc::ptr_eq(&task, self))
    }

    fn schedule_next_layer(&self, state: &mut TaskState) {
        let status = match state.scheduled_status {
            None => ChunkStatus::Empty,
            Some(ChunkStatus::Empty)
                if !state.needs_generation && !self.can_load_without_generation() =>
            {
                state.needs_generation = true;
                ChunkStatus::Empty
            }
            Some(scheduled) => match scheduled.next() {
                Some(next) => next,
                None => invariant_violation(format!(
                    "Generation task of {} scheduled past {scheduled}",
                    self.pos
                )),
            },
        };
        self.schedule_layer(state, status);
        state.scheduled_status = Some(status);
    }

    fn can_load_without_generation(&self) -> bool {
        if self.target_status == ChunkStatus::Empty {
            return true;
        }
        let persisted = self.center.generation().persisted_status();
        if persisted.is_none_or(|persisted| persisted < self.target_status) {
            return false;
        }

        let dependencies = &LOADING_PYRAMID
            .get_step_to(self.target_status)
            .accumulated_dependencies;
        let radius = dependencies.get_radius() as i32;
        for x in self.pos.x() - radius..=self.pos.x() + radius {
            for z in self.pos.z() - radius..=self.pos.z() + radius {
                let distance = self.pos.chessboard_distance(&ChunkPos::new(x, z)) as usize;
                let Some(required) = dependencies.get(distance) else {
                    continue;
                };
                let persisted = self
                    .cache
                    .get(x, z)
                    .and_then(|holder| holder.generation().persisted_status());
                if persisted.is_none_or(|persisted| persisted < required) {
                    return false;
                }
            }
        }
        true
    }

    fn schedule_layer(&self, state: &mut TaskState, status: ChunkStatus) {
        let pyramid = if state.needs_generation {
            &GENERATION_PYRAMID
        } else {
            &LOADING_PYRAMID
        };
        let radius = pyramid
            .get_step_to(self.target_status)
            .get_accumulated_radius_of(status) as i32;
        for x in self.pos.x() - radius..=self.pos.x() + radius {
            for z in self.pos.z() - radius..=self.pos.z() + radius {
                if self.is_marked_for_cancellation() || state.failure.is_some() {
                    return;
                }
                let Some(holder) = self.cache.get(x, z) else {
                    invariant_violation(format!(
                        "[{x}, {z}] is outside the generation cache of {}",
                        self.pos
                    ));
                };
                self.schedule_chunk_in_layer(state, status, holder);
            }
        }
    }

    fn schedule_chunk_in_layer(
        &self,
        state: &mut TaskState,
        status: ChunkStatus,
        holder: &Arc<ChunkHolder>,
    ) {
        let generation = holder.generation();
        let needs_generating = generation
            .persisted_status()
            .is_some_and(|persisted| status > persisted);
        if needs_generating && !state.needs_generation {
            invariant_violation(format!(
                "Can't load chunk {} to {status}, but didn't expect to need to generate",
                holder.pos()
            ));
        }
        let step = if needs_generating {
            GENERATION_PYRAMID.get_step_to(status)
        } else {
            LOADING_PYRAMID.get_step_to(status)
        };

        let future = generation.apply_step(status, || {
            self.chunk_map.apply_step(holder, step, &self.cache)
        });
        match future.get_now() {
            None => state.scheduled_layer.push(future),
            Some(Ok(_)) => {}
            Some(Err(error)) => state.failure = Some(error.clone()),
        }
    }

    fn wait_for_scheduled_layer(state: &mut TaskState) -> Option<ChunkFuture<Arc<ChunkAccess>>> {
        while let Some(future) = state.scheduled_layer.last() {
            match future.get_now() {
                None => return Some(future.clone()),
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    state.failure.get_or_insert_with(|| error.clone());
                }
            }
            state.scheduled_layer.pop();
        }
        None
    }

    fn release_claim(self: &Arc<Self>, state: &mut TaskState) {
        state.released = true;
        let owned = self.is_current_task();
        if let Some(failure) = &state.failure
            && owned
        {
            if *failure != ChunkLoadError::Unloaded {
                log::warn!(
                    "Generation of {} to {} failed: {failure}",
                    self.pos,
                    self.target_status
                );
            }
            self.center.generation().fail_pending_futures(failure);
        }

        self.center.generation().remove_task(self);
        for holder in self.cache.iter() {
            self.chunk_map.release_generation(holder);
        }
    }
}
