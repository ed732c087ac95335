//! The generation side of a chunk holder: one future per pipeline stage and the markers guarding them.
//!
//! Any thread may read the stage futures. They are only ever replaced through compare-and-swap,
//! and the `started_work` marker makes sure each stage's step runs at most once per holder.
use std::{
    sync::{
        Arc,
        atomic::{AtomicI32, AtomicU8, AtomicU32, Ordering},
    },
    thread,
};

use arc_swap::ArcSwapOption;
use steel_utils::{ChunkPos, locks::SyncMutex};

use crate::chunk::{
    chunk_access::{ChunkAccess, ChunkStatus},
    chunk_future::{ChunkFuture, Completable},
    chunk_generation_task::ChunkGenerationTask,
    chunk_level::ChunkLevel,
    chunk_result::{ChunkLoadError, ChunkResult, invariant_violation, unloaded_chunk_future},
};

const NO_STATUS: u8 = u8::MAX;

type ChunkSlot = Completable<ChunkResult<Arc<ChunkAccess>>>;

const fn encode(status: Option<ChunkStatus>) -> u8 {
    match status {
        Some(status) => status as u8,
        None => NO_STATUS,
    }
}

const fn decode(value: u8) -> Option<ChunkStatus> {
    ChunkStatus::from_index(value as usize)
}

fn same_slot(a: &Option<Arc<ChunkSlot>>, b: &Option<Arc<ChunkSlot>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

enum StatusBump {
    Acquired,
    AlreadyStarted,
    Stale,
}

/// Demotions that happened while steps were still running.
struct PendingRollback {
    demotions: Vec<(u32, Option<ChunkStatus>)>,
    settled: Arc<Completable<()>>,
}

/// Generation state of one chunk position.
pub struct GenerationChunkHolder {
    pos: ChunkPos,
    highest_allowed_status: AtomicU8,
    started_work: AtomicU8,
    futures: Box<[ArcSwapOption<ChunkSlot>]>,
    task: ArcSwapOption<ChunkGenerationTask>,
    generation_ref_count: AtomicI32,
    generation_save_sync: SyncMutex<Arc<Completable<()>>>,
    steps_in_flight: AtomicU32,
    demotion_epoch: AtomicU32,
    rollback: SyncMutex<Option<PendingRollback>>,
}

impl GenerationChunkHolder {
    /// Creates a holder that is not allowed to reach any stage yet.
    #[must_use]
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            highest_allowed_status: AtomicU8::new(NO_STATUS),
            started_work: AtomicU8::new(NO_STATUS),
            futures: (0..ChunkStatus::COUNT)
                .map(|_| ArcSwapOption::empty())
                .collect(),
            task: ArcSwapOption::empty(),
            generation_ref_count: AtomicI32::new(0),
            generation_save_sync: SyncMutex::new(Completable::completed(())),
            steps_in_flight: AtomicU32::new(0),
            demotion_epoch: AtomicU32::new(0),
            rollback: SyncMutex::new(None),
        }
    }

    /// The position of this holder.
    #[must_use]
    pub const fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// The furthest stage the current ticket level allows.
    #[must_use]
    pub fn highest_allowed_status(&self) -> Option<ChunkStatus> {
        decode(self.highest_allowed_status.load(Ordering::Acquire))
    }

    /// The furthest stage whose step has been started.
    #[must_use]
    pub fn started_work(&self) -> Option<ChunkStatus> {
        decode(self.started_work.load(Ordering::Acquire))
    }

    /// Returns true if the ticket level does not allow `status`.
    #[must_use]
    pub fn is_status_disallowed(&self, status: ChunkStatus) -> bool {
        self.highest_allowed_status()
            .is_none_or(|allowed| status > allowed)
    }

    /// Requests the chunk at `target`, scheduling a generation task if none is heading there already.
    ///
    /// `schedule` creates and enqueues a task for the given target; it is only called when a new
    /// task is needed.
    pub fn schedule_chunk_generation_task(
        &self,
        target: ChunkStatus,
        schedule: impl FnOnce(ChunkStatus) -> Arc<ChunkGenerationTask>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        if self.is_status_disallowed(target) {
            return unloaded_chunk_future();
        }

        let future = self.get_or_create_future(target);
        if future.is_done() {
            return future;
        }

        let needs_task = self
            .task
            .load()
            .as_ref()
            .is_none_or(|task| target > task.target_status());
        if needs_task {
            self.reschedule_chunk_task(Some(target), schedule);
        }
        future
    }

    /// Runs the step producing `status` unless it was already started, in which case the existing future is returned.
    ///
    /// `run` performs the step. Its result is stored in the stage's future before the returned future completes.
    pub fn apply_step(
        self: &Arc<Self>,
        status: ChunkStatus,
        run: impl FnOnce() -> ChunkFuture<Arc<ChunkAccess>>,
    ) -> ChunkFuture<Arc<ChunkAccess>> {
        if self.is_status_disallowed(status) {
            return unloaded_chunk_future();
        }

        self.steps_in_flight.fetch_add(1, Ordering::AcqRel);
        let epoch = self.demotion_epoch.load(Ordering::Acquire);
        match self.acquire_status_bump(status) {
            StatusBump::Acquired => {}
            StatusBump::AlreadyStarted => {
                self.finish_step();
                return self
                    .retry_after_rollback(status)
                    .unwrap_or_else(|| self.get_or_create_future(status));
            }
            StatusBump::Stale => {
                self.finish_step();
                return self
                    .retry_after_rollback(status)
                    .unwrap_or_else(unloaded_chunk_future);
            }
        }

        let holder = self.clone();
        run().map(move |result| {
            let published = if holder.is_stale(status, epoch) {
                Err(ChunkLoadError::Unloaded)
            } else {
                holder.complete_future(status, result.clone());
                result.clone()
            };
            holder.finish_step();
            published
        })
    }

    fn acquire_status_bump(&self, status: ChunkStatus) -> StatusBump {
        let expected = if status == ChunkStatus::Empty {
            NO_STATUS
        } else {
            status.parent() as u8
        };
        match self.started_work.compare_exchange(
            expected,
            status as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => StatusBump::Acquired,
            Err(observed) if observed != NO_STATUS && observed >= status as u8 => {
                StatusBump::AlreadyStarted
            }
            Err(observed) => {
                if self.demotion_epoch.load(Ordering::Acquire) == 0 {
                    invariant_violation(format!(
                        "Unexpected last started work status {:?} while trying to start {status} at {}",
                        decode(observed),
                        self.pos
                    ));
                }
                StatusBump::Stale
            }
        }
    }

    fn finish_step(&self) {
        if self.steps_in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.try_settle_rollback();
        }
    }

    /// A step of `status` is stale if a demotion below it happened after it started.
    fn is_stale(&self, status: ChunkStatus, epoch: u32) -> bool {
        self.rollback.lock().as_ref().is_some_and(|pending| {
            pending.demotions.iter().any(|(demotion, ceiling)| {
                *demotion > epoch && ceiling.is_none_or(|ceiling| status > ceiling)
            })
        })
    }

    /// While a rollback is pending, callers of stages without a finished future have to wait for it.
    fn retry_after_rollback(&self, status: ChunkStatus) -> Option<ChunkFuture<Arc<ChunkAccess>>> {
        let rollback = self.rollback.lock();
        let pending = rollback.as_ref()?;
        let finished = self.futures[status.index()]
            .load()
            .as_ref()
            .is_some_and(|future| matches!(future.get_now(), Some(Ok(_))));
        if finished {
            return None;
        }
        Some(pending.settled.map(|()| Err(ChunkLoadError::Unloaded)))
    }

    /// Rolls the started marker back once no step is running anymore.
    fn try_settle_rollback(&self) {
        let settled = {
            let mut rollback = self.rollback.lock();
            if rollback.is_none() {
                return;
            }
            loop {
                if self.steps_in_flight.load(Ordering::Acquire) != 0 {
                    return;
                }
                let current = self.started_work.load(Ordering::Acquire);
                let target = match self.highest_finished_prefix() {
                    None => NO_STATUS,
                    Some(_) if current == NO_STATUS => NO_STATUS,
                    Some(prefix) => current.min(prefix as u8),
                };
                if target == current
                    || self
                        .started_work
                        .compare_exchange(current, target, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    break;
                }
            }
            rollback.take().map(|pending| pending.settled)
        };

        if let Some(settled) = settled {
            settled.complete(());
        }
    }

    /// The last stage of the unbroken run of successfully finished stages starting at `Empty`.
    fn highest_finished_prefix(&self) -> Option<ChunkStatus> {
        let mut highest = None;
        for status in ChunkStatus::ALL {
            let finished = self.futures[status.index()]
                .load()
                .as_ref()
                .is_some_and(|future| matches!(future.get_now(), Some(Ok(_))));
            if !finished {
                break;
            }
            highest = Some(status);
        }
        highest
    }

    /// Applies the stage ceiling derived from `ticket_level`.
    ///
    /// Lowering the ceiling resolves every pending future above it to unloaded and clears it.
    /// Finished stages are kept. A task heading past the new ceiling is replaced by one targeting
    /// the highest stage still awaited, or cancelled.
    pub fn update_highest_allowed_status(
        &self,
        ticket_level: u8,
        schedule: impl FnOnce(ChunkStatus) -> Arc<ChunkGenerationTask>,
    ) {
        let old = self.highest_allowed_status();
        let new = ChunkLevel::generation_status(ticket_level);
        self.highest_allowed_status
            .store(encode(new), Ordering::Release);

        if let Some(old) = old
            && new.is_none_or(|new| new < old)
        {
            let epoch = self.demotion_epoch.fetch_add(1, Ordering::AcqRel) + 1;
            self.rollback
                .lock()
                .get_or_insert_with(|| PendingRollback {
                    demotions: Vec::new(),
                    settled: Completable::new(),
                })
                .demotions
                .push((epoch, new));
            self.fail_and_clear_pending_futures_between(new, old);
            self.try_settle_rollback();
        }

        let task = self.task.load_full();
        if let Some(task) = task
            && self.is_status_disallowed(task.target_status())
        {
            let target = self.find_highest_status_with_pending_future(new);
            self.reschedule_chunk_task(target, schedule);
        }
    }

    fn reschedule_chunk_task(
        &self,
        target: Option<ChunkStatus>,
        schedule: impl FnOnce(ChunkStatus) -> Arc<ChunkGenerationTask>,
    ) {
        let task = target.map(schedule);
        if let Some(previous) = self.task.swap(task) {
            previous.mark_for_cancellation();
        }
    }

    fn find_highest_status_with_pending_future(
        &self,
        generation_status: Option<ChunkStatus>,
    ) -> Option<ChunkStatus> {
        let mut status = generation_status?;
        let started = self.started_work();
        loop {
            if started.is_some_and(|started| status <= started) {
                return None;
            }
            if self.futures[status.index()].load().is_some() {
                return Some(status);
            }
            if status == ChunkStatus::Empty {
                return None;
            }
            status = status.parent();
        }
    }

    fn get_or_create_future(&self, status: ChunkStatus) -> ChunkFuture<Arc<ChunkAccess>> {
        if self.is_status_disallowed(status) {
            return unloaded_chunk_future();
        }

        let slot = &self.futures[status.index()];
        loop {
            if let Some(future) = slot.load_full() {
                return future;
            }
            let created = Completable::new();
            let previous = slot.compare_and_swap(&None::<Arc<ChunkSlot>>, Some(created.clone()));
            if previous.is_none() {
                if self.is_status_disallowed(status) {
                    self.fail_and_clear_pending_future(status.index());
                    return unloaded_chunk_future();
                }
                return created;
            }
        }
    }

    fn fail_and_clear_pending_futures_between(
        &self,
        highest_allowed: Option<ChunkStatus>,
        current: ChunkStatus,
    ) {
        let start = highest_allowed.map_or(0, |status| status.index() + 1);
        for index in start..=current.index() {
            self.fail_and_clear_pending_future(index);
        }
    }

    /// Resolves the future at `index` to unloaded and clears it if it was still pending.
    ///
    /// Finished stages keep their futures, so the chunk data survives a demotion.
    fn fail_and_clear_pending_future(&self, index: usize) {
        let slot = &self.futures[index];
        let Some(future) = slot.load_full() else {
            return;
        };
        if future.complete(Err(ChunkLoadError::Unloaded)) {
            // A step finishing concurrently may already have published its result here.
            slot.compare_and_swap(&Some(future), None::<Arc<ChunkSlot>>);
        }
    }

    fn complete_future(&self, status: ChunkStatus, result: ChunkResult<Arc<ChunkAccess>>) {
        let slot = &self.futures[status.index()];
        loop {
            let current = slot.load_full();
            match &current {
                None => {
                    let completed = Some(Completable::completed(result.clone()));
                    let previous = slot.compare_and_swap(&current, completed);
                    if previous.is_none() {
                        return;
                    }
                }
                Some(future) => {
                    if future.complete(result.clone()) {
                        return;
                    }
                    if matches!(future.get_now(), Some(Ok(_)))
                        && self.demotion_epoch.load(Ordering::Acquire) == 0
                    {
                        invariant_violation(format!(
                            "Trying to complete the {status} future of {} but found it to be completed successfully already",
                            self.pos
                        ));
                    }
                    let previous =
                        slot.compare_and_swap(&current, Some(Completable::completed(result.clone())));
                    if same_slot(&previous, &current) {
                        return;
                    }
                }
            }
            thread::yield_now();
        }
    }

    /// Fails every pending future the ticket level still allows. Used when the task driving them failed.
    pub fn fail_pending_futures(&self, error: &ChunkLoadError) {
        for slot in &self.futures {
            if let Some(future) = slot.load_full() {
                future.complete(Err(error.clone()));
            }
        }
    }

    /// Replaces every proto stage future with `chunk`, the chunk that was promoted to a level chunk.
    ///
    /// Returns false if some stage was cleared in the meantime.
    #[must_use]
    pub fn replace_proto_chunk(&self, chunk: &Arc<ChunkAccess>) -> bool {
        let completed = Completable::completed(Ok(chunk.clone()));
        for slot in &self.futures[..ChunkStatus::Full.index()] {
            let current = slot.load_full();
            let is_proto = current
                .as_ref()
                .and_then(|future| future.get_now())
                .is_some_and(|result| matches!(result.as_deref(), Ok(ChunkAccess::Proto(_))));
            if !is_proto {
                return false;
            }
            let previous = slot.compare_and_swap(&current, Some(completed.clone()));
            if !same_slot(&previous, &current) {
                return false;
            }
        }
        true
    }

    /// Unschedules `task` if it is still this holder's task.
    pub fn remove_task(&self, task: &Arc<ChunkGenerationTask>) {
        let current = Some(task.clone());
        self.task.compare_and_swap(&current, None::<Arc<ChunkGenerationTask>>);
    }

    /// The task currently driving this holder.
    #[must_use]
    pub fn task(&self) -> Option<Arc<ChunkGenerationTask>> {
        self.task.load_full()
    }

    /// The chunk at `status` if that stage finished, ignoring the ticket level.
    #[must_use]
    pub fn chunk_if_present_unchecked(&self, status: ChunkStatus) -> Option<Arc<ChunkAccess>> {
        self.futures[status.index()]
            .load()
            .as_ref()
            .and_then(|future| future.get_now().and_then(|result| result.as_ref().ok().cloned()))
    }

    /// The chunk at `status` if that stage finished and is still allowed.
    #[must_use]
    pub fn chunk_if_present(&self, status: ChunkStatus) -> Option<Arc<ChunkAccess>> {
        if self.is_status_disallowed(status) {
            None
        } else {
            self.chunk_if_present_unchecked(status)
        }
    }

    /// The most advanced chunk data available.
    #[must_use]
    pub fn latest_chunk(&self) -> Option<Arc<ChunkAccess>> {
        let started = self.started_work()?;
        self.chunk_if_present_unchecked(started)
            .or_else(|| self.chunk_if_present_unchecked(started.parent()))
    }

    /// The most advanced stage with a finished future.
    #[must_use]
    pub fn latest_status(&self) -> Option<ChunkStatus> {
        ChunkStatus::ALL
            .iter()
            .rev()
            .find(|status| self.chunk_if_present_unchecked(**status).is_some())
            .copied()
    }

    /// The stage the chunk's data has been through, known once the chunk was loaded or created.
    #[must_use]
    pub fn persisted_status(&self) -> Option<ChunkStatus> {
        self.chunk_if_present_unchecked(ChunkStatus::Empty)
            .map(|chunk| chunk.persisted_status())
    }

    /// Claims the holder for a generation task.
    ///
    /// Returns the new save dependency when the first claim is taken.
    pub fn increase_generation_ref_count(&self) -> Option<Arc<Completable<()>>> {
        let mut save_sync = self.generation_save_sync.lock();
        if self.generation_ref_count.fetch_add(1, Ordering::AcqRel) == 0 {
            let sync = Completable::new();
            *save_sync = sync.clone();
            Some(sync)
        } else {
            None
        }
    }

    /// Releases a claim taken with [`GenerationChunkHolder::increase_generation_ref_count`].
    pub fn decrease_generation_ref_count(&self) {
        let (remaining, save_sync) = {
            let save_sync = self.generation_save_sync.lock();
            let remaining = self.generation_ref_count.fetch_sub(1, Ordering::AcqRel) - 1;
            (remaining, save_sync.clone())
        };
        if remaining < 0 {
            invariant_violation(format!(
                "More releases than claims at {}. Count: {remaining}",
                self.pos
            ));
        }
        if remaining == 0 {
            save_sync.complete(());
        }
    }

    /// The number of generation claims.
    #[must_use]
    pub fn generation_ref_count(&self) -> i32 {
        self.generation_ref_count.load(Ordering::Acquire)
    }

    /// Whether a demotion is waiting for running steps before rolling back.
    #[must_use]
    pub fn has_pending_rollback(&self) -> bool {
        self.rollback.lock().is_some()
    }

    /// Every stage with a future, for diagnostics.
    #[must_use]
    pub fn all_futures(&self) -> Vec<(ChunkStatus, ChunkFuture<Arc<ChunkAccess>>)> {
        ChunkStatus::ALL
            .iter()
            .filter_map(|status| {
                self.futures[status.index()]
                    .load_full()
                    .map(|future| (*status, future))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::chunk::{
        chunk_result::is_unloaded_future, proto_chunk::ProtoChunk, section::Sections,
    };

    fn holder_at(level: u8) -> Arc<GenerationChunkHolder> {
        let holder = Arc::new(GenerationChunkHolder::new(ChunkPos::new(0, 0)));
        holder.update_highest_allowed_status(level, no_task);
        holder
    }

    fn no_task(_: ChunkStatus) -> Arc<ChunkGenerationTask> {
        panic!("no task expected")
    }

    fn proto() -> Arc<ChunkAccess> {
        Arc::new(ChunkAccess::Proto(ProtoChunk::new(
            Sections::new_empty(1),
            ChunkPos::new(0, 0),
        )))
    }

    fn advance(holder: &Arc<GenerationChunkHolder>, to: ChunkStatus) -> Arc<ChunkAccess> {
        let chunk = proto();
        for status in ChunkStatus::ALL.iter().take(to.index() + 1) {
            let chunk = chunk.clone();
            let result = holder.apply_step(*status, move || Completable::completed(Ok(chunk)));
            assert!(matches!(result.get_now(), Some(Ok(_))));
        }
        chunk
    }

    #[test]
    fn test_ticket_level_gates_statuses() {
        let holder = holder_at(ChunkLevel::UNLOADED_LEVEL);
        assert!(holder.is_status_disallowed(ChunkStatus::Empty));

        holder.update_highest_allowed_status(36, no_task);
        assert_eq!(holder.highest_allowed_status(), Some(ChunkStatus::Biomes));
        assert!(!holder.is_status_disallowed(ChunkStatus::Biomes));
        assert!(holder.is_status_disallowed(ChunkStatus::Noise));

        let result = holder.apply_step(ChunkStatus::Noise, || unreachable!());
        assert!(is_unloaded_future(&result));
    }

    #[test]
    fn test_step_runs_once() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        let runs = Arc::new(AtomicUsize::new(0));
        let chunk = proto();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let holder = holder.clone();
                let runs = runs.clone();
                let chunk = chunk.clone();
                thread::spawn(move || {
                    holder.apply_step(ChunkStatus::Empty, move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Completable::completed(Ok(chunk))
                    })
                })
            })
            .collect();

        let results: Vec<_> = threads
            .into_iter()
            .map(|handle| handle.join().expect("thread panicked"))
            .collect();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        for result in results {
            let value = result.get_now().expect("step finished").clone();
            assert!(Arc::ptr_eq(&value.expect("step succeeded"), &chunk));
        }
    }

    #[test]
    fn test_completed_step_is_not_rerun() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        advance(&holder, ChunkStatus::Noise);

        let again = holder.apply_step(ChunkStatus::Biomes, || unreachable!());
        assert!(matches!(again.get_now(), Some(Ok(_))));
        assert_eq!(holder.latest_status(), Some(ChunkStatus::Noise));
        assert_eq!(holder.persisted_status(), Some(ChunkStatus::Empty));
    }

    #[test]
    fn test_demotion_fails_pending_futures_and_keeps_finished_stages() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        advance(&holder, ChunkStatus::Surface);
        let pending = holder.get_or_create_future(ChunkStatus::Features);

        holder.update_highest_allowed_status(ChunkLevel::MAX_LEVEL, no_task);

        assert!(matches!(pending.get_now(), Some(Err(ChunkLoadError::Unloaded))));
        assert!(holder.all_futures().iter().all(|(status, _)| *status != ChunkStatus::Features));
        for status in [ChunkStatus::StructureReferences, ChunkStatus::Surface] {
            assert!(holder.chunk_if_present_unchecked(status).is_some(), "{status}");
            assert!(holder.chunk_if_present(status).is_none(), "{status}");
        }
        assert_eq!(holder.started_work(), Some(ChunkStatus::Surface));
        assert!(!holder.has_pending_rollback());
    }

    #[test]
    fn test_unloading_keeps_the_latest_chunk() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        let chunk = advance(&holder, ChunkStatus::Full);

        holder.update_highest_allowed_status(ChunkLevel::UNLOADED_LEVEL, no_task);

        assert!(holder.is_status_disallowed(ChunkStatus::Empty));
        assert_eq!(holder.started_work(), Some(ChunkStatus::Full));
        assert_eq!(holder.latest_status(), Some(ChunkStatus::Full));
        let latest = holder.latest_chunk().expect("finished stages survive unloading");
        assert!(Arc::ptr_eq(&latest, &chunk));

        holder.update_highest_allowed_status(ChunkLevel::FULL_STATUS_LEVEL, no_task);
        let again = holder.apply_step(ChunkStatus::Full, || unreachable!());
        assert!(matches!(again.get_now(), Some(Ok(_))));
    }

    #[test]
    fn test_demotion_during_running_step_discards_its_result() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        let chunk = advance(&holder, ChunkStatus::StructureReferences);

        let running = Completable::new();
        let step = running.clone();
        let result = holder.apply_step(ChunkStatus::Biomes, move || step);

        holder.update_highest_allowed_status(ChunkLevel::MAX_LEVEL, no_task);
        assert!(holder.has_pending_rollback());
        assert_eq!(holder.started_work(), Some(ChunkStatus::Biomes));

        holder.update_highest_allowed_status(ChunkLevel::FULL_STATUS_LEVEL, no_task);
        let waiting = holder.apply_step(ChunkStatus::Biomes, || unreachable!());
        assert!(!waiting.is_done());

        running.complete(Ok(chunk));
        assert!(matches!(result.get_now(), Some(Err(ChunkLoadError::Unloaded))));
        assert!(matches!(waiting.get_now(), Some(Err(ChunkLoadError::Unloaded))));
        assert!(holder.chunk_if_present_unchecked(ChunkStatus::Biomes).is_none());
        assert!(holder.chunk_if_present_unchecked(ChunkStatus::StructureReferences).is_some());
        assert_eq!(holder.started_work(), Some(ChunkStatus::StructureReferences));
        assert!(!holder.has_pending_rollback());
    }

    #[test]
    fn test_failed_step_keeps_its_error() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        let failed = holder.apply_step(ChunkStatus::Empty, || {
            Completable::completed(Err(ChunkLoadError::Io("disk on fire".to_owned())))
        });
        assert!(matches!(failed.get_now(), Some(Err(ChunkLoadError::Io(_)))));
        assert!(holder.latest_chunk().is_none());
    }

    #[test]
    fn test_generation_ref_count_gates_save() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        let sync = holder
            .increase_generation_ref_count()
            .expect("first claim creates a dependency");
        assert!(holder.increase_generation_ref_count().is_none());

        holder.decrease_generation_ref_count();
        assert!(!sync.is_done());
        holder.decrease_generation_ref_count();
        assert!(sync.is_done());
        assert_eq!(holder.generation_ref_count(), 0);
    }

    #[test]
    #[should_panic(expected = "More releases than claims")]
    fn test_releasing_unclaimed_holder_panics() {
        let holder = holder_at(ChunkLevel::FULL_STATUS_LEVEL);
        holder.decrease_generation_ref_count();
    }
}
