//! A loaded chunk position: generation state plus the accessibility tiers built on top of it.
use std::{
    mem,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
};

use rustc_hash::FxHashSet;
use steel_utils::{BlockPos, ChunkPos, locks::SyncMutex};

use crate::chunk::{
    chunk_access::{ChunkAccess, ChunkStatus, FullChunkStatus},
    chunk_future::{ChunkFuture, Completable},
    chunk_level::ChunkLevel,
    chunk_result::{ChunkLoadError, invariant_violation, is_unloaded_future, unloaded_chunk_future},
    generation_chunk_holder::GenerationChunkHolder,
    light_engine::LightLayer,
    section::LevelHeight,
};

/// Work the chunk map performs when a holder changes tier.
pub trait ChunkTierScheduler: Send + Sync + 'static {
    /// Requests the chunk at FULL with its ring of neighbours at the stages their distance implies.
    fn prepare_accessible_chunk(&self, holder: &Arc<ChunkHolder>) -> ChunkFuture<Arc<ChunkAccess>>;
    /// Requests the 3x3 neighbourhood at FULL.
    fn prepare_ticking_chunk(&self, holder: &Arc<ChunkHolder>) -> ChunkFuture<Arc<ChunkAccess>>;
    /// Requests the 5x5 neighbourhood at FULL.
    fn prepare_entity_ticking_chunk(
        &self,
        holder: &Arc<ChunkHolder>,
    ) -> ChunkFuture<Arc<ChunkAccess>>;
    /// Called on the main thread whenever the confirmed tier of a chunk changes.
    fn on_full_chunk_status_change(&self, pos: ChunkPos, status: FullChunkStatus);
    /// Runs `task` on the main thread.
    fn execute_on_main_thread(&self, task: Box<dyn FnOnce() + Send>);
    /// Re-prioritizes the queued tasks of `pos` from `queue_level` to `ticket_level`.
    fn on_level_change(&self, pos: ChunkPos, queue_level: u8, ticket_level: u8);
}

/// Block and light changes of one chunk since the last broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkChanges {
    /// The chunk.
    pub pos: ChunkPos,
    /// Bit per light section whose sky light changed.
    pub sky_light_sections: u64,
    /// Bit per light section whose block light changed.
    pub block_light_sections: u64,
    /// Changed blocks per section y, as section relative packed positions.
    pub changed_blocks: Vec<(i32, Vec<u16>)>,
}

struct ChangedBlocks {
    per_section: Box<[Option<FxHashSet<u16>>]>,
    has_changed_sections: bool,
}

/// Holds a chunk position while it is loaded.
pub struct ChunkHolder {
    generation: Arc<GenerationChunkHolder>,
    height: LevelHeight,
    ticket_level: AtomicU8,
    old_ticket_level: AtomicU8,
    queue_level: AtomicU8,
    full_chunk_future: SyncMutex<ChunkFuture<Arc<ChunkAccess>>>,
    ticking_chunk_future: SyncMutex<ChunkFuture<Arc<ChunkAccess>>>,
    entity_ticking_chunk_future: SyncMutex<ChunkFuture<Arc<ChunkAccess>>>,
    pending_full_state_confirmation: SyncMutex<Arc<Completable<bool>>>,
    save_sync: SyncMutex<Arc<Completable<()>>>,
    was_accessible_since_last_save: AtomicBool,
    changed_blocks: SyncMutex<ChangedBlocks>,
    sky_changed_sections: AtomicU64,
    block_changed_sections: AtomicU64,
}

impl ChunkHolder {
    /// Creates a holder for `pos` at `ticket_level`. Futures are only updated by [`ChunkHolder::update_futures`].
    #[must_use]
    pub fn new(pos: ChunkPos, ticket_level: u8, height: LevelHeight) -> Self {
        Self {
            generation: Arc::new(GenerationChunkHolder::new(pos)),
            height,
            ticket_level: AtomicU8::new(ticket_level),
            old_ticket_level: AtomicU8::new(ChunkLevel::UNLOADED_LEVEL),
            queue_level: AtomicU8::new(ChunkLevel::UNLOADED_LEVEL),
            full_chunk_future: SyncMutex::new(unloaded_chunk_future()),
            ticking_chunk_future: SyncMutex::new(unloaded_chunk_future()),
            entity_ticking_chunk_future: SyncMutex::new(unloaded_chunk_future()),
            pending_full_state_confirmation: SyncMutex::new(Completable::completed(false)),
            save_sync: SyncMutex::new(Completable::completed(())),
            was_accessible_since_last_save: AtomicBool::new(false),
            changed_blocks: SyncMutex::new(ChangedBlocks {
                per_section: (0..height.section_count).map(|_| None).collect(),
                has_changed_sections: false,
            }),
            sky_changed_sections: AtomicU64::new(0),
            block_changed_sections: AtomicU64::new(0),
        }
    }

    /// The generation state of this chunk.
    #[must_use]
    pub const fn generation(&self) -> &Arc<GenerationChunkHolder> {
        &self.generation
    }

    /// The position of this chunk.
    #[must_use]
    pub fn pos(&self) -> ChunkPos {
        self.generation.pos()
    }

    /// The current ticket level.
    #[must_use]
    pub fn ticket_level(&self) -> u8 {
        self.ticket_level.load(Ordering::Acquire)
    }

    /// Sets the ticket level. Takes effect once the futures are updated.
    pub fn set_ticket_level(&self, level: u8) {
        self.ticket_level.store(level, Ordering::Release);
    }

    /// The ticket level the futures were last updated for.
    #[must_use]
    pub fn old_ticket_level(&self) -> u8 {
        self.old_ticket_level.load(Ordering::Acquire)
    }

    /// The priority this chunk's queued tasks currently have.
    #[must_use]
    pub fn queue_level(&self) -> u8 {
        self.queue_level.load(Ordering::Acquire)
    }

    /// The tier the current ticket level grants.
    #[must_use]
    pub fn full_status(&self) -> FullChunkStatus {
        ChunkLevel::full_status(self.ticket_level())
    }

    /// Resolves to the chunk once it is accessible.
    #[must_use]
    pub fn full_chunk_future(&self) -> ChunkFuture<Arc<ChunkAccess>> {
        self.full_chunk_future.lock().clone()
    }

    /// Resolves to the chunk once its blocks tick.
    #[must_use]
    pub fn ticking_chunk_future(&self) -> ChunkFuture<Arc<ChunkAccess>> {
        self.ticking_chunk_future.lock().clone()
    }

    /// Resolves to the chunk once its entities tick.
    #[must_use]
    pub fn entity_ticking_chunk_future(&self) -> ChunkFuture<Arc<ChunkAccess>> {
        self.entity_ticking_chunk_future.lock().clone()
    }

    /// The chunk if it is accessible.
    #[must_use]
    pub fn full_chunk(&self) -> Option<Arc<ChunkAccess>> {
        ready(&self.full_chunk_future())
    }

    /// The chunk if its blocks tick.
    #[must_use]
    pub fn ticking_chunk(&self) -> Option<Arc<ChunkAccess>> {
        ready(&self.ticking_chunk_future())
    }

    /// The chunk if its entities tick.
    #[must_use]
    pub fn entity_ticking_chunk(&self) -> Option<Arc<ChunkAccess>> {
        ready(&self.entity_ticking_chunk_future())
    }

    /// Resolves once nothing prevents the chunk from being saved.
    #[must_use]
    pub fn save_sync_future(&self) -> Arc<Completable<()>> {
        self.save_sync.lock().clone()
    }

    /// Whether the chunk can be saved now.
    #[must_use]
    pub fn is_ready_for_saving(&self) -> bool {
        self.generation.generation_ref_count() == 0 && self.save_sync.lock().is_done()
    }

    /// Delays saving until `dependency` completes.
    pub fn add_save_dependency(&self, dependency: &Arc<Completable<()>>) {
        let mut save_sync = self.save_sync.lock();
        *save_sync = if save_sync.is_done() {
            dependency.clone()
        } else {
            Completable::both(&save_sync, dependency)
        };
    }

    fn add_tier_save_dependency(&self, future: &ChunkFuture<Arc<ChunkAccess>>) {
        self.add_save_dependency(&future.map(|_| ()));
    }

    /// Whether the chunk was accessible at some point since it was last saved.
    #[must_use]
    pub fn was_accessible_since_last_save(&self) -> bool {
        self.was_accessible_since_last_save.load(Ordering::Acquire)
    }

    /// Resets the accessibility flag after a save.
    pub fn refresh_accessibility(&self) {
        self.was_accessible_since_last_save.store(
            self.full_status() >= FullChunkStatus::Full,
            Ordering::Release,
        );
    }

    /// Promotes or demotes the accessibility tiers to match the ticket level.
    ///
    /// Promotions request the neighbourhood future for the new tier and confirm the tier on the
    /// main thread once it resolves. Demotions resolve the tier future to unloaded right away.
    pub fn update_futures<H: ChunkTierScheduler>(self: &Arc<Self>, host: &Arc<H>) {
        let old_level = self.old_ticket_level();
        let new_level = self.ticket_level();
        let old_status = ChunkLevel::full_status(old_level);
        let new_status = ChunkLevel::full_status(new_level);

        if new_status >= FullChunkStatus::Full {
            self.was_accessible_since_last_save
                .store(true, Ordering::Release);
        }

        self.update_tier(
            host,
            FullChunkStatus::Full,
            old_status,
            new_status,
            &self.full_chunk_future,
            H::prepare_accessible_chunk,
        );
        self.update_tier(
            host,
            FullChunkStatus::BlockTicking,
            old_status,
            new_status,
            &self.ticking_chunk_future,
            H::prepare_ticking_chunk,
        );
        self.update_tier(
            host,
            FullChunkStatus::EntityTicking,
            old_status,
            new_status,
            &self.entity_ticking_chunk_future,
            H::prepare_entity_ticking_chunk,
        );

        if new_status < old_status {
            self.demote_full_chunk(host.as_ref(), new_status);
        }

        host.on_level_change(self.pos(), self.queue_level(), new_level);
        self.queue_level.store(new_level, Ordering::Release);
        self.old_ticket_level
            .store(new_level, Ordering::Release);
    }

    fn update_tier<H: ChunkTierScheduler>(
        self: &Arc<Self>,
        host: &Arc<H>,
        tier: FullChunkStatus,
        old_status: FullChunkStatus,
        new_status: FullChunkStatus,
        slot: &SyncMutex<ChunkFuture<Arc<ChunkAccess>>>,
        prepare: fn(&H, &Arc<Self>) -> ChunkFuture<Arc<ChunkAccess>>,
    ) {
        let was = old_status >= tier;
        let is = new_status >= tier;
        if !was && is {
            if !is_unloaded_future(&slot.lock()) {
                invariant_violation(format!(
                    "Promoting {} to {tier} while a previous {tier} future is still present",
                    self.pos()
                ));
            }
            let future = prepare(host, self);
            *slot.lock() = future.clone();
            self.schedule_full_chunk_promotion(host, &future, tier);
            self.add_tier_save_dependency(&future);
        }
        if was && !is {
            let previous = mem::replace(&mut *slot.lock(), unloaded_chunk_future());
            previous.complete(Err(ChunkLoadError::Unloaded));
        }
    }

    fn schedule_full_chunk_promotion<H: ChunkTierScheduler>(
        self: &Arc<Self>,
        host: &Arc<H>,
        future: &ChunkFuture<Arc<ChunkAccess>>,
        status: FullChunkStatus,
    ) {
        let confirmation = Completable::new();
        let previous = mem::replace(
            &mut *self.pending_full_state_confirmation.lock(),
            confirmation.clone(),
        );
        previous.complete(false);

        let holder = self.clone();
        let scheduler = host.clone();
        let expected = confirmation.clone();
        confirmation.on_complete(move |confirmed| {
            if !*confirmed {
                return;
            }
            let target = scheduler.clone();
            scheduler.execute_on_main_thread(Box::new(move || {
                let current = holder.pending_full_state_confirmation.lock().clone();
                if Arc::ptr_eq(&current, &expected) {
                    target.on_full_chunk_status_change(holder.pos(), status);
                }
            }));
        });

        future.on_complete(move |result| {
            if result.is_ok() {
                confirmation.complete(true);
            }
        });
    }

    fn demote_full_chunk<H: ChunkTierScheduler>(&self, host: &H, status: FullChunkStatus) {
        let previous = mem::replace(
            &mut *self.pending_full_state_confirmation.lock(),
            Completable::completed(false),
        );
        previous.complete(false);
        host.on_full_chunk_status_change(self.pos(), status);
    }

    /// Records a block change for the next broadcast. Returns true if this is the first pending change.
    pub fn block_changed(&self, pos: &BlockPos) -> bool {
        if self.ticking_chunk().is_none() {
            return false;
        }
        let Some(section_index) = self.height.section_index(pos.0.y) else {
            return false;
        };

        let mut changed = self.changed_blocks.lock();
        let had_changes = changed.has_changed_sections;
        let section = changed.per_section[section_index].get_or_insert_with(FxHashSet::default);
        section.insert(pos.section_relative());
        changed.has_changed_sections = true;
        !had_changes
    }

    /// Records a light change in the light section `section_y`. Returns true if the section was not marked yet.
    pub fn section_light_changed(&self, layer: LightLayer, section_y: i32) -> bool {
        let Some(chunk) = self
            .generation
            .chunk_if_present(ChunkStatus::InitializeLight)
        else {
            return false;
        };
        chunk.mark_unsaved();

        if self.ticking_chunk().is_none() {
            return false;
        }
        let min = self.height.min_light_section();
        let Ok(index) = usize::try_from(section_y - min) else {
            return false;
        };
        if index >= self.height.light_section_count() {
            return false;
        }

        let bits = match layer {
            LightLayer::Sky => &self.sky_changed_sections,
            LightLayer::Block => &self.block_changed_sections,
        };
        let bit = 1u64 << index;
        bits.fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    /// Whether block or light changes are waiting to be broadcast.
    #[must_use]
    pub fn has_changes_to_broadcast(&self) -> bool {
        self.changed_blocks.lock().has_changed_sections
            || self.sky_changed_sections.load(Ordering::Acquire) != 0
            || self.block_changed_sections.load(Ordering::Acquire) != 0
    }

    /// Takes every pending change.
    pub fn broadcast_changes(&self) -> Option<ChunkChanges> {
        if !self.has_changes_to_broadcast() {
            return None;
        }

        let sky_light_sections = self.sky_changed_sections.swap(0, Ordering::AcqRel);
        let block_light_sections = self.block_changed_sections.swap(0, Ordering::AcqRel);
        let min_section = self.height.min_section();
        let mut changed = self.changed_blocks.lock();
        let changed_blocks = changed
            .per_section
            .iter_mut()
            .enumerate()
            .filter_map(|(index, section)| {
                section.take().map(|blocks| {
                    let mut blocks: Vec<u16> = blocks.into_iter().collect();
                    blocks.sort_unstable();
                    (min_section + index as i32, blocks)
                })
            })
            .collect();
        changed.has_changed_sections = false;

        Some(ChunkChanges {
            pos: self.pos(),
            sky_light_sections,
            block_light_sections,
            changed_blocks,
        })
    }
}

fn ready(future: &ChunkFuture<Arc<ChunkAccess>>) -> Option<Arc<ChunkAccess>> {
    future
        .get_now()
        .and_then(|result| result.as_ref().ok().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{level_chunk::LevelChunk, section::Sections};

    #[derive(Default)]
    struct RecordingScheduler {
        accessible: SyncMutex<Vec<ChunkFuture<Arc<ChunkAccess>>>>,
        ticking: SyncMutex<Vec<ChunkFuture<Arc<ChunkAccess>>>>,
        entity_ticking: SyncMutex<Vec<ChunkFuture<Arc<ChunkAccess>>>>,
        changes: SyncMutex<Vec<FullChunkStatus>>,
        level_changes: SyncMutex<Vec<(u8, u8)>>,
    }

    impl RecordingScheduler {
        fn push(
            list: &SyncMutex<Vec<ChunkFuture<Arc<ChunkAccess>>>>,
        ) -> ChunkFuture<Arc<ChunkAccess>> {
            let future = Completable::new();
            list.lock().push(future.clone());
            future
        }
    }

    impl ChunkTierScheduler for RecordingScheduler {
        fn prepare_accessible_chunk(&self, _: &Arc<ChunkHolder>) -> ChunkFuture<Arc<ChunkAccess>> {
            Self::push(&self.accessible)
        }

        fn prepare_ticking_chunk(&self, _: &Arc<ChunkHolder>) -> ChunkFuture<Arc<ChunkAccess>> {
            Self::push(&self.ticking)
        }

        fn prepare_entity_ticking_chunk(
            &self,
            _: &Arc<ChunkHolder>,
        ) -> ChunkFuture<Arc<ChunkAccess>> {
            Self::push(&self.entity_ticking)
        }

        fn on_full_chunk_status_change(&self, _: ChunkPos, status: FullChunkStatus) {
            self.changes.lock().push(status);
        }

        fn execute_on_main_thread(&self, task: Box<dyn FnOnce() + Send>) {
            task();
        }

        fn on_level_change(&self, _: ChunkPos, queue_level: u8, ticket_level: u8) {
            self.level_changes.lock().push((queue_level, ticket_level));
        }
    }

    fn level_chunk() -> Arc<ChunkAccess> {
        Arc::new(ChunkAccess::Full(LevelChunk::from_disk(
            Sections::new_empty(24),
            ChunkPos::new(0, 0),
            true,
        )))
    }

    fn holder(level: u8) -> Arc<ChunkHolder> {
        Arc::new(ChunkHolder::new(
            ChunkPos::new(0, 0),
            level,
            LevelHeight::default(),
        ))
    }

    #[test]
    fn test_promotion_confirms_after_future_resolves() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let holder = holder(ChunkLevel::FULL_STATUS_LEVEL);
        holder.update_futures(&scheduler);

        assert_eq!(scheduler.accessible.lock().len(), 1);
        assert!(scheduler.ticking.lock().is_empty());
        assert!(scheduler.changes.lock().is_empty());
        assert!(!holder.is_ready_for_saving());
        assert!(holder.was_accessible_since_last_save());

        let future = scheduler.accessible.lock()[0].clone();
        future.complete(Ok(level_chunk()));
        assert_eq!(scheduler.changes.lock().as_slice(), &[FullChunkStatus::Full]);
        assert!(holder.full_chunk().is_some());
        assert!(holder.is_ready_for_saving());
        assert_eq!(
            scheduler.level_changes.lock().as_slice(),
            &[(ChunkLevel::UNLOADED_LEVEL, ChunkLevel::FULL_STATUS_LEVEL)]
        );
    }

    #[test]
    fn test_demotion_is_synchronous() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let holder = holder(ChunkLevel::ENTITY_TICKING_LEVEL);
        holder.update_futures(&scheduler);
        let entity_ticking = holder.entity_ticking_chunk_future();

        holder.set_ticket_level(ChunkLevel::BLOCK_TICKING_LEVEL);
        holder.update_futures(&scheduler);

        assert!(matches!(
            entity_ticking.get_now(),
            Some(Err(ChunkLoadError::Unloaded))
        ));
        assert_eq!(
            scheduler.changes.lock().as_slice(),
            &[FullChunkStatus::BlockTicking]
        );
        assert!(is_unloaded_future(&holder.entity_ticking_chunk_future()));

        // The superseded promotion must not be confirmed late.
        let ticking = scheduler.ticking.lock()[0].clone();
        ticking.complete(Ok(level_chunk()));
        assert_eq!(
            scheduler.changes.lock().as_slice(),
            &[FullChunkStatus::BlockTicking]
        );
    }

    #[test]
    fn test_block_changes_need_a_ticking_chunk() {
        let scheduler = Arc::new(RecordingScheduler::default());
        let holder = holder(ChunkLevel::BLOCK_TICKING_LEVEL);
        holder.update_futures(&scheduler);
        assert!(!holder.block_changed(&BlockPos::new(1, 70, 2)));

        scheduler.ticking.lock()[0].complete(Ok(level_chunk()));
        assert!(holder.block_changed(&BlockPos::new(1, 70, 2)));
        assert!(!holder.block_changed(&BlockPos::new(3, -60, 2)));
        assert!(!holder.block_changed(&BlockPos::new(0, 1000, 0)));
        assert!(holder.has_changes_to_broadcast());

        let changes = holder.broadcast_changes().expect("changes were recorded");
        assert_eq!(changes.changed_blocks.len(), 2);
        assert_eq!(changes.changed_blocks[0].0, -4);
        assert_eq!(changes.changed_blocks[1], (4, vec![BlockPos::new(1, 70, 2).section_relative()]));
        assert!(!holder.has_changes_to_broadcast());
        assert!(holder.broadcast_changes().is_none());
    }

    #[test]
    fn test_save_waits_for_every_dependency() {
        let holder = holder(ChunkLevel::MAX_LEVEL);
        let first = Completable::new();
        let second = Completable::new();
        holder.add_save_dependency(&first);
        holder.add_save_dependency(&second);

        first.complete(());
        assert!(!holder.is_ready_for_saving());
        second.complete(());
        assert!(holder.is_ready_for_saving());
    }
}
