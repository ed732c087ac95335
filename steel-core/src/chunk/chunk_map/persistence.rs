//! Saving chunks and dropping holders that left the loaded world.
use std::{
    sync::{Arc, atomic::Ordering},
    time::{Duration, Instant},
};

use steel_utils::ChunkPos;

use super::ChunkMap;
use crate::{
    chunk::{
        chunk_access::{ChunkAccess, ChunkStatus, ChunkType},
        chunk_future::Completable,
        chunk_holder::ChunkHolder,
    },
    chunk_saver::SerializedChunk,
};

/// What storage is known to hold at a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedChunkType {
    /// Nothing usable. Any chunk may be written here.
    Replaceable,
    /// A chunk that did not finish generating.
    Proto,
    /// A finished chunk.
    Full,
}

impl From<ChunkType> for CachedChunkType {
    fn from(chunk_type: ChunkType) -> Self {
        match chunk_type {
            ChunkType::Proto => Self::Proto,
            ChunkType::Level => Self::Full,
        }
    }
}

impl ChunkMap {
    /// What storage is known to hold at `pos`, if it was read or written since startup.
    #[must_use]
    pub fn cached_chunk_type(&self, pos: ChunkPos) -> Option<CachedChunkType> {
        self.chunk_type_cache.lock().get(&pos.as_i64()).copied()
    }

    pub(super) fn mark_position_replaceable(&self, pos: ChunkPos) {
        self.chunk_type_cache
            .lock()
            .insert(pos.as_i64(), CachedChunkType::Replaceable);
    }

    pub(super) fn mark_position(&self, pos: ChunkPos, chunk_type: ChunkType) -> bool {
        let cached = CachedChunkType::from(chunk_type);
        self.chunk_type_cache.lock().insert(pos.as_i64(), cached);
        cached == CachedChunkType::Full
    }

    fn is_existing_chunk_full(&self, pos: ChunkPos) -> bool {
        if let Some(cached) = self.cached_chunk_type(pos) {
            return cached == CachedChunkType::Full;
        }
        match self.runtime.block_on(self.storage.read(pos)) {
            Ok(Some(stored)) => self.mark_position(pos, stored.status.chunk_type()),
            Ok(None) => {
                self.mark_position_replaceable(pos);
                false
            }
            Err(error) => {
                log::error!("Failed to read chunk {pos} before saving over it: {error}");
                self.hooks.failure_reporter.report_load_failure(pos, &error);
                self.mark_position_replaceable(pos);
                false
            }
        }
    }

    /// Writes `chunk` if it has unsaved changes.
    ///
    /// A chunk that never left the empty stage is not written, and neither is an unfinished chunk
    /// over a finished one. Returns whether a write was started.
    pub fn save(&self, chunk: &Arc<ChunkAccess>) -> bool {
        let pos = chunk.pos();
        self.hooks.storage.flush_on_save(pos);
        if !self.config.save_enabled || !chunk.try_mark_saved() {
            return false;
        }

        let status = chunk.persisted_status();
        if status.chunk_type() != ChunkType::Level
            && (self.is_existing_chunk_full(pos) || status == ChunkStatus::Empty)
        {
            return false;
        }

        let serialized = SerializedChunk::from_chunk(chunk);
        self.mark_position(pos, status.chunk_type());
        self.active_chunk_writes.fetch_add(1, Ordering::AcqRel);

        let storage = self.storage.clone();
        let active_writes = self.active_chunk_writes.clone();
        let reporter = self.hooks.failure_reporter.clone();
        self.runtime.spawn(async move {
            if let Err(error) = storage.write(pos, serialized).await {
                log::error!("Failed to save chunk {pos}: {error}");
                reporter.report_save_failure(pos, &error);
            }
            active_writes.fetch_sub(1, Ordering::AcqRel);
        });
        true
    }

    /// Saves a holder's chunk if it was accessible, is finished, is unsaved and is off cooldown.
    fn save_chunk_if_needed(&self, holder: &ChunkHolder, now: Instant) -> bool {
        if !holder.was_accessible_since_last_save() || !holder.is_ready_for_saving() {
            return false;
        }
        let Some(chunk) = holder.generation().latest_chunk() else {
            return false;
        };
        if !chunk.is_full() || !chunk.is_unsaved() {
            return false;
        }

        let pos = holder.pos().as_i64();
        if self
            .chunk_save_cooldowns
            .lock()
            .get(&pos)
            .is_some_and(|cooldown| now < *cooldown)
        {
            return false;
        }

        let saved = self.save(&chunk);
        holder.refresh_accessibility();
        if saved {
            self.chunk_save_cooldowns.lock().insert(
                pos,
                now + Duration::from_millis(self.config.eager_save_cooldown_ms),
            );
        }
        saved
    }

    fn save_chunks_eagerly(&self, has_time: &dyn Fn() -> bool) {
        let now = Instant::now();
        let candidates: Vec<i64> = self.chunks_to_eagerly_save.lock().iter().copied().collect();
        let mut saved = 0;
        for pos in candidates {
            if saved >= self.config.chunks_saved_eagerly_per_tick
                || self.active_chunk_writes.load(Ordering::Acquire)
                    >= self.config.max_active_chunk_writes
                || !has_time()
            {
                break;
            }

            let holder = self.visible_chunk_if_present(pos);
            let unsaved = holder
                .as_ref()
                .and_then(|holder| holder.generation().latest_chunk())
                .is_some_and(|chunk| chunk.is_unsaved());
            if !unsaved {
                self.chunks_to_eagerly_save.lock().remove(&pos);
            } else if let Some(holder) = holder
                && self.save_chunk_if_needed(&holder, now)
            {
                saved += 1;
                self.chunks_to_eagerly_save.lock().remove(&pos);
            }
        }
    }

    /// Moves holders that left the loaded world into the unload queue and runs queued unloads.
    ///
    /// Unloads run while `has_time` allows and always while the queue is over its backlog.
    pub fn process_unloads(&self, has_time: &dyn Fn() -> bool) {
        let dropped: Vec<i64> = self.to_drop.lock().drain().collect();
        for pos in dropped {
            let Some(holder) = self.updating_chunk_map.lock().remove(&pos) else {
                continue;
            };
            self.pending_unloads.lock().insert(pos, holder.clone());
            self.modified.store(true, Ordering::Release);
            self.schedule_unload(pos, holder);
        }

        let mut over_backlog = self
            .unload_queue
            .len()
            .saturating_sub(self.config.unload_queue_backlog);
        while over_backlog > 0 || has_time() {
            let Some(unload) = self.unload_queue.pop() else {
                break;
            };
            over_backlog = over_backlog.saturating_sub(1);
            unload();
        }

        self.save_chunks_eagerly(has_time);
    }

    fn schedule_unload(&self, pos: i64, holder: Arc<ChunkHolder>) {
        let save_sync = holder.save_sync_future();
        let map = self.this.clone();
        let expected = save_sync.clone();
        save_sync.on_complete(move |_| {
            let Some(queue_map) = map.upgrade() else {
                return;
            };
            queue_map.unload_queue.push(Box::new(move || {
                if let Some(map) = map.upgrade() {
                    map.unload_holder(pos, holder, &expected);
                }
            }));
        });
    }

    fn unload_holder(&self, pos: i64, holder: Arc<ChunkHolder>, expected: &Arc<Completable<()>>) {
        if !Arc::ptr_eq(&holder.save_sync_future(), expected) {
            self.schedule_unload(pos, holder);
            return;
        }

        {
            let mut pending = self.pending_unloads.lock();
            if !pending
                .get(&pos)
                .is_some_and(|pending| Arc::ptr_eq(pending, &holder))
            {
                return;
            }
            pending.remove(&pos);
        }

        let chunk_pos = holder.pos();
        if let Some(chunk) = holder.generation().latest_chunk() {
            if let Some(level_chunk) = chunk.as_level_chunk() {
                level_chunk.set_loaded(false);
            }
            self.save(&chunk);
            self.light_engine
                .update_chunk_status(chunk_pos, holder.queue_level());
            self.light_engine.try_schedule_update();
            self.hooks.status_listener.on_chunk_unloaded(chunk_pos);
        }
        self.chunk_save_cooldowns.lock().remove(&pos);
        log::trace!("Unloaded chunk {chunk_pos}");
    }

    /// Saves every chunk. Main thread only.
    ///
    /// Flushing waits for in-flight generation of every accessible chunk, drains the unload
    /// queue and waits for storage. Otherwise up to the per-call limit of eligible chunks is
    /// written without waiting.
    pub fn save_all_chunks(&self, flush: bool) {
        if !flush {
            let now = Instant::now();
            let holders: Vec<Arc<ChunkHolder>> =
                self.visible_chunk_map.load().values().cloned().collect();
            let mut saved = 0;
            for holder in holders {
                if saved >= self.config.chunks_saved_per_tick {
                    break;
                }
                if self.save_chunk_if_needed(&holder, now) {
                    saved += 1;
                }
            }
            return;
        }

        let holders: Vec<Arc<ChunkHolder>> = self
            .visible_chunk_map
            .load()
            .values()
            .filter(|holder| holder.was_accessible_since_last_save())
            .cloned()
            .collect();
        for holder in &holders {
            holder.refresh_accessibility();
        }

        loop {
            let mut did_work = false;
            for holder in &holders {
                self.managed_block(|| holder.is_ready_for_saving());
                if let Some(chunk) = holder.generation().latest_chunk()
                    && chunk.is_full()
                    && self.save(&chunk)
                {
                    did_work = true;
                }
            }
            if !did_work {
                break;
            }
        }

        self.process_unloads(&|| true);
        self.publish_chunk_map();
        self.flush_storage();
        log::info!("Saved {} chunks", holders.len());
    }

    /// Waits for every started write and flushes storage.
    pub(super) fn flush_storage(&self) {
        self.managed_block(|| self.active_chunk_writes.load(Ordering::Acquire) == 0);
        if let Err(error) = self.runtime.block_on(self.storage.flush()) {
            log::error!("Failed to flush chunk storage: {error}");
        }
    }

    /// Writes still in flight.
    #[must_use]
    pub fn active_chunk_writes(&self) -> usize {
        self.active_chunk_writes.load(Ordering::Acquire)
    }

    /// Holders waiting for their last save before being dropped.
    #[must_use]
    pub fn pending_unload_count(&self) -> usize {
        self.pending_unloads.lock().len()
    }

    /// Waits for outstanding writes. The map must not be used afterwards.
    pub fn close(&self) {
        self.flush_storage();
        log::info!("Chunk map closed");
    }
}
