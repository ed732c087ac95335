//! A light engine that tracks light per section.
//!
//! Sky light is full in every section above the highest section holding blocks and dark below
//! it. Block light is rechecked in the section of a changed block and the sections next to it.
use rustc_hash::{FxHashMap, FxHashSet};
use steel_utils::{BlockPos, ChunkPos, SectionPos};

use crate::chunk::{
    light_engine::{LightEngine, LightLayer, LightListener},
    section::LevelHeight,
};

const FULL_BRIGHT: u8 = 15;

#[derive(Default)]
struct ChunkLight {
    enabled: bool,
    retained: bool,
    non_empty: FxHashSet<i32>,
    sky: Vec<u8>,
}

/// Per-section light engine.
pub struct SectionLightEngine {
    height: LevelHeight,
    chunks: FxHashMap<i64, ChunkLight>,
    dirty_chunks: FxHashSet<i64>,
    block_checks: FxHashSet<SectionPos>,
    listener: LightListener,
}

impl SectionLightEngine {
    /// Creates an engine for a world of `height`, reporting changed sections to `listener`.
    #[must_use]
    pub fn new(height: LevelHeight, listener: LightListener) -> Self {
        Self {
            height,
            chunks: FxHashMap::default(),
            dirty_chunks: FxHashSet::default(),
            block_checks: FxHashSet::default(),
            listener,
        }
    }

    /// The sky light of a light section, `None` if the chunk has no light data.
    #[must_use]
    pub fn sky_light(&self, pos: SectionPos) -> Option<u8> {
        let chunk = self.chunks.get(&pos.chunk_pos().as_i64())?;
        let index = usize::try_from(pos.y() - self.height.min_light_section()).ok()?;
        chunk.sky.get(index).copied()
    }

    /// Whether light is enabled for a chunk.
    #[must_use]
    pub fn is_light_enabled(&self, pos: ChunkPos) -> bool {
        self.chunks
            .get(&pos.as_i64())
            .is_some_and(|chunk| chunk.enabled)
    }

    fn chunk(&mut self, pos: ChunkPos) -> &mut ChunkLight {
        self.chunks.entry(pos.as_i64()).or_default()
    }

    fn relight_sky(&mut self, key: i64) -> usize {
        let height = self.height;
        let listener = self.listener.clone();
        let Some(chunk) = self.chunks.get_mut(&key) else {
            return 0;
        };
        if !chunk.enabled {
            return 0;
        }

        let top = chunk.non_empty.iter().max().copied();
        let sky: Vec<u8> = (0..height.light_section_count())
            .map(|index| {
                let section_y = height.min_light_section() + index as i32;
                if top.is_none_or(|top| section_y > top) {
                    FULL_BRIGHT
                } else {
                    0
                }
            })
            .collect();

        let pos = ChunkPos::from_i64(key);
        let mut changed = 0;
        for (index, level) in sky.iter().enumerate() {
            if chunk.sky.get(index) != Some(level) {
                listener(pos, LightLayer::Sky, height.min_light_section() + index as i32);
                changed += 1;
            }
        }
        chunk.sky = sky;
        changed
    }
}

impl LightEngine for SectionLightEngine {
    fn update_section_status(&mut self, pos: SectionPos, has_only_air: bool) {
        let chunk = self.chunk(pos.chunk_pos());
        let changed = if has_only_air {
            chunk.non_empty.remove(&pos.y())
        } else {
            chunk.non_empty.insert(pos.y())
        };
        if changed {
            self.dirty_chunks.insert(pos.chunk_pos().as_i64());
        }
    }

    fn propagate_light_sources(&mut self, pos: ChunkPos) {
        self.dirty_chunks.insert(pos.as_i64());
    }

    fn set_light_enabled(&mut self, pos: ChunkPos, enabled: bool) {
        let chunk = self.chunk(pos);
        chunk.enabled = enabled;
        if enabled {
            self.dirty_chunks.insert(pos.as_i64());
        } else if !chunk.retained {
            self.chunks.remove(&pos.as_i64());
            self.dirty_chunks.remove(&pos.as_i64());
        }
    }

    fn retain_data(&mut self, pos: ChunkPos, retain: bool) {
        let chunk = self.chunk(pos);
        chunk.retained = retain;
        if !retain && !chunk.enabled {
            self.chunks.remove(&pos.as_i64());
        }
    }

    fn check_block(&mut self, pos: BlockPos) {
        let section = SectionPos::of_block(&pos);
        for dy in -1..=1 {
            self.block_checks
                .insert(SectionPos::new(section.0.x, section.y() + dy, section.0.z));
        }
    }

    fn run_light_updates(&mut self) -> usize {
        let mut changed = 0;
        let dirty: Vec<i64> = self.dirty_chunks.drain().collect();
        for key in dirty {
            changed += self.relight_sky(key);
        }

        let min = self.height.min_light_section();
        let max = min + self.height.light_section_count() as i32;
        let checks: Vec<SectionPos> = self.block_checks.drain().collect();
        for section in checks {
            if section.y() < min || section.y() >= max || !self.is_light_enabled(section.chunk_pos())
            {
                continue;
            }
            (self.listener)(section.chunk_pos(), LightLayer::Block, section.y());
            changed += 1;
        }
        changed
    }

    fn has_light_work(&self) -> bool {
        !self.dirty_chunks.is_empty() || !self.block_checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use steel_utils::locks::SyncMutex;

    use super::*;

    fn engine() -> (SectionLightEngine, Arc<SyncMutex<Vec<(LightLayer, i32)>>>) {
        let changes = Arc::new(SyncMutex::new(Vec::new()));
        let sink = changes.clone();
        let listener: LightListener = Arc::new(move |_, layer, y| sink.lock().push((layer, y)));
        (SectionLightEngine::new(LevelHeight::new(0, 4), listener), changes)
    }

    #[test]
    fn test_sky_is_dark_below_the_highest_filled_section() {
        let (mut engine, _) = engine();
        let pos = ChunkPos::new(0, 0);
        engine.update_section_status(SectionPos::new(0, 1, 0), false);
        engine.set_light_enabled(pos, true);
        engine.run_light_updates();

        assert_eq!(engine.sky_light(SectionPos::new(0, -1, 0)), Some(0));
        assert_eq!(engine.sky_light(SectionPos::new(0, 1, 0)), Some(0));
        assert_eq!(engine.sky_light(SectionPos::new(0, 2, 0)), Some(15));
        assert_eq!(engine.sky_light(SectionPos::new(0, 4, 0)), Some(15));
        assert!(!engine.has_light_work());
    }

    #[test]
    fn test_only_changed_sections_are_reported() {
        let (mut engine, changes) = engine();
        let pos = ChunkPos::new(0, 0);
        engine.set_light_enabled(pos, true);
        engine.run_light_updates();
        changes.lock().clear();

        engine.update_section_status(SectionPos::new(0, 0, 0), false);
        assert_eq!(engine.run_light_updates(), 2);
        assert_eq!(*changes.lock(), vec![(LightLayer::Sky, -1), (LightLayer::Sky, 0)]);
    }

    #[test]
    fn test_block_check_touches_neighbouring_sections() {
        let (mut engine, changes) = engine();
        engine.set_light_enabled(ChunkPos::new(0, 0), true);
        engine.run_light_updates();
        changes.lock().clear();

        engine.check_block(BlockPos::new(3, 4, 5));
        assert_eq!(engine.run_light_updates(), 3);
        let mut sections: Vec<i32> = changes.lock().iter().map(|(_, y)| *y).collect();
        sections.sort_unstable();
        assert_eq!(sections, vec![-1, 0, 1]);
    }

    #[test]
    fn test_disabling_drops_unretained_data() {
        let (mut engine, _) = engine();
        let pos = ChunkPos::new(2, 2);
        engine.set_light_enabled(pos, true);
        engine.run_light_updates();
        engine.retain_data(pos, true);
        engine.set_light_enabled(pos, false);
        assert!(engine.sky_light(SectionPos::new(2, 0, 2)).is_some());

        engine.retain_data(pos, false);
        assert!(engine.sky_light(SectionPos::new(2, 0, 2)).is_none());
    }
}
