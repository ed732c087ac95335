//! Incremental multi-source distance propagation over the chunk grid.
//!
//! Every position has a level: the minimum of the level its own sources give it and one more
//! than the level of any of its eight neighbours. Lower levels mean more interest. The tracker
//! keeps those levels at a fixed point while sources change, touching only positions whose
//! level can actually move. Work is processed in bounded batches so a caller can spread it
//! over several ticks.
use rustc_hash::{FxHashMap, FxHashSet};
use steel_utils::ChunkPos;

/// Provides the level a position gets from its own sources, ignoring its neighbours.
pub trait LevelSource {
    /// The source level at `pos`. Values above the tracker's range mean "no source".
    fn level_from_source(&self, pos: i64) -> u8;
}

impl<F: Fn(i64) -> u8> LevelSource for F {
    fn level_from_source(&self, pos: i64) -> u8 {
        self(pos)
    }
}

/// Positions waiting to be recomputed, bucketed by priority.
struct LeveledPriorityQueue {
    queues: Box<[FxHashSet<i64>]>,
    first_queued_level: usize,
}

impl LeveledPriorityQueue {
    fn new(level_count: usize) -> Self {
        Self {
            queues: (0..level_count).map(|_| FxHashSet::default()).collect(),
            first_queued_level: level_count,
        }
    }

    fn is_empty(&self) -> bool {
        self.first_queued_level >= self.queues.len()
    }

    fn enqueue(&mut self, pos: i64, level: usize) {
        self.queues[level].insert(pos);
        if self.first_queued_level > level {
            self.first_queued_level = level;
        }
    }

    fn dequeue(&mut self, pos: i64, level: usize) {
        let queue = &mut self.queues[level];
        queue.remove(&pos);
        if queue.is_empty() && self.first_queued_level == level {
            self.check_first_queued_level();
        }
    }

    fn remove_first(&mut self) -> Option<i64> {
        let queue = self.queues.get_mut(self.first_queued_level)?;
        let pos = queue.iter().next().copied()?;
        queue.remove(&pos);
        if queue.is_empty() {
            self.check_first_queued_level();
        }
        Some(pos)
    }

    fn check_first_queued_level(&mut self) {
        self.first_queued_level = self
            .queues
            .iter()
            .enumerate()
            .skip(self.first_queued_level)
            .find(|(_, queue)| !queue.is_empty())
            .map_or(self.queues.len(), |(level, _)| level);
    }
}

/// The propagation engine. One instance per kind of interest.
pub struct ChunkTracker {
    level_count: u8,
    levels: FxHashMap<i64, u8>,
    computed_levels: FxHashMap<i64, u8>,
    queue: LeveledPriorityQueue,
}

/// Marks the source side of an edge; no chunk lives at this key.
const SOURCE: i64 = ChunkPos::INVALID;

impl ChunkTracker {
    /// Creates a tracker whose levels range over `0..level_count`. The top level means "untracked".
    #[must_use]
    pub fn new(level_count: u8) -> Self {
        assert!(level_count >= 2, "A tracker needs at least two levels");
        Self {
            level_count,
            levels: FxHashMap::default(),
            computed_levels: FxHashMap::default(),
            queue: LeveledPriorityQueue::new(level_count as usize),
        }
    }

    /// The level positions without any interest sit at.
    #[must_use]
    pub const fn sentinel(&self) -> u8 {
        self.level_count - 1
    }

    /// The current level of `pos`.
    #[must_use]
    pub fn level(&self, pos: i64) -> u8 {
        self.levels.get(&pos).copied().unwrap_or(self.sentinel())
    }

    /// Every position below the sentinel with its level.
    pub fn levels(&self) -> impl Iterator<Item = (i64, u8)> + '_ {
        self.levels.iter().map(|(pos, level)| (*pos, *level))
    }

    /// The number of positions below the sentinel.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns true if updates are still waiting to be processed.
    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Notifies the tracker that the source level at `pos` became `level`.
    ///
    /// `decreasing` must be true when the source got more interested (a lower level) and false otherwise.
    pub fn update(&mut self, pos: i64, level: u8, decreasing: bool, source: &impl LevelSource) {
        let level = level.min(self.sentinel());
        self.check_edge(SOURCE, pos, level, decreasing, source);
    }

    /// Processes up to `budget` queued positions, reporting each level change as `(pos, old, new)`.
    ///
    /// Returns the unused budget.
    pub fn run_updates(
        &mut self,
        mut budget: usize,
        source: &impl LevelSource,
        on_change: &mut impl FnMut(i64, u8, u8),
    ) -> usize {
        while budget > 0 {
            let Some(pos) = self.queue.remove_first() else {
                break;
            };
            budget -= 1;

            let level = self.level(pos);
            let Some(computed) = self.computed_levels.remove(&pos) else {
                continue;
            };

            if computed < level {
                self.set_level(pos, computed, on_change);
                self.check_neighbors_after_update(pos, computed, true, source);
            } else if computed > level {
                self.set_level(pos, self.sentinel(), on_change);
                if computed != self.sentinel() {
                    self.enqueue(pos, computed, computed);
                }
                self.check_neighbors_after_update(pos, level, false, source);
            }
        }
        budget
    }

    /// Processes every queued position.
    pub fn run_all_updates(
        &mut self,
        source: &impl LevelSource,
        on_change: &mut impl FnMut(i64, u8, u8),
    ) {
        while self.has_work() {
            self.run_updates(usize::MAX, source, on_change);
        }
    }

    fn set_level(&mut self, pos: i64, level: u8, on_change: &mut impl FnMut(i64, u8, u8)) {
        let old = self.level(pos);
        if level >= self.sentinel() {
            self.levels.remove(&pos);
        } else {
            self.levels.insert(pos, level);
        }
        if old != level {
            on_change(pos, old, level);
        }
    }

    fn enqueue(&mut self, pos: i64, level: u8, priority: u8) {
        self.queue.enqueue(pos, priority as usize);
        self.computed_levels.insert(pos, level);
    }

    fn remove_from_queue(&mut self, pos: i64, priority: u8) {
        self.queue.dequeue(pos, priority as usize);
        self.computed_levels.remove(&pos);
    }

    fn check_edge(
        &mut self,
        from: i64,
        to: i64,
        new_level: u8,
        decreasing: bool,
        source: &impl LevelSource,
    ) {
        let computed = self.computed_levels.get(&to).copied();
        let current = self.level(to);
        self.check_edge_with(from, to, new_level, current, computed, decreasing, source);
    }

    #[allow(clippy::too_many_arguments)]
    fn check_edge_with(
        &mut self,
        from: i64,
        to: i64,
        new_level: u8,
        current_level: u8,
        computed: Option<u8>,
        decreasing: bool,
        source: &impl LevelSource,
    ) {
        let current_or_computed = computed.unwrap_or(current_level);
        let propagated = if decreasing {
            new_level.min(current_or_computed)
        } else {
            self.computed_level(to, from, new_level, source)
                .min(self.sentinel())
        };

        let priority = current_level.min(propagated);
        if let Some(previous) = computed {
            let previous_priority = current_level.min(previous);
            if propagated == current_level {
                self.remove_from_queue(to, previous_priority);
                return;
            }
            if previous_priority != priority {
                self.remove_from_queue(to, previous_priority);
            }
        } else if propagated == current_level {
            return;
        }
        self.enqueue(to, propagated, priority);
    }

    fn check_neighbors_after_update(
        &mut self,
        pos: i64,
        level: u8,
        decreasing: bool,
        source: &impl LevelSource,
    ) {
        if decreasing && level >= self.level_count - 2 {
            return;
        }
        let center = ChunkPos::from_i64(pos);
        for dx in -1..=1 {
            for dz in -1..=1 {
                let neighbor = ChunkPos::pack(center.x() + dx, center.z() + dz);
                if neighbor != pos {
                    self.check_neighbor(pos, neighbor, level, decreasing, source);
                }
            }
        }
    }

    fn check_neighbor(
        &mut self,
        from: i64,
        to: i64,
        source_level: u8,
        decreasing: bool,
        source: &impl LevelSource,
    ) {
        let computed = self.computed_levels.get(&to).copied();
        let from_neighbor = source_level.saturating_add(1).min(self.sentinel());
        let current = self.level(to);

        if decreasing {
            self.check_edge_with(from, to, from_neighbor, current, computed, true, source);
        } else {
            let effective = computed.unwrap_or(current);
            if from_neighbor == effective {
                self.check_edge_with(
                    from,
                    to,
                    self.sentinel(),
                    current,
                    computed,
                    false,
                    source,
                );
            }
        }
    }

    /// The level `pos` gets from everything except `excluded`, starting from `level`.
    fn computed_level(&self, pos: i64, excluded: i64, level: u8, source: &impl LevelSource) -> u8 {
        let mut result = level;
        let center = ChunkPos::from_i64(pos);
        for dx in -1..=1 {
            for dz in -1..=1 {
                let mut neighbor = ChunkPos::pack(center.x() + dx, center.z() + dz);
                if neighbor == pos {
                    neighbor = SOURCE;
                }
                if neighbor == excluded {
                    continue;
                }
                let candidate = if neighbor == SOURCE {
                    source.level_from_source(pos)
                } else {
                    self.level(neighbor).saturating_add(1)
                };
                result = result.min(candidate);
                if result == 0 {
                    return 0;
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVELS: u8 = 46;

    fn sources_of(sources: &FxHashMap<i64, u8>) -> impl Fn(i64) -> u8 + '_ {
        move |pos| sources.get(&pos).copied().unwrap_or(u8::MAX)
    }

    fn add(tracker: &mut ChunkTracker, sources: &mut FxHashMap<i64, u8>, x: i32, z: i32, level: u8) {
        let pos = ChunkPos::pack(x, z);
        sources.insert(pos, level);
        tracker.update(pos, level, true, &sources_of(sources));
    }

    fn remove(tracker: &mut ChunkTracker, sources: &mut FxHashMap<i64, u8>, x: i32, z: i32) {
        let pos = ChunkPos::pack(x, z);
        sources.remove(&pos);
        tracker.update(pos, u8::MAX, false, &sources_of(sources));
    }

    fn converge(tracker: &mut ChunkTracker, sources: &FxHashMap<i64, u8>) {
        tracker.run_all_updates(&sources_of(sources), &mut |_, _, _| {});
    }

    fn expected(sources: &FxHashMap<i64, u8>, x: i32, z: i32, sentinel: u8) -> u8 {
        sources
            .iter()
            .map(|(pos, level)| {
                let pos = ChunkPos::from_i64(*pos);
                let distance = ChunkPos::new(x, z).chessboard_distance(&pos);
                u32::from(*level) + distance as u32
            })
            .min()
            .map_or(sentinel, |level| level.min(u32::from(sentinel)) as u8)
    }

    fn assert_matches_brute_force(tracker: &ChunkTracker, sources: &FxHashMap<i64, u8>) {
        for x in -20..=20 {
            for z in -20..=20 {
                assert_eq!(
                    tracker.level(ChunkPos::pack(x, z)),
                    expected(sources, x, z, tracker.sentinel()),
                    "level mismatch at ({x}, {z})"
                );
            }
        }
    }

    #[test]
    fn test_single_source_spreads_by_chessboard_distance() {
        let mut tracker = ChunkTracker::new(LEVELS);
        let mut sources = FxHashMap::default();
        add(&mut tracker, &mut sources, 0, 0, 31);
        converge(&mut tracker, &sources);

        assert_eq!(tracker.level(ChunkPos::pack(0, 0)), 31);
        assert_eq!(tracker.level(ChunkPos::pack(1, 1)), 32);
        assert_eq!(tracker.level(ChunkPos::pack(-3, 2)), 34);
        assert_eq!(tracker.level(ChunkPos::pack(14, 0)), 45);
        assert_eq!(tracker.level(ChunkPos::pack(20, 0)), 45);
        assert_matches_brute_force(&tracker, &sources);
    }

    #[test]
    fn test_two_player_tickets_scenario() {
        let mut tracker = ChunkTracker::new(LEVELS);
        let mut sources = FxHashMap::default();
        add(&mut tracker, &mut sources, 0, 0, 31);
        add(&mut tracker, &mut sources, 2, 0, 31);
        converge(&mut tracker, &sources);

        assert_eq!(tracker.level(ChunkPos::pack(1, 0)), 32);
        assert_eq!(tracker.level(ChunkPos::pack(3, 0)), 32);
        assert_eq!(tracker.level(ChunkPos::pack(4, 0)), 33);
        assert_eq!(tracker.level(ChunkPos::pack(40, 0)), tracker.sentinel());
        assert_matches_brute_force(&tracker, &sources);
    }

    #[test]
    fn test_removing_a_source_raises_levels_back() {
        let mut tracker = ChunkTracker::new(LEVELS);
        let mut sources = FxHashMap::default();
        add(&mut tracker, &mut sources, 0, 0, 31);
        add(&mut tracker, &mut sources, 5, 5, 33);
        converge(&mut tracker, &sources);

        remove(&mut tracker, &mut sources, 0, 0);
        converge(&mut tracker, &sources);
        assert_matches_brute_force(&tracker, &sources);

        remove(&mut tracker, &mut sources, 5, 5);
        converge(&mut tracker, &sources);
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn test_raising_a_source_level() {
        let mut tracker = ChunkTracker::new(LEVELS);
        let mut sources = FxHashMap::default();
        add(&mut tracker, &mut sources, 0, 0, 31);
        converge(&mut tracker, &sources);

        sources.insert(ChunkPos::pack(0, 0), 40);
        tracker.update(ChunkPos::pack(0, 0), 40, false, &sources_of(&sources));
        converge(&mut tracker, &sources);
        assert_matches_brute_force(&tracker, &sources);
    }

    #[test]
    fn test_budgeted_updates_resume() {
        let mut tracker = ChunkTracker::new(LEVELS);
        let mut sources = FxHashMap::default();
        add(&mut tracker, &mut sources, 3, -2, 31);

        let mut rounds = 0;
        while tracker.has_work() {
            tracker.run_updates(10, &sources_of(&sources), &mut |_, _, _| {});
            rounds += 1;
        }
        assert!(rounds > 1);
        assert_matches_brute_force(&tracker, &sources);
    }

    #[test]
    fn test_changes_are_reported() {
        let mut tracker = ChunkTracker::new(LEVELS);
        let mut sources = FxHashMap::default();
        add(&mut tracker, &mut sources, 0, 0, 43);

        let mut changes = Vec::new();
        tracker.run_all_updates(&sources_of(&sources), &mut |pos, old, new| {
            changes.push((pos, old, new));
        });

        assert!(changes.contains(&(ChunkPos::pack(0, 0), 45, 43)));
        assert!(changes.contains(&(ChunkPos::pack(1, -1), 45, 44)));
        assert_eq!(changes.len(), 9);
    }

    #[test]
    fn test_random_churn_matches_brute_force() {
        let mut tracker = ChunkTracker::new(LEVELS);
        let mut sources = FxHashMap::default();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..200 {
            let x = (next() % 21) as i32 - 10;
            let z = (next() % 21) as i32 - 10;
            if next() % 3 == 0 {
                remove(&mut tracker, &mut sources, x, z);
            } else {
                let level = 25 + (next() % 20) as u8;
                let pos = ChunkPos::pack(x, z);
                let decreasing = sources.get(&pos).is_none_or(|old| level < *old);
                sources.insert(pos, level);
                tracker.update(pos, level, decreasing, &sources_of(&sources));
            }
            if next() % 4 == 0 {
                converge(&mut tracker, &sources);
            }
        }
        converge(&mut tracker, &sources);
        assert_matches_brute_force(&tracker, &sources);
    }
}
