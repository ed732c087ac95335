//! Priority buckets of per-chunk task lists.
//!
//! Every bucket maps chunk keys to the tasks queued for that chunk, in the order the chunks were
//! first queued at that priority. A cursor tracks the lowest bucket that holds anything.
use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::chunk::chunk_level::ChunkLevel;

/// The number of priority buckets. Every ticket level including the unloaded one has its own.
pub const PRIORITY_LEVEL_COUNT: usize = ChunkLevel::MAX_LEVEL as usize + 2;

/// All tasks of one chunk popped from the queue.
#[derive(Debug)]
pub struct TasksForChunk<T> {
    /// The packed chunk position.
    pub pos: i64,
    /// The tasks in submission order.
    pub tasks: Vec<T>,
}

struct Bucket<T> {
    tasks: FxHashMap<i64, (u64, Vec<T>)>,
    order: VecDeque<(u64, i64)>,
}

impl<T> Bucket<T> {
    fn new() -> Self {
        Self {
            tasks: FxHashMap::default(),
            order: VecDeque::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn entry(&mut self, pos: i64, sequence: &mut u64) -> &mut Vec<T> {
        let order = &mut self.order;
        &mut self
            .tasks
            .entry(pos)
            .or_insert_with(|| {
                *sequence += 1;
                order.push_back((*sequence, pos));
                (*sequence, Vec::new())
            })
            .1
    }

    fn remove(&mut self, pos: i64) -> Option<Vec<T>> {
        let removed = self.tasks.remove(&pos).map(|(_, tasks)| tasks);
        if self.tasks.is_empty() {
            self.order.clear();
        }
        removed
    }

    fn pop_first(&mut self) -> Option<(i64, Vec<T>)> {
        while let Some((sequence, pos)) = self.order.pop_front() {
            if self
                .tasks
                .get(&pos)
                .is_some_and(|(current, _)| *current == sequence)
            {
                return self.tasks.remove(&pos).map(|(_, tasks)| (pos, tasks));
            }
        }
        None
    }
}

/// Per-priority, per-chunk FIFO task lists.
pub struct ChunkTaskPriorityQueue<T> {
    name: String,
    buckets: Vec<Bucket<T>>,
    top_priority: usize,
    sequence: u64,
}

impl<T> ChunkTaskPriorityQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buckets: (0..PRIORITY_LEVEL_COUNT).map(|_| Bucket::new()).collect(),
            top_priority: PRIORITY_LEVEL_COUNT,
            sequence: 0,
        }
    }

    fn bucket_index(level: u8) -> usize {
        usize::from(level).min(PRIORITY_LEVEL_COUNT - 1)
    }

    /// Queues `task` for the chunk `pos` at priority `level`.
    pub fn submit(&mut self, task: T, pos: i64, level: u8) {
        let index = Self::bucket_index(level);
        self.buckets[index].entry(pos, &mut self.sequence).push(task);
        self.top_priority = self.top_priority.min(index);
    }

    /// Moves the queued tasks of `pos` from `queue_level` to `ticket_level`, keeping their order.
    pub fn resort_chunk_tasks(&mut self, queue_level: u8, pos: i64, ticket_level: u8) {
        let from = Self::bucket_index(queue_level);
        let to = Self::bucket_index(ticket_level);
        let Some(tasks) = self.buckets[from].remove(pos) else {
            return;
        };
        self.skip_empty_buckets();
        if tasks.is_empty() {
            return;
        }
        self.buckets[to].entry(pos, &mut self.sequence).extend(tasks);
        self.top_priority = self.top_priority.min(to);
    }

    /// Drops the empty task lists of `pos`, or all of its tasks if `full_clear` is set.
    pub fn release(&mut self, pos: i64, full_clear: bool) {
        for bucket in &mut self.buckets {
            let drop_entry = bucket
                .tasks
                .get_mut(&pos)
                .is_some_and(|(_, tasks)| {
                    if full_clear {
                        tasks.clear();
                    }
                    tasks.is_empty()
                });
            if drop_entry {
                bucket.remove(pos);
            }
        }
        self.skip_empty_buckets();
    }

    /// Takes every task of the first chunk in the most urgent bucket.
    pub fn pop(&mut self) -> Option<TasksForChunk<T>> {
        if !self.has_work() {
            return None;
        }
        let popped = self.buckets[self.top_priority].pop_first();
        self.skip_empty_buckets();
        popped.map(|(pos, tasks)| TasksForChunk { pos, tasks })
    }

    fn skip_empty_buckets(&mut self) {
        while self.has_work() && self.buckets[self.top_priority].is_empty() {
            self.top_priority += 1;
        }
    }

    /// Whether any task is queued.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.top_priority < PRIORITY_LEVEL_COUNT
    }

    /// The most urgent non-empty bucket, if any.
    #[must_use]
    pub fn top_priority(&self) -> Option<usize> {
        self.has_work().then_some(self.top_priority)
    }

    /// The number of chunks with queued tasks.
    #[must_use]
    pub fn queued_chunks(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.tasks.len()).sum()
    }

    /// The name of the queue, used in debug output.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_returns_lowest_bucket_first() {
        let mut queue = ChunkTaskPriorityQueue::new("test");
        queue.submit("far", 1, 40);
        queue.submit("near", 2, 31);
        queue.submit("near again", 2, 31);

        let first = queue.pop().expect("queued");
        assert_eq!(first.pos, 2);
        assert_eq!(first.tasks, vec!["near", "near again"]);
        assert_eq!(queue.top_priority(), Some(40));

        let second = queue.pop().expect("queued");
        assert_eq!(second.tasks, vec!["far"]);
        assert!(queue.pop().is_none());
        assert!(!queue.has_work());
    }

    #[test]
    fn test_chunks_pop_in_submission_order_within_a_bucket() {
        let mut queue = ChunkTaskPriorityQueue::new("test");
        for pos in [5, 3, 9] {
            queue.submit(pos, pos, 33);
        }
        let popped: Vec<i64> = (0..3)
            .filter_map(|_| queue.pop())
            .map(|tasks| tasks.pos)
            .collect();
        assert_eq!(popped, vec![5, 3, 9]);
    }

    #[test]
    fn test_resort_keeps_fifo_order() {
        let mut queue = ChunkTaskPriorityQueue::new("test");
        queue.submit(1, 7, 44);
        queue.submit(2, 7, 44);
        queue.submit(3, 8, 40);

        queue.resort_chunk_tasks(44, 7, 31);
        queue.submit(4, 7, 31);

        let first = queue.pop().expect("queued");
        assert_eq!(first.pos, 7);
        assert_eq!(first.tasks, vec![1, 2, 4]);
        assert_eq!(queue.top_priority(), Some(40));
    }

    #[test]
    fn test_resort_of_unknown_chunk_is_a_no_op() {
        let mut queue: ChunkTaskPriorityQueue<u8> = ChunkTaskPriorityQueue::new("test");
        queue.resort_chunk_tasks(45, 1, 31);
        assert!(!queue.has_work());
    }

    #[test]
    fn test_release_with_full_clear_drops_tasks() {
        let mut queue = ChunkTaskPriorityQueue::new("test");
        queue.submit('a', 1, 33);
        queue.submit('b', 2, 34);

        queue.release(1, false);
        assert_eq!(queue.queued_chunks(), 2);

        queue.release(1, true);
        assert_eq!(queue.queued_chunks(), 1);
        assert_eq!(queue.top_priority(), Some(34));
    }

    #[test]
    fn test_requeued_chunk_goes_to_the_back() {
        let mut queue = ChunkTaskPriorityQueue::new("test");
        queue.submit(1, 1, 33);
        queue.submit(2, 2, 33);
        queue.release(1, true);
        queue.submit(3, 1, 33);

        assert_eq!(queue.pop().map(|tasks| tasks.pos), Some(2));
        assert_eq!(queue.pop().map(|tasks| tasks.pos), Some(1));
    }
}
