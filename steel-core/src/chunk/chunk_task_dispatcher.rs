//! Feeds prioritized chunk tasks to an executor, one chunk's batch at a time.
//!
//! The throttling variant additionally caps how many chunk keys may be in execution at once;
//! a key stays in execution until it is released.
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use rustc_hash::FxHashSet;
use steel_utils::locks::SyncMutex;

use crate::chunk::{
    chunk_task_queue::{ChunkTaskPriorityQueue, TasksForChunk},
    worker_pool::{Task, TaskExecutor},
};

struct DispatcherState {
    queue: ChunkTaskPriorityQueue<Task>,
    sleeping: bool,
    executing: usize,
    chunks_in_execution: FxHashSet<i64>,
}

/// Priority dispatcher in front of an executor.
pub struct ChunkTaskDispatcher {
    executor: Arc<dyn TaskExecutor>,
    state: SyncMutex<DispatcherState>,
    max_chunks_in_execution: Option<usize>,
}

impl ChunkTaskDispatcher {
    /// Creates a dispatcher running one chunk's tasks at a time.
    #[must_use]
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Arc<Self> {
        Self::build(executor, None)
    }

    /// Creates a dispatcher that keeps at most `max_chunks_in_execution` chunk keys in execution until released.
    #[must_use]
    pub fn throttling(executor: Arc<dyn TaskExecutor>, max_chunks_in_execution: usize) -> Arc<Self> {
        Self::build(executor, Some(max_chunks_in_execution.max(1)))
    }

    fn build(executor: Arc<dyn TaskExecutor>, max_chunks_in_execution: Option<usize>) -> Arc<Self> {
        let name = format!("{}_queue", executor.name());
        Arc::new(Self {
            executor,
            state: SyncMutex::new(DispatcherState {
                queue: ChunkTaskPriorityQueue::new(name),
                sleeping: true,
                executing: 0,
                chunks_in_execution: FxHashSet::default(),
            }),
            max_chunks_in_execution,
        })
    }

    /// Queues `task` for chunk `pos` at priority `queue_level`.
    pub fn submit(self: &Arc<Self>, task: Task, pos: i64, queue_level: u8) {
        let wake = {
            let mut state = self.state.lock();
            state.queue.submit(task, pos, queue_level);
            let wake = state.sleeping;
            state.sleeping = false;
            wake
        };
        if wake {
            self.poll_task();
        }
    }

    /// Moves the queued tasks of `pos` to its new priority.
    pub fn on_level_change(&self, pos: i64, old_level: u8, new_level: u8) {
        self.state
            .lock()
            .queue
            .resort_chunk_tasks(old_level, pos, new_level);
    }

    /// Releases chunk `pos` from execution, dropping its queued tasks if `full_clear` is set, then runs `after`.
    pub fn release(self: &Arc<Self>, pos: i64, full_clear: bool, after: impl FnOnce()) {
        let wake = {
            let mut state = self.state.lock();
            state.queue.release(pos, full_clear);
            state.chunks_in_execution.remove(&pos);
            let wake = state.sleeping;
            state.sleeping = false;
            wake
        };
        if wake {
            self.poll_task();
        }
        after();
    }

    fn poll_task(self: &Arc<Self>) {
        let popped = {
            let mut state = self.state.lock();
            let at_capacity = self
                .max_chunks_in_execution
                .is_some_and(|max| state.chunks_in_execution.len() >= max);
            let popped = if at_capacity { None } else { state.queue.pop() };
            match &popped {
                None => state.sleeping = true,
                Some(tasks) => {
                    state.executing += 1;
                    if self.max_chunks_in_execution.is_some() {
                        state.chunks_in_execution.insert(tasks.pos);
                    }
                }
            }
            popped
        };
        if let Some(tasks) = popped {
            self.schedule_for_execution(tasks);
        }
    }

    fn schedule_for_execution(self: &Arc<Self>, batch: TasksForChunk<Task>) {
        if batch.tasks.is_empty() {
            self.finish_batch();
            return;
        }
        let remaining = Arc::new(AtomicUsize::new(batch.tasks.len()));
        for task in batch.tasks {
            let dispatcher = self.clone();
            let remaining = remaining.clone();
            self.executor.execute(Box::new(move || {
                task();
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    dispatcher.finish_batch();
                }
            }));
        }
    }

    fn finish_batch(self: &Arc<Self>) {
        self.state.lock().executing -= 1;
        self.poll_task();
    }

    /// Whether tasks are queued or executing.
    #[must_use]
    pub fn has_work(&self) -> bool {
        let state = self.state.lock();
        state.queue.has_work() || state.executing > 0
    }

    /// A one-line summary of the dispatcher's state.
    #[must_use]
    pub fn debug_status(&self) -> String {
        let state = self.state.lock();
        format!(
            "{}: {} chunks queued, {} batches executing, {} chunks held{}",
            state.queue.name(),
            state.queue.queued_chunks(),
            state.executing,
            state.chunks_in_execution.len(),
            if state.sleeping { ", sleeping" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::main_thread_executor::MainThreadExecutor;

    fn recorder(log: &Arc<SyncMutex<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = log.clone();
        Box::new(move || log.lock().push(name))
    }

    #[test]
    fn test_runs_most_urgent_chunk_first() {
        let executor = Arc::new(MainThreadExecutor::new());
        let dispatcher = ChunkTaskDispatcher::new(executor.clone());
        let log = Arc::new(SyncMutex::new(Vec::new()));

        // The first submission wakes the dispatcher and is handed out right away.
        dispatcher.submit(recorder(&log, "first"), 1, 40);
        dispatcher.submit(recorder(&log, "far"), 2, 44);
        dispatcher.submit(recorder(&log, "near"), 3, 31);
        assert!(dispatcher.has_work());

        executor.run_pending();
        assert_eq!(*log.lock(), vec!["first", "near", "far"]);
        assert!(!dispatcher.has_work());
    }

    #[test]
    fn test_level_change_reorders_queued_chunks() {
        let executor = Arc::new(MainThreadExecutor::new());
        let dispatcher = ChunkTaskDispatcher::new(executor.clone());
        let log = Arc::new(SyncMutex::new(Vec::new()));

        dispatcher.submit(recorder(&log, "blocker"), 9, 33);
        dispatcher.submit(recorder(&log, "a"), 1, 40);
        dispatcher.submit(recorder(&log, "b"), 2, 38);
        dispatcher.on_level_change(1, 40, 32);

        executor.run_pending();
        assert_eq!(*log.lock(), vec!["blocker", "a", "b"]);
    }

    #[test]
    fn test_throttle_holds_chunks_until_released() {
        let executor = Arc::new(MainThreadExecutor::new());
        let dispatcher = ChunkTaskDispatcher::throttling(executor.clone(), 1);
        let log = Arc::new(SyncMutex::new(Vec::new()));

        dispatcher.submit(recorder(&log, "a"), 1, 31);
        dispatcher.submit(recorder(&log, "b"), 2, 31);
        executor.run_pending();
        assert_eq!(*log.lock(), vec!["a"]);

        dispatcher.release(1, false, || {});
        executor.run_pending();
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_full_clear_release_drops_queued_tasks() {
        let executor = Arc::new(MainThreadExecutor::new());
        let dispatcher = ChunkTaskDispatcher::throttling(executor.clone(), 1);
        let log = Arc::new(SyncMutex::new(Vec::new()));

        dispatcher.submit(recorder(&log, "a"), 1, 31);
        dispatcher.submit(recorder(&log, "b"), 2, 31);
        executor.run_pending();

        let released = Arc::new(SyncMutex::new(false));
        let flag = released.clone();
        dispatcher.release(2, true, move || *flag.lock() = true);
        dispatcher.release(1, false, || {});
        executor.run_pending();

        assert!(*released.lock());
        assert_eq!(*log.lock(), vec!["a"]);
        assert!(dispatcher.debug_status().contains("0 chunks queued"));
    }
}
