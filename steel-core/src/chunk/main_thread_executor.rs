//! The mailbox of the thread that owns the chunk tables.
//!
//! Work that has to touch main-thread state is posted here from any thread and drained by the
//! main thread between ticks or while it blocks on a chunk. Worker panics land in the fatal slot
//! and are re-raised by the main thread the next time it looks.
use std::{thread, time::Duration};

use crossbeam::{
    queue::SegQueue,
    sync::{Parker, Unparker},
};
use steel_utils::locks::SyncMutex;

use crate::chunk::worker_pool::{Task, TaskExecutor};

/// Queue of tasks for the main thread.
pub struct MainThreadExecutor {
    tasks: SegQueue<Task>,
    parker: SyncMutex<Parker>,
    unparker: Unparker,
    fatal: SyncMutex<Option<String>>,
}

impl MainThreadExecutor {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        Self {
            tasks: SegQueue::new(),
            parker: SyncMutex::new(parker),
            unparker,
            fatal: SyncMutex::new(None),
        }
    }

    /// Runs one queued task. Returns false if there was none.
    pub fn poll_task(&self) -> bool {
        match self.tasks.pop() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs every queued task, including the ones queued while running. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.poll_task() {
            ran += 1;
        }
        ran
    }

    /// The number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wakes the main thread if it is parked.
    pub fn wake(&self) {
        self.unparker.unpark();
    }

    /// Parks the calling thread until woken or `timeout` passes.
    pub fn park_timeout(&self, timeout: Duration) {
        self.parker.lock().park_timeout(timeout);
    }

    /// Calls `poll` until `done` returns true, parking whenever `poll` found nothing to do.
    ///
    /// `poll` usually drains this mailbox, see [`MainThreadExecutor::poll_task`]. Returns the
    /// fatal error message if one was parked in the meantime.
    pub fn managed_block(
        &self,
        mut done: impl FnMut() -> bool,
        mut poll: impl FnMut() -> bool,
    ) -> Result<(), String> {
        loop {
            if let Some(fatal) = self.take_fatal() {
                return Err(fatal);
            }
            if done() {
                return Ok(());
            }
            if !poll() {
                self.park_timeout(Duration::from_millis(5));
            }
        }
    }

    /// Parks a fatal error for the main thread. Only the first one is kept.
    pub fn record_fatal(&self, message: String) {
        log::error!("Fatal chunk system error on {:?}: {message}", thread::current().name());
        self.fatal.lock().get_or_insert(message);
        self.wake();
    }

    /// Takes the parked fatal error, if any.
    pub fn take_fatal(&self) -> Option<String> {
        self.fatal.lock().take()
    }
}

impl Default for MainThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for MainThreadExecutor {
    fn execute(&self, task: Task) {
        self.tasks.push(task);
        self.wake();
    }

    fn name(&self) -> &str {
        "main"
    }
}
