//! Executors chunk work runs on.
use std::{any::Any, sync::Arc};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::chunk::main_thread_executor::MainThreadExecutor;

/// A unit of work handed to an executor.
pub type Task = Box<dyn FnOnce() + Send>;

/// Something that runs tasks, eventually.
pub trait TaskExecutor: Send + Sync {
    /// Schedules `task`.
    fn execute(&self, task: Task);

    /// The name of the executor, used in debug output.
    fn name(&self) -> &str;
}

/// The bounded pool generation, lighting and I/O callbacks run on.
pub struct WorkerPool {
    name: String,
    pool: ThreadPool,
}

impl WorkerPool {
    /// Builds a pool of `threads` workers. Panics on a worker are parked on `main_thread` as fatal errors.
    pub fn new(
        name: &str,
        threads: usize,
        main_thread: &Arc<MainThreadExecutor>,
    ) -> Result<Self, ThreadPoolBuildError> {
        let fatal = main_thread.clone();
        let prefix = name.to_owned();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |index| format!("{prefix}-{index}"))
            .panic_handler(move |payload| fatal.record_fatal(panic_message(&*payload)))
            .build()?;
        log::debug!("Started worker pool {name} with {} threads", pool.current_num_threads());
        Ok(Self {
            name: name.to_owned(),
            pool,
        })
    }

    /// The number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, task: Task) {
        self.pool.spawn(task);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Extracts the message of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_worker_panic_is_parked_as_fatal() {
        let main_thread = Arc::new(MainThreadExecutor::new());
        let pool = WorkerPool::new("test-worker", 1, &main_thread).expect("pool builds");
        pool.execute(Box::new(|| panic!("broken invariant")));

        let mut fatal = None;
        for _ in 0..200 {
            fatal = main_thread.take_fatal();
            if fatal.is_some() {
                break;
            }
            main_thread.park_timeout(Duration::from_millis(10));
        }
        assert_eq!(fatal.as_deref(), Some("broken invariant"));
    }

    #[test]
    fn test_panic_message_of_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(panic_message(&*payload), "worker panicked");
    }
}
