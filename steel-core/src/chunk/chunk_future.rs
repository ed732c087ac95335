//! A completable future used to hand chunk results between the main thread, the worker pool and I/O tasks.
//!
//! A `Completable` is completed exactly once. Listeners registered before completion run on the
//! completing thread, listeners registered afterwards run immediately on the registering thread.
use std::{
    fmt::{self, Debug},
    future::Future,
    mem,
    pin::Pin,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll, Waker},
};

use steel_utils::locks::SyncMutex;

use crate::chunk::chunk_result::ChunkResult;

type Listener<T> = Box<dyn FnOnce(&T) + Send>;

/// A shared future resolving to a chunk result.
pub type ChunkFuture<T> = Arc<Completable<ChunkResult<T>>>;

/// A value that will be provided later by some other party.
pub struct Completable<T> {
    value: OnceLock<T>,
    listeners: SyncMutex<Vec<Listener<T>>>,
}

impl<T: Send + Sync + 'static> Completable<T> {
    /// Creates a pending future.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            value: OnceLock::new(),
            listeners: SyncMutex::new(Vec::new()),
        })
    }

    /// Creates a future that is already completed with `value`.
    #[must_use]
    pub fn completed(value: T) -> Arc<Self> {
        Arc::new(Self {
            value: OnceLock::from(value),
            listeners: SyncMutex::new(Vec::new()),
        })
    }

    /// Completes the future. Returns false if it was already completed, in which case `value` is dropped.
    pub fn complete(&self, value: T) -> bool {
        let listeners = {
            let mut listeners = self.listeners.lock();
            if self.value.set(value).is_err() {
                return false;
            }
            mem::take(&mut *listeners)
        };

        if let Some(value) = self.value.get() {
            for listener in listeners {
                listener(value);
            }
        }
        true
    }

    /// Whether the future has been completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.value.get().is_some()
    }

    /// The value, if the future has been completed.
    #[must_use]
    pub fn get_now(&self) -> Option<&T> {
        self.value.get()
    }

    /// Runs `listener` with the value once the future completes.
    pub fn on_complete(&self, listener: impl FnOnce(&T) + Send + 'static) {
        {
            let mut listeners = self.listeners.lock();
            if self.value.get().is_none() {
                listeners.push(Box::new(listener));
                return;
            }
        }
        if let Some(value) = self.value.get() {
            listener(value);
        }
    }

    /// Creates a future completed with `f` applied to this future's value.
    #[must_use]
    pub fn map<U: Send + Sync + 'static>(
        &self,
        f: impl FnOnce(&T) -> U + Send + 'static,
    ) -> Arc<Completable<U>> {
        let mapped = Completable::new();
        let result = mapped.clone();
        self.on_complete(move |value| {
            result.complete(f(value));
        });
        mapped
    }

    /// A std future resolving to a clone of the value.
    #[must_use]
    pub fn wait(self: &Arc<Self>) -> Wait<T>
    where
        T: Clone,
    {
        Wait {
            future: self.clone(),
            waker: None,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Completable<T> {
    /// Creates a future completed once every future in `futures` is, holding their values in order.
    #[must_use]
    pub fn all(futures: Vec<Arc<Self>>) -> Arc<Completable<Vec<T>>> {
        let combined = Completable::new();
        if futures.is_empty() {
            combined.complete(Vec::new());
            return combined;
        }

        let remaining = Arc::new(AtomicUsize::new(futures.len()));
        let inputs: Arc<[Arc<Self>]> = futures.into();
        for future in inputs.iter() {
            let remaining = remaining.clone();
            let inputs = inputs.clone();
            let combined = combined.clone();
            future.on_complete(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let values = inputs
                        .iter()
                        .filter_map(|input| input.get_now().cloned())
                        .collect();
                    combined.complete(values);
                }
            });
        }
        combined
    }
}

impl Completable<()> {
    /// Creates a future completed once both inputs are.
    #[must_use]
    pub fn both(first: &Arc<Self>, second: &Arc<Self>) -> Arc<Self> {
        let combined = Completable::new();
        let result = combined.clone();
        let second = second.clone();
        first.on_complete(move |()| {
            second.on_complete(move |()| {
                result.complete(());
            });
        });
        combined
    }
}

impl<T: Debug> Debug for Completable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.get() {
            Some(value) => write!(f, "Completable[completed: {value:?}]"),
            None => f.write_str("Completable[not completed]"),
        }
    }
}

/// A std future over a [`Completable`], created by [`Completable::wait`].
pub struct Wait<T> {
    future: Arc<Completable<T>>,
    waker: Option<Arc<SyncMutex<Waker>>>,
}

impl<T: Clone + Send + Sync + 'static> Future for Wait<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(value) = self.future.get_now() {
            return Poll::Ready(value.clone());
        }

        match &self.waker {
            Some(slot) => slot.lock().clone_from(cx.waker()),
            None => {
                let slot = Arc::new(SyncMutex::new(cx.waker().clone()));
                let wake = slot.clone();
                self.waker = Some(slot);
                self.future.on_complete(move |_| wake.lock().wake_by_ref());
            }
        }

        match self.future.get_now() {
            Some(value) => Poll::Ready(value.clone()),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_complete_only_once() {
        let future = Completable::new();
        assert!(future.complete(1));
        assert!(!future.complete(2));
        assert_eq!(future.get_now(), Some(&1));
    }

    #[test]
    fn test_listeners_run_before_and_after_completion() {
        let future = Completable::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        future.on_complete(move |value: &usize| {
            counter.fetch_add(*value, Ordering::Relaxed);
        });
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        future.complete(5);
        let counter = calls.clone();
        future.on_complete(move |value| {
            counter.fetch_add(*value, Ordering::Relaxed);
        });
        assert_eq!(calls.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_map_and_all() {
        let a = Completable::new();
        let b = Completable::new();
        let sum = Completable::all(vec![a.clone(), b.clone()]).map(|values| values.iter().sum::<i32>());

        a.complete(2);
        assert!(!sum.is_done());
        b.complete(3);
        assert_eq!(sum.get_now(), Some(&5));
    }

    #[test]
    fn test_all_of_nothing_is_done() {
        let all = Completable::<i32>::all(Vec::new());
        assert_eq!(all.get_now(), Some(&Vec::new()));
    }

    #[test]
    fn test_both_waits_for_both_sides() {
        let first = Completable::new();
        let second = Completable::new();
        let both = Completable::both(&first, &second);

        second.complete(());
        assert!(!both.is_done());
        first.complete(());
        assert!(both.is_done());
    }

    #[test]
    fn test_wait_from_another_thread() {
        let future = Completable::new();
        let completer = future.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete("done");
        });

        assert_eq!(futures::executor::block_on(future.wait()), "done");
        handle.join().expect("completer thread panicked");
    }
}
