//! Lock aliases so the rest of the workspace does not depend on a concrete lock crate.

/// A blocking mutex for short critical sections.
pub type SyncMutex<T> = parking_lot::Mutex<T>;
/// A blocking reader-writer lock.
pub type SyncRwLock<T> = parking_lot::RwLock<T>;
