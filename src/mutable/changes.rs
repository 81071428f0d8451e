use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Attributes of one loaded row that need a write-back.
///
/// Tracked JSON values hold a `Weak` pointer to the change set of every row
/// that owns them and flag their attribute key here whenever they are mutated.
#[derive(Debug, Default)]
pub struct ChangeSet {
    modified: Mutex<BTreeSet<&'static str>>,
    notifications: AtomicU64,
}

impl ChangeSet {
    pub fn flag_modified(&self, key: &'static str) {
        lock(&self.modified).insert(key);
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_dirty(&self) -> bool {
        !lock(&self.modified).is_empty()
    }

    pub fn is_modified(&self, key: &str) -> bool {
        lock(&self.modified).contains(key)
    }

    /// Total number of change notifications received since creation.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Drain the modified keys, typically right after a flush.
    pub fn take(&self) -> BTreeSet<&'static str> {
        std::mem::take(&mut *lock(&self.modified))
    }
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
