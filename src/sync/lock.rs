use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Process-wide map from lock name to mutex, created lazily on first use.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    /// Returns the mutex for `name`, creating it atomically on first use.
    /// Blank names map to no lock at all.
    #[must_use]
    pub fn lock_for(&self, name: &str) -> Option<Arc<AsyncMutex<()>>> {
        if name.trim().is_empty() {
            return None;
        }
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(name.to_owned()).or_default();
        Some(Arc::clone(lock))
    }

    /// Waits for the named lock. The returned guard releases on drop, so a
    /// user that unwinds out of the guarded subtree can never leak it.
    pub async fn acquire(&self, name: &str) -> Option<NamedLockGuard> {
        let lock = self.lock_for(name)?;
        let guard = lock.lock_owned().await;
        trace!("Acquired critical section lock '{}'", name);
        Some(NamedLockGuard {
            name: name.to_owned(),
            _guard: guard,
        })
    }

    /// Forgets every lock. Users still holding a guard keep their old mutex;
    /// later acquisitions of the same name get a fresh one.
    pub fn reset(&self) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held critical section.
#[derive(Debug)]
pub struct NamedLockGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl NamedLockGuard {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedLockGuard {
    fn drop(&mut self) {
        trace!("Released critical section lock '{}'", self.name);
    }
}
