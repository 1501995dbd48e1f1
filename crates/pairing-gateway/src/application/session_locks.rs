//! Per-directory mutual exclusion.
//!
//! Two requests for the same phone would otherwise drive two protocol clients
//! against the same credential files at once.  [`SessionLocks`] hands out one
//! [`SessionLease`] per session directory; the next request for that
//! directory waits until every clone of the lease is dropped.  Requests for
//! different directories never wait on each other.
//!
//! A lease is cloned so that both the request (while it builds the archive)
//! and the session's teardown task (until the client has ended and its
//! pending credential writes are flushed) keep the directory locked.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Exclusive use of one session directory.  Released when the last clone is
/// dropped.
#[derive(Debug, Clone)]
pub struct SessionLease {
    _guard: Arc<OwnedMutexGuard<()>>,
}

/// Shared registry of session-directory locks.  Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive use of `dir`.
    pub async fn acquire(&self, dir: &Path) -> SessionLease {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries referenced only by the map are idle.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(dir.to_path_buf()).or_default())
        };
        SessionLease {
            _guard: Arc::new(lock.lock_owned().await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_dir_is_serialised() {
        // Arrange
        let locks = SessionLocks::new();
        let dir = PathBuf::from("/sessions/6281");
        let first = locks.acquire(&dir).await;

        // Act: a second acquire must not complete while `first` is held.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&dir)).await;

        // Assert
        assert!(blocked.is_err(), "second acquire should wait");
        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&dir)).await;
        assert!(second.is_ok(), "acquire should succeed once released");
    }

    #[tokio::test]
    async fn test_lease_is_held_until_last_clone_drops() {
        // Arrange
        let locks = SessionLocks::new();
        let dir = PathBuf::from("/sessions/6281");
        let lease = locks.acquire(&dir).await;
        let clone = lease.clone();

        // Act
        drop(lease);
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&dir)).await;

        // Assert
        assert!(blocked.is_err(), "a clone still holds the directory");
        drop(clone);
        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&dir)).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_dirs_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire(Path::new("/sessions/6281")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(Path::new("/sessions/6282")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = SessionLocks::new();
        {
            let _lease = locks.acquire(Path::new("/sessions/a")).await;
        }

        // Acquiring another directory prunes the idle entry from the map.
        let _lease = locks.acquire(Path::new("/sessions/b")).await;
        let map = locks.inner.lock().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(Path::new("/sessions/b")));
    }
}
