//! Per-session mutual exclusion shared by every component

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-session async mutexes.
///
/// Every mutating operation on a session's record, progress, state or error
/// ledger holds the session's guard. Different sessions never contend.
#[derive(Debug, Clone, Default)]
pub struct SessionLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard for a session, creating its mutex on first use
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the mutex of a deleted session.
    ///
    /// A mutex that is held or awaited stays registered.
    pub fn forget(&self, session_id: &str) {
        self.locks
            .remove_if(session_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of sessions with a registered mutex
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no session has a registered mutex
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let locks = SessionLocks::new();
        let guard = locks.lock("s1").await;

        let contender = locks.clone();
        let attempt = tokio::time::timeout(Duration::from_millis(50), async move {
            contender.lock("s1").await;
        })
        .await;
        assert!(attempt.is_err());

        drop(guard);
        let _again = locks.lock("s1").await;
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_contend() {
        let locks = SessionLocks::new();
        let a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);

        drop(a);
        locks.forget("a");
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_forget_keeps_held_mutex() {
        let locks = SessionLocks::new();
        let guard = locks.lock("s1").await;

        locks.forget("s1");
        assert_eq!(locks.len(), 1);
        let attempt = tokio::time::timeout(Duration::from_millis(50), locks.lock("s1")).await;
        assert!(attempt.is_err());

        drop(guard);
        locks.forget("s1");
        assert!(locks.is_empty());
    }
}
