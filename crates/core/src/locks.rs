use crate::models::DocumentId;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = HashMap<DocumentId, Arc<AsyncMutex<()>>>;

/// In-process table of per-document async locks. Entries live only while someone
/// holds or waits for them.
#[derive(Debug, Default)]
pub struct DocumentLocks {
    table: Arc<Mutex<LockTable>>,
}

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DocumentLocks {
    pub async fn acquire(&self, document_id: DocumentId) -> DocumentLock {
        let lock = Arc::clone(lock_table(&self.table).entry(document_id).or_default());
        let guard = lock.lock_owned().await;

        DocumentLock {
            document_id,
            session: None,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Documents currently locked or waited on.
    pub fn tracked(&self) -> usize {
        lock_table(&self.table).len()
    }
}

/// Exclusive right to write one document's chunk set. Released on drop.
pub struct DocumentLock {
    document_id: DocumentId,
    session: Option<Box<dyn Any + Send + Sync>>,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Mutex<LockTable>>,
}

impl DocumentLock {
    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Attaches a backend resource (such as the connection holding a database lock)
    /// that must outlive the in-process lock and is dropped before it.
    pub fn with_session(mut self, session: impl Any + Send + Sync) -> Self {
        self.session = Some(Box::new(session));
        self
    }
}

impl std::fmt::Debug for DocumentLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentLock")
            .field("document_id", &self.document_id)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        drop(self.session.take());
        drop(self.guard.take());

        let mut table = lock_table(&self.table);
        // Waiters hold their own clone of the entry.
        if table
            .get(&self.document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.document_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn released_locks_leave_no_entries() {
        let locks = DocumentLocks::default();
        for document_id in 1..=20 {
            let lock = locks.acquire(document_id).await;
            assert_eq!(lock.document_id(), document_id);
        }
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn waiter_keeps_the_entry_until_it_is_done() {
        let locks = DocumentLocks::default();
        let first = locks.acquire(3).await;
        let shared = &locks;

        let (second, ()) = tokio::join!(locks.acquire(3), async move {
            tokio::task::yield_now().await;
            assert_eq!(shared.tracked(), 1);
            drop(first);
        });

        assert_eq!(locks.tracked(), 1);
        drop(second);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn session_is_released_with_the_lock() {
        struct Session(Arc<AtomicBool>);
        impl Drop for Session {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let locks = DocumentLocks::default();
        let lock = locks
            .acquire(9)
            .await
            .with_session(Session(Arc::clone(&released)));

        assert!(!released.load(Ordering::SeqCst));
        drop(lock);
        assert!(released.load(Ordering::SeqCst));
    }
}
