//! Per-loan mutual exclusion
//!
//! Operations on the same loan id are linearised; different loans never
//! contend. Entries are dropped once nobody holds or waits on them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guard held for the duration of one read-check-write sequence
pub struct LoanGuard {
    loan_id: u64,
    locks: Arc<DashMap<u64, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LoanGuard {
    pub fn loan_id(&self) -> u64 {
        self.loan_id
    }
}

impl Drop for LoanGuard {
    fn drop(&mut self) {
        // Release the mutex before deciding whether the entry can go.
        self.guard.take();
        self.locks
            .remove_if(&self.loan_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Registry of per-loan locks
#[derive(Clone, Default)]
pub struct LoanLocks {
    locks: Arc<DashMap<u64, Arc<Mutex<()>>>>,
}

impl LoanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `loan_id`
    pub async fn acquire(&self, loan_id: u64) -> LoanGuard {
        let lock = self
            .locks
            .entry(loan_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;

        LoanGuard {
            loan_id,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of loans currently locked or awaited
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}
