//! Process-wide concurrency budget for ingest units

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct Budget {
    outstanding: AtomicUsize,
    limit: usize,
}

impl Budget {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            outstanding: AtomicUsize::new(0),
            limit,
        })
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Take a slot for new work, or `None` when the limit is reached
    pub(crate) fn try_reserve(self: &Arc<Self>) -> Option<BudgetSlot> {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.limit).then_some(current + 1)
            })
            .ok()
            .map(|_| BudgetSlot {
                budget: Arc::clone(self),
            })
    }

    /// Take a slot regardless of the limit; used for retries and recovery
    pub(crate) fn force_reserve(self: &Arc<Self>) -> BudgetSlot {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        BudgetSlot {
            budget: Arc::clone(self),
        }
    }
}

/// Released when dropped
#[derive(Debug)]
pub(crate) struct BudgetSlot {
    budget: Arc<Budget>,
}

impl Drop for BudgetSlot {
    fn drop(&mut self) {
        self.budget.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
