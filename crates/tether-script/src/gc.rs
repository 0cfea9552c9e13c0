//! Deferred userdata finalization
//!
//! Userdata with a metatable is not finalized when its last reference drops.
//! The payload and metatable are parked in the owning state's queue and the
//! `__gc` metamethod runs on the next `collect_garbage` call, against a fresh
//! userdata that wraps the same payload.

use std::any::Any;
use std::cell::RefCell;

use crate::value::TableRef;

pub(crate) struct PendingFinalizer {
    pub(crate) payload: Box<dyn Any>,
    pub(crate) metatable: TableRef,
}

#[derive(Default)]
pub(crate) struct FinalizerQueue {
    pending: RefCell<Vec<PendingFinalizer>>,
}

impl FinalizerQueue {
    pub(crate) fn push(&self, item: PendingFinalizer) {
        self.pending.borrow_mut().push(item);
    }

    pub(crate) fn drain(&self) -> Vec<PendingFinalizer> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }
}

/// Outcome of a collection cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Finalizers that ran to completion
    pub finalized: usize,
    /// Finalizers that raised an error
    pub failed: usize,
}
