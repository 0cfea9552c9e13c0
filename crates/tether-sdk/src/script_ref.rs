//! Host-side handles to pinned script values
//!
//! A `ScriptRef` names a registry slot of one interpreter instance. Host code
//! may keep it on any thread; dropping the last clone does not touch the
//! interpreter directly but queues the slot, and the owning engine unpins
//! queued slots the next time it runs on that interpreter.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tether_script::{RegistryKey, ScriptState, StateId};

use crate::error::{HostError, HostResult};

/// Which kind of script value a handle pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptRefKind {
    /// A table
    Table,
    /// A function
    Function,
    /// Userdata
    UserData,
    /// A coroutine
    Thread,
}

/// Registry slots whose last host handle was dropped
#[derive(Debug)]
pub struct ReleaseQueue {
    state: StateId,
    pending: Mutex<Vec<RegistryKey>>,
}

impl ReleaseQueue {
    /// Create the queue for one interpreter instance
    pub fn new(state: StateId) -> Arc<Self> {
        Arc::new(Self {
            state,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Interpreter the queued keys belong to
    pub fn state(&self) -> StateId {
        self.state
    }

    /// Unpin every queued slot
    pub fn drain_into(&self, state: &mut ScriptState) -> usize {
        let keys = std::mem::take(&mut *self.pending.lock());
        let n = keys.len();
        for key in keys {
            state.release_reference(key);
        }
        n
    }

    /// Number of slots waiting to be unpinned
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

struct Pinned {
    key: RegistryKey,
    kind: ScriptRefKind,
    queue: Arc<ReleaseQueue>,
}

impl Drop for Pinned {
    fn drop(&mut self) {
        self.queue.pending.lock().push(self.key);
    }
}

/// Handle to a pinned script table, function, userdata or thread
#[derive(Clone)]
pub struct ScriptRef(Arc<Pinned>);

impl ScriptRef {
    /// Wrap a registry key obtained from `ScriptState::reference`
    pub fn new(key: RegistryKey, kind: ScriptRefKind, queue: &Arc<ReleaseQueue>) -> Self {
        ScriptRef(Arc::new(Pinned {
            key,
            kind,
            queue: queue.clone(),
        }))
    }

    /// Pinned value kind
    pub fn kind(&self) -> ScriptRefKind {
        self.0.kind
    }

    /// Registry slot
    pub fn key(&self) -> RegistryKey {
        self.0.key
    }

    /// Owning interpreter
    pub fn state_id(&self) -> StateId {
        self.0.queue.state
    }

    /// Same pinned slot
    pub fn same_slot(&self, other: &ScriptRef) -> bool {
        self.state_id() == other.state_id() && self.key() == other.key()
    }

    /// Push the pinned value onto `state`
    pub fn push(&self, state: &mut ScriptState) -> HostResult<()> {
        if state.id() != self.state_id() {
            return Err(HostError::ArgumentError(format!(
                "script reference belongs to {}, not {}",
                self.state_id(),
                state.id()
            )));
        }
        state.push_reference(self.0.key);
        Ok(())
    }
}

impl fmt::Debug for ScriptRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScriptRef({:?}, {}, slot {})",
            self.0.kind,
            self.state_id(),
            self.0.key.as_usize()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_drop_queues_release() {
        let mut state = ScriptState::new();
        let queue = ReleaseQueue::new(state.id());
        state.new_table();
        let key = state.reference();
        let r = ScriptRef::new(key, ScriptRefKind::Table, &queue);
        let copy = r.clone();
        drop(r);
        assert!(queue.is_empty());
        drop(copy);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_into(&mut state), 1);
        assert_eq!(state.reference_count(), 0);
    }

    #[test]
    fn test_push_rejects_foreign_state() {
        let mut state = ScriptState::new();
        let mut other = ScriptState::new();
        let queue = ReleaseQueue::new(state.id());
        state.push_integer(1);
        let r = ScriptRef::new(state.reference(), ScriptRefKind::Table, &queue);
        assert!(r.push(&mut other).is_err());
        r.push(&mut state).unwrap();
        assert_eq!(state.to_integer(-1), Some(1));
    }
}
