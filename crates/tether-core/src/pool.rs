//! Translator lookup by interpreter identity
//!
//! Host code threads its `Bridge` (and so its `Translator`) explicitly.
//! The pool only serves the interpreter's raw callbacks, which receive
//! nothing but a `ScriptState` and must recover the owning context from
//! its id. Bridges on different threads insert and remove concurrently.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tether_script::StateId;

use crate::translator::Translator;

/// Concurrent map from interpreter id to its translator
#[derive(Default)]
pub struct TranslatorPool {
    map: DashMap<StateId, Arc<Translator>>,
}

static POOL: Lazy<TranslatorPool> = Lazy::new(TranslatorPool::default);

/// The process-wide pool
pub fn pool() -> &'static TranslatorPool {
    &POOL
}

impl TranslatorPool {
    /// Register a translator under its interpreter id
    pub fn add(&self, translator: Arc<Translator>) {
        self.map.insert(translator.state_id(), translator);
    }

    /// Translator of the interpreter `id`
    pub fn find(&self, id: StateId) -> Option<Arc<Translator>> {
        self.map.get(&id).map(|t| t.clone())
    }

    /// Forget the interpreter `id`
    pub fn remove(&self, id: StateId) -> Option<Arc<Translator>> {
        self.map.remove(&id).map(|(_, t)| t)
    }

    /// Number of registered interpreters
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
