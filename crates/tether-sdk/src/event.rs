//! Event storage for host classes

use parking_lot::RwLock;
use tether_script::ScriptState;

use crate::error::{HostError, HostResult};
use crate::value::{Delegate, HostObject, HostValue};

/// Subscriber list of one event
#[derive(Default)]
pub struct HostEvent {
    handlers: RwLock<Vec<HostObject>>,
}

impl HostEvent {
    /// Create an event without subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a delegate instance
    pub fn add(&self, handler: HostObject) {
        self.handlers.write().push(handler);
    }

    /// Unsubscribe the most recent subscription of `handler`
    pub fn remove(&self, handler: &HostObject) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.iter().rposition(|h| h.ptr_eq(handler)) {
            Some(pos) => {
                handlers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// True when nobody listens
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Call every subscriber in subscription order; stops at the first failure
    pub fn raise(&self, state: &mut ScriptState, args: Vec<HostValue>) -> HostResult<()> {
        let snapshot = self.handlers.read().clone();
        for handler in snapshot {
            let delegate = handler.downcast::<Delegate>().ok_or_else(|| {
                HostError::mismatch("delegate", handler.ty().full_name())
            })?;
            delegate.invoke(state, args.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TypeBuilder;
    use crate::members::MethodInfo;
    use crate::types;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_raise_reaches_all_handlers_until_removed() {
        let handler_ty = TypeBuilder::delegate(
            "E.Handler",
            MethodInfo::new("Invoke", &types::void())
                .param(crate::members::ParamInfo::new("n", &types::i64())),
        )
        .build();
        let total = Arc::new(AtomicI64::new(0));
        let sink = total.clone();
        let h = HostObject::new(
            Delegate::new(move |inv| {
                sink.fetch_add(inv.arg_i64(0)?, Ordering::SeqCst);
                Ok(HostValue::Null)
            }),
            &handler_ty,
        );
        let ev = HostEvent::new();
        ev.add(h.clone());
        ev.add(h.clone());
        let mut state = ScriptState::new();
        ev.raise(&mut state, vec![HostValue::I64(5)]).unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 10);
        assert!(ev.remove(&h));
        assert_eq!(ev.len(), 1);
    }
}
