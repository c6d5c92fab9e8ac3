//! Typed session scope carried by a backend.
//!
//! Values are keyed by their Rust type, so every binding has exactly one
//! static type. Adapters wrap cross-cutting state (pagination cursors, trace
//! identifiers) in their own newtypes to keep keys distinct.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Immutable snapshot of typed bindings.
///
/// Writers derive a new snapshot with [`SessionContext::with`]; readers
/// holding an older snapshot keep seeing the values they started with.
#[derive(Clone, Default)]
pub struct SessionContext {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this context with `value` bound to its type.
    pub fn with<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut next = self.clone();
        next.insert(value);
        next
    }

    /// Binds `value` in place, replacing any earlier value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Debug for SessionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("bindings", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::SessionContext;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TraceId(String);

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Cursor(u64);

    #[test]
    fn with_derives_new_snapshot() {
        let base = SessionContext::new();
        let derived = base.with(TraceId("t-1".to_string()));

        assert!(base.get::<TraceId>().is_none());
        assert_eq!(derived.get::<TraceId>(), Some(&TraceId("t-1".to_string())));
    }

    #[test]
    fn bindings_are_keyed_by_type() {
        let context = SessionContext::new()
            .with(TraceId("t-1".to_string()))
            .with(Cursor(10))
            .with(Cursor(20));

        assert_eq!(context.len(), 2);
        assert_eq!(context.get::<Cursor>(), Some(&Cursor(20)));
        assert!(context.contains::<TraceId>());
        assert!(!context.contains::<String>());
    }
}
