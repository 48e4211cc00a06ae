//! Observer registration for book mutations.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::book::ProductOrderBook;

/// Callback fired after every snapshot or diff batch, with the book in its post-mutation state.
pub type BookCallback = Arc<dyn Fn(&ProductOrderBook) + Send + Sync>;

/// Opaque handle returned when a callback is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

impl CallbackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

#[derive(Default)]
pub(crate) struct CallbackRegistry {
    callbacks: DashMap<CallbackId, BookCallback>,
}

impl CallbackRegistry {
    pub(crate) fn register(&self, callback: BookCallback) -> CallbackId {
        let id = CallbackId::new();
        self.callbacks.insert(id, callback);
        id
    }

    pub(crate) fn remove(&self, id: CallbackId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Copies the current callbacks out so none of the map's shards stay locked while they run.
    pub(crate) fn current(&self) -> Vec<BookCallback> {
        self.callbacks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
