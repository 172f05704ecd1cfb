// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Registry of event listeners, keyed by event type.
//!
//! Built once at startup and then shared read-only with whatever owns the
//! event source, so firing an event takes no lock.

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::trace;

use crate::errors::RegistryError;

/// Receives events of one type.
pub trait Listener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

struct Entry {
    event_type: &'static str,
    // An `Arc<dyn Listener<E>>` for the `E` named by `event_type`.
    listener: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: HashMap<TypeId, Entry>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: 'static>(
        &mut self,
        listener: Arc<dyn Listener<E>>,
    ) -> Result<(), RegistryError> {
        match self.entries.entry(TypeId::of::<E>()) {
            hashbrown::hash_map::Entry::Occupied(_) => {
                Err(RegistryError::DuplicateListener(type_name::<E>()))
            }
            hashbrown::hash_map::Entry::Vacant(slot) => {
                slot.insert(Entry {
                    event_type: type_name::<E>(),
                    listener: Box::new(listener),
                });
                Ok(())
            }
        }
    }

    fn get<E: 'static>(&self) -> Option<&Arc<dyn Listener<E>>> {
        self.entries
            .get(&TypeId::of::<E>())
            .and_then(|entry| entry.listener.downcast_ref::<Arc<dyn Listener<E>>>())
    }

    /// Delivers `event` to its listener. Returns `false` if none is registered.
    pub fn fire<E: 'static>(&self, event: &E) -> bool {
        match self.get::<E>() {
            Some(listener) => {
                listener.on_event(event);
                true
            }
            None => {
                trace!(event_type = type_name::<E>(), "no listener registered");
                false
            }
        }
    }

    pub fn contains<E: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<E>())
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.event_type).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
