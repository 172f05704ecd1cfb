// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared holding area for staged items.
//!
//! One mutex guards the whole collection. Producers hold it only for a
//! `Vec::push`; the flusher holds it for one pass over the buffered items.
//! A poisoned lock is recovered rather than reported, since the data inside
//! is a plain vector that no panic can leave half-updated.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::queue_item::QueueItem;

#[derive(Debug)]
pub struct Buffer<P> {
    items: Mutex<Vec<QueueItem<P>>>,
}

impl<P> Default for Buffer<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Buffer<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueItem<P>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, item: QueueItem<P>) {
        self.lock().push(item);
    }

    /// Removes and returns every item matching `predicate`.
    ///
    /// The selection and removal happen under one lock, so a concurrent
    /// `append` lands either before (and may be returned) or after (and stays
    /// buffered). Returned items keep their relative insertion order, as do
    /// the items left behind.
    pub fn extract<F>(&self, predicate: F) -> Vec<QueueItem<P>>
    where
        F: Fn(&QueueItem<P>) -> bool,
    {
        let mut items = self.lock();
        let (matched, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut *items).into_iter().partition(|item| predicate(item));
        *items = kept;
        matched
    }

    pub fn extract_all(&self) -> Vec<QueueItem<P>> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
