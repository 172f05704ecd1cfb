// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::{Duration, SystemTime};

use crate::clock::Clock;
use crate::errors::TransformError;

/// Routing data and payload produced by an event transform.
///
/// An `ItemParts` has no timestamp: the creation time is stamped by the
/// [`QueueItem`] constructor from the ingest gate's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemParts<P> {
    pub account_id: String,
    pub namespace: String,
    pub payload: P,
}

impl<P> ItemParts<P> {
    pub fn new(account_id: impl Into<String>, namespace: impl Into<String>, payload: P) -> Self {
        Self {
            account_id: account_id.into(),
            namespace: namespace.into(),
            payload,
        }
    }

    /// Routing fields must be present before the item may become visible.
    pub fn validate(&self) -> Result<(), TransformError> {
        if self.account_id.trim().is_empty() {
            return Err(TransformError::MissingField("account_id"));
        }
        if self.namespace.trim().is_empty() {
            return Err(TransformError::MissingField("namespace"));
        }
        Ok(())
    }
}

/// Key a batch is dispatched under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    pub account_id: String,
    pub namespace: String,
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.namespace)
    }
}

/// A staged unit of usage data.
///
/// All fields are fixed at construction; there are no setters. An item is
/// only ever moved: into the buffer, out of it by exactly one extraction.
#[derive(Debug, PartialEq)]
pub struct QueueItem<P> {
    created_at: SystemTime,
    account_id: String,
    namespace: String,
    payload: P,
}

impl<P> QueueItem<P> {
    pub fn new(clock: &dyn Clock, parts: ItemParts<P>) -> Self {
        Self {
            created_at: clock.now(),
            account_id: parts.account_id,
            namespace: parts.namespace,
            payload: parts.payload,
        }
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }

    /// Zero if `now` is earlier than the creation time.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }

    pub fn batch_key(&self) -> BatchKey {
        BatchKey {
            account_id: self.account_id.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Predicate matching items created strictly before `cutoff`.
    pub fn created_before(cutoff: SystemTime) -> impl Fn(&QueueItem<P>) -> bool + Copy {
        move |item| item.created_at < cutoff
    }
}
