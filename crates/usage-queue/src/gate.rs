// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-event-type ingestion.
//!
//! An [`IngestGate`] checks readiness, runs the event's transform and appends
//! the resulting item to the shared [`Buffer`]. It never returns an error to
//! the firing call site: a closed gate or a failed transform drops the event.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::clock::Clock;
use crate::errors::TransformError;
use crate::queue_item::{ItemParts, QueueItem};
use crate::registry::Listener;

/// Answers whether ingestion is currently allowed.
///
/// Queried on every event; implementations must not cache across calls so
/// that toggles take effect immediately.
pub trait Readiness: Send + Sync {
    fn is_operational(&self) -> bool;
    fn is_feature_enabled(&self) -> bool;
}

/// Live-toggleable readiness flags.
#[derive(Debug)]
pub struct IngestSwitches {
    operational: AtomicBool,
    enabled: AtomicBool,
}

impl IngestSwitches {
    #[must_use]
    pub fn new(operational: bool, enabled: bool) -> Self {
        Self {
            operational: AtomicBool::new(operational),
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_operational(&self, operational: bool) {
        self.operational.store(operational, Ordering::Release);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

impl Readiness for IngestSwitches {
    fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    fn is_feature_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Pure conversion from a domain event to an item's routing data and payload.
pub type Transform<E, P> = Arc<dyn Fn(&E) -> Result<ItemParts<P>, TransformError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    GateClosed,
    Dropped(TransformError),
}

pub struct IngestGate<E, P> {
    readiness: Arc<dyn Readiness>,
    transform: Transform<E, P>,
    buffer: Arc<Buffer<P>>,
    clock: Arc<dyn Clock>,
}

impl<E, P> IngestGate<E, P> {
    pub fn new(
        readiness: Arc<dyn Readiness>,
        transform: Transform<E, P>,
        buffer: Arc<Buffer<P>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            readiness,
            transform,
            buffer,
            clock,
        }
    }

    /// Ingests one event, appending at most one item to the buffer.
    pub fn ingest(&self, event: &E) -> IngestOutcome {
        if !self.readiness.is_operational() || !self.readiness.is_feature_enabled() {
            trace!(
                event_type = std::any::type_name::<E>(),
                "ingestion disabled, discarding event"
            );
            return IngestOutcome::GateClosed;
        }

        let transformed =
            (self.transform)(event).and_then(|parts| parts.validate().map(|()| parts));
        let parts = match transformed {
            Ok(parts) => parts,
            Err(e) => {
                debug!(
                    event_type = std::any::type_name::<E>(),
                    "dropping event that could not be queued: {e}"
                );
                return IngestOutcome::Dropped(e);
            }
        };

        self.buffer
            .append(QueueItem::new(self.clock.as_ref(), parts));
        IngestOutcome::Accepted
    }
}

impl<E, P> Listener<E> for IngestGate<E, P>
where
    E: 'static,
    P: Send + Sync + 'static,
{
    fn on_event(&self, event: &E) {
        let _ = self.ingest(event);
    }
}

impl<E, P> fmt::Debug for IngestGate<E, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestGate")
            .field("event_type", &std::any::type_name::<E>())
            .finish_non_exhaustive()
    }
}
