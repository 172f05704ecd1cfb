// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # usage-queue
//!
//! In-memory staging of usage and metric events for batched delivery to a
//! monitoring or billing backend.
//!
//! ## Overview
//!
//! ```text
//! producers ──> IngestGate ──> Buffer ──(age/size)──> Flusher ──> Dispatcher
//!   (many)      gate+transform  append    extract      group      (one per batch)
//! ```
//!
//! - [`queue_item`]: timestamped item and the age predicate
//! - [`buffer`]: shared buffer with atomic predicate extraction
//! - [`gate`]: per-event-type ingestion with readiness checks
//! - [`registry`]: event type to listener mapping built at startup
//! - [`flusher`]: extraction, grouping, dispatch and retry
//! - [`intake`]: HTTP dispatcher
//! - [`usage`]: built-in usage events and their transforms
//! - [`service`]: composition root and background flush loop
//!
//! Producers are never blocked beyond the buffer's critical section and never
//! see an ingestion error.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod clock;
pub mod config;
pub mod errors;
pub mod flusher;
pub mod gate;
pub mod intake;
pub mod logger;
pub mod observability;
pub mod queue_item;
pub mod registry;
pub mod service;
pub mod usage;

pub use buffer::Buffer;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::QueueConfig;
pub use errors::{ConfigError, DispatchError, RegistryError, TransformError};
pub use flusher::{
    Batch, BatchKey, Dispatcher, FlushMode, FlushOutcome, FlushReport, FlushState, Flusher,
    FlusherConfig, RetryPolicy,
};
pub use gate::{IngestGate, IngestOutcome, IngestSwitches, Readiness, Transform};
pub use intake::HttpDispatcher;
pub use observability::{LossReason, LossSink, PermanentLoss, TracingLossSink};
pub use queue_item::{ItemParts, QueueItem};
pub use registry::{Listener, ListenerRegistry};
pub use service::{RunningQueue, ServiceStatus, UsageQueue};
pub use usage::{ApiUsageEvent, ResourceUsageEvent, Unit, UsageDatum};
