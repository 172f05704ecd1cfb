// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns aged buffer contents into dispatched batches.
//!
//! # Cycle
//!
//! ```text
//!   Idle ──trigger──> Extracting ──> Grouping ──> Dispatching ──> Idle
//!    ^                                                             │
//!    └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A trigger that arrives while a cycle is running is coalesced: it returns
//! [`FlushOutcome::Coalesced`] without touching the buffer.
//!
//! # Delivery policy
//!
//! At-least-once with a retry cap. A batch that fails transiently is held by
//! the flusher (not put back in the buffer) and re-sent on a later cycle once
//! its exponential backoff has elapsed. After [`RetryPolicy::max_retries`]
//! failed retries it is dropped and reported once to the [`LossSink`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::join_all;
use hashbrown::HashMap;
use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::clock::Clock;
use crate::errors::DispatchError;
use crate::observability::{LossReason, LossSink, PermanentLoss};
pub use crate::queue_item::BatchKey;
use crate::queue_item::QueueItem;

/// Delivers one batch to the backend.
#[async_trait]
pub trait Dispatcher<P>: Send + Sync {
    async fn dispatch(&self, batch: &Batch<P>) -> Result<(), DispatchError>;
}

/// Items sharing an account and namespace, in insertion order.
#[derive(Debug)]
pub struct Batch<P> {
    key: BatchKey,
    items: Vec<QueueItem<P>>,
}

impl<P> Batch<P> {
    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    pub fn items(&self) -> &[QueueItem<P>] {
        &self.items
    }

    pub fn payloads(&self) -> impl Iterator<Item = &P> {
        self.items.iter().map(QueueItem::payload)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<QueueItem<P>> {
        self.items
    }
}

/// Groups items by `(account_id, namespace)`.
///
/// Batches come out in order of each key's first appearance.
pub fn group_batches<P>(items: Vec<QueueItem<P>>) -> Vec<Batch<P>> {
    let mut index: HashMap<BatchKey, usize> = HashMap::new();
    let mut batches: Vec<Batch<P>> = Vec::new();
    for item in items {
        let key = item.batch_key();
        match index.get(&key) {
            Some(&i) => batches[i].items.push(item),
            None => {
                index.insert(key.clone(), batches.len());
                batches.push(Batch {
                    key,
                    items: vec![item],
                });
            }
        }
    }
    batches
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone)]
pub struct FlusherConfig {
    /// Items younger than this stay buffered on a scheduled flush.
    pub flush_window: Duration,
    /// Items older than this are evicted instead of dispatched.
    pub max_item_age: Option<Duration>,
    /// Buffer size at which a scheduled flush takes everything.
    pub max_buffered_items: usize,
    pub retry: RetryPolicy,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self {
            flush_window: Duration::from_secs(10),
            max_item_age: Some(Duration::from_secs(3600)),
            max_buffered_items: 50_000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Periodic or on-demand: take aged items only.
    Scheduled,
    /// Final flush before exit: take everything, ignore backoff.
    Drain,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Idle = 0,
    Extracting = 1,
    Grouping = 2,
    Dispatching = 3,
}

impl FlushState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => FlushState::Extracting,
            2 => FlushState::Grouping,
            3 => FlushState::Dispatching,
            _ => FlushState::Idle,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub extracted: usize,
    pub evicted: usize,
    pub batches_sent: usize,
    pub items_sent: usize,
    pub batches_retrying: usize,
    pub batches_lost: usize,
    pub items_lost: usize,
}

impl FlushReport {
    /// Folds a later cycle's report into this one. `batches_retrying` is a
    /// snapshot, so the later value wins.
    pub fn absorb(&mut self, later: &FlushReport) {
        self.extracted += later.extracted;
        self.evicted += later.evicted;
        self.batches_sent += later.batches_sent;
        self.items_sent += later.items_sent;
        self.batches_retrying = later.batches_retrying;
        self.batches_lost += later.batches_lost;
        self.items_lost += later.items_lost;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Completed(FlushReport),
    Coalesced,
}

/// Holds the cycle state for the duration of one flush and resets it to
/// `Idle` on drop, including on early return.
struct Cycle<'a> {
    state: &'a AtomicU8,
}

impl<'a> Cycle<'a> {
    fn begin(state: &'a AtomicU8) -> Option<Self> {
        state
            .compare_exchange(
                FlushState::Idle as u8,
                FlushState::Extracting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| Self { state })
    }

    fn advance(&self, next: FlushState) {
        self.state.store(next as u8, Ordering::Release);
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        self.state.store(FlushState::Idle as u8, Ordering::Release);
    }
}

#[derive(Debug)]
struct PendingBatch<P> {
    batch: Batch<P>,
    failures: u32,
    next_attempt_at: SystemTime,
}

impl<P> PendingBatch<P> {
    fn fresh(batch: Batch<P>) -> Self {
        Self {
            batch,
            failures: 0,
            next_attempt_at: UNIX_EPOCH,
        }
    }
}

fn cutoff(now: SystemTime, age: Duration) -> SystemTime {
    now.checked_sub(age).unwrap_or(UNIX_EPOCH)
}

pub struct Flusher<P> {
    buffer: Arc<Buffer<P>>,
    dispatcher: Arc<dyn Dispatcher<P>>,
    loss_sink: Arc<dyn LossSink>,
    clock: Arc<dyn Clock>,
    config: FlusherConfig,
    state: AtomicU8,
    retries: Mutex<Vec<PendingBatch<P>>>,
}

impl<P: Send + Sync> Flusher<P> {
    pub fn new(
        buffer: Arc<Buffer<P>>,
        dispatcher: Arc<dyn Dispatcher<P>>,
        loss_sink: Arc<dyn LossSink>,
        clock: Arc<dyn Clock>,
        config: FlusherConfig,
    ) -> Self {
        Flusher {
            buffer,
            dispatcher,
            loss_sink,
            clock,
            config,
            state: AtomicU8::new(FlushState::Idle as u8),
            retries: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> FlushState {
        FlushState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Batches waiting for a retry on a later cycle.
    pub fn pending_retries(&self) -> usize {
        self.retries().len()
    }

    fn retries(&self) -> MutexGuard<'_, Vec<PendingBatch<P>>> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn flush(&self, mode: FlushMode) -> FlushOutcome {
        let Some(cycle) = Cycle::begin(&self.state) else {
            debug!("Flush already in progress, coalescing trigger");
            return FlushOutcome::Coalesced;
        };

        let now = self.clock.now();
        let mut report = FlushReport::default();

        if mode == FlushMode::Scheduled {
            self.evict_stale(now, &mut report);
        }
        let extracted = self.extract(mode, now);
        report.extracted = extracted.len();

        cycle.advance(FlushState::Grouping);
        let fresh = group_batches(extracted);
        let held = std::mem::take(&mut *self.retries());
        let (mut work, mut waiting): (Vec<_>, Vec<_>) = held
            .into_iter()
            .partition(|pending| mode == FlushMode::Drain || pending.next_attempt_at <= now);
        if !work.is_empty() {
            debug!("Retrying {} previously failed usage batches", work.len());
        }
        work.extend(fresh.into_iter().map(PendingBatch::fresh));

        cycle.advance(FlushState::Dispatching);
        let results = join_all(
            work.iter()
                .map(|pending| self.dispatcher.dispatch(&pending.batch)),
        )
        .await;

        for (mut pending, result) in work.into_iter().zip(results) {
            let Err(e) = result else {
                report.batches_sent += 1;
                report.items_sent += pending.batch.len();
                continue;
            };
            pending.failures += 1;

            let reason = if !e.is_retryable() {
                Some(LossReason::Rejected)
            } else if mode == FlushMode::Drain {
                Some(LossReason::ShutdownDrain)
            } else if pending.failures > self.config.retry.max_retries {
                Some(LossReason::RetriesExhausted)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    self.report_loss(&pending.batch, pending.failures, reason, &mut report);
                }
                None => {
                    let delay = self.config.retry.backoff(pending.failures);
                    warn!(
                        batch = %pending.batch.key,
                        attempt = pending.failures,
                        "Failed to dispatch usage batch, retrying in {:?}: {e}",
                        delay
                    );
                    pending.next_attempt_at = now + delay;
                    waiting.push(pending);
                }
            }
        }

        report.batches_retrying = waiting.len();
        *self.retries() = waiting;

        debug!(
            extracted = report.extracted,
            awaiting_retry = report.batches_retrying,
            batches_lost = report.batches_lost,
            "Flushed {} usage items in {} batches",
            report.items_sent,
            report.batches_sent
        );
        FlushOutcome::Completed(report)
    }

    fn evict_stale(&self, now: SystemTime, report: &mut FlushReport) {
        let Some(max_age) = self.config.max_item_age else {
            return;
        };
        let stale = self
            .buffer
            .extract(QueueItem::created_before(cutoff(now, max_age)));
        if stale.is_empty() {
            return;
        }
        report.evicted = stale.len();
        warn!(
            "Evicting {} usage items older than {:?}",
            stale.len(),
            max_age
        );
        for batch in group_batches(stale) {
            self.report_loss(&batch, 0, LossReason::Evicted, report);
        }
    }

    fn extract(&self, mode: FlushMode, now: SystemTime) -> Vec<QueueItem<P>> {
        match mode {
            FlushMode::Drain => self.buffer.extract_all(),
            FlushMode::Scheduled => {
                let buffered = self.buffer.len();
                if buffered >= self.config.max_buffered_items {
                    warn!(
                        "Usage buffer holds {} items (limit {}), flushing all",
                        buffered, self.config.max_buffered_items
                    );
                    self.buffer.extract_all()
                } else {
                    self.buffer
                        .extract(QueueItem::created_before(cutoff(now, self.config.flush_window)))
                }
            }
        }
    }

    fn report_loss(
        &self,
        batch: &Batch<P>,
        attempts: u32,
        reason: LossReason,
        report: &mut FlushReport,
    ) {
        report.batches_lost += 1;
        report.items_lost += batch.len();
        self.loss_sink.record_loss(&PermanentLoss {
            key: batch.key.clone(),
            items: batch.len(),
            attempts,
            reason,
        });
    }
}
