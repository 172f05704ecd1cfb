// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loss reporting.
//!
//! Data dropped by the flusher is the only condition operators should see as
//! an anomaly; it is surfaced through a [`LossSink`].

use std::fmt;

use tracing::error;

use crate::queue_item::BatchKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    /// Still failing after the configured number of retries.
    RetriesExhausted,
    /// The dispatcher reported a non-retryable failure.
    Rejected,
    /// Older than the maximum item age before it could be dispatched.
    Evicted,
    /// Dispatch failed during the final drain, with no later cycle to retry in.
    ShutdownDrain,
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            LossReason::RetriesExhausted => "retries exhausted",
            LossReason::Rejected => "rejected by backend",
            LossReason::Evicted => "evicted as too old",
            LossReason::ShutdownDrain => "failed during shutdown drain",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermanentLoss {
    pub key: BatchKey,
    pub items: usize,
    pub attempts: u32,
    pub reason: LossReason,
}

pub trait LossSink: Send + Sync {
    fn record_loss(&self, loss: &PermanentLoss);
}

/// Reports losses as `error!` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLossSink;

impl LossSink for TracingLossSink {
    fn record_loss(&self, loss: &PermanentLoss) {
        error!(
            account_id = %loss.key.account_id,
            namespace = %loss.key.namespace,
            items = loss.items,
            attempts = loss.attempts,
            "Dropped usage batch: {}",
            loss.reason
        );
    }
}
