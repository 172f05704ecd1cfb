// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wall-clock access for item timestamps and flush cutoffs.
//!
//! Every component that needs "now" receives a [`Clock`] at construction so
//! tests can drive time explicitly with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Production clock backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
///
/// Time is stored as milliseconds since the Unix epoch, so reads and advances
/// are lock-free and the clock can be shared across producer threads.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: SystemTime) -> Self {
        let millis = start
            .duration_since(UNIX_EPOCH)
            .map(millis_of)
            .unwrap_or_default();
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Clock positioned `secs` seconds after the Unix epoch.
    #[must_use]
    pub fn at_secs(secs: u64) -> Self {
        Self {
            millis: AtomicU64::new(secs.saturating_mul(1000)),
        }
    }

    /// Moves the clock forward, saturating at the largest representable time.
    pub fn advance(&self, by: Duration) {
        let by = millis_of(by);
        let _ = self
            .millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(by))
            });
    }

    pub fn set_secs(&self, secs: u64) {
        self.millis.store(secs.saturating_mul(1000), Ordering::Release);
    }
}

fn millis_of(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.millis.load(Ordering::Acquire))
    }
}
