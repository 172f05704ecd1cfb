// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Composition root.
//!
//! [`UsageQueue`] wires listeners against a shared buffer; [`UsageQueue::start`]
//! spawns the background flush loop and hands back a [`RunningQueue`].

use std::sync::Arc;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::Buffer;
use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::errors::{ConfigError, RegistryError};
use crate::flusher::{Dispatcher, FlushMode, FlushOutcome, FlushReport, Flusher};
use crate::gate::{IngestGate, IngestSwitches, Readiness, Transform};
use crate::observability::LossSink;
use crate::registry::ListenerRegistry;
use crate::usage::{self, ApiUsageEvent, ResourceUsageEvent, UsageDatum};

/// Status of the flush loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// A queue being wired. Nothing is ingested until [`UsageQueue::start`].
pub struct UsageQueue<P> {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    buffer: Arc<Buffer<P>>,
    switches: Arc<IngestSwitches>,
    registry: ListenerRegistry,
}

impl<P> UsageQueue<P>
where
    P: Send + Sync + 'static,
{
    /// Fails if `config` does not pass [`QueueConfig::validate`].
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let switches = Arc::new(IngestSwitches::new(false, config.ingest_enabled));
        Ok(Self {
            config,
            clock,
            buffer: Arc::new(Buffer::new()),
            switches,
            registry: ListenerRegistry::new(),
        })
    }

    /// Registers an ingest gate for events of type `E`.
    pub fn register<E: 'static>(
        &mut self,
        transform: Transform<E, P>,
    ) -> Result<(), RegistryError> {
        let gate = IngestGate::new(
            Arc::clone(&self.switches) as Arc<dyn Readiness>,
            transform,
            Arc::clone(&self.buffer),
            Arc::clone(&self.clock),
        );
        self.registry.register::<E>(Arc::new(gate))
    }

    pub fn buffer(&self) -> &Arc<Buffer<P>> {
        &self.buffer
    }

    pub fn switches(&self) -> &Arc<IngestSwitches> {
        &self.switches
    }

    /// Opens ingestion and spawns the flush loop on the current tokio runtime.
    pub fn start(
        self,
        dispatcher: Arc<dyn Dispatcher<P>>,
        loss_sink: Arc<dyn LossSink>,
    ) -> RunningQueue<P> {
        let flusher = Arc::new(Flusher::new(
            Arc::clone(&self.buffer),
            dispatcher,
            loss_sink,
            Arc::clone(&self.clock),
            self.config.flusher_config(),
        ));
        let status = Arc::new(RwLock::new(ServiceStatus::Starting));
        let trigger = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_flush_loop(
            Arc::clone(&flusher),
            self.config.flush_interval,
            Arc::clone(&trigger),
            cancel.clone(),
            Arc::clone(&status),
        ));

        self.switches.set_operational(true);
        info!(
            event_types = ?self.registry.event_types(),
            "Usage queue started, flushing every {:?}",
            self.config.flush_interval
        );

        RunningQueue {
            registry: Arc::new(self.registry),
            switches: self.switches,
            buffer: self.buffer,
            flusher,
            status,
            trigger,
            cancel,
            task,
        }
    }
}

impl UsageQueue<UsageDatum> {
    /// Registers the built-in API and resource usage transforms.
    pub fn register_usage_events(&mut self) -> Result<(), RegistryError> {
        self.register::<ApiUsageEvent>(Arc::new(usage::api_usage))?;
        self.register::<ResourceUsageEvent>(Arc::new(usage::resource_usage))
    }
}

/// Handle to a started queue.
pub struct RunningQueue<P> {
    registry: Arc<ListenerRegistry>,
    switches: Arc<IngestSwitches>,
    buffer: Arc<Buffer<P>>,
    flusher: Arc<Flusher<P>>,
    status: Arc<RwLock<ServiceStatus>>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    task: JoinHandle<Option<FlushReport>>,
}

impl<P> RunningQueue<P>
where
    P: Send + Sync + 'static,
{
    /// Hands `event` to its registered listener. Never fails.
    pub fn fire<E: 'static>(&self, event: &E) -> bool {
        self.registry.fire(event)
    }

    /// Shared registry, for wiring into an external event source.
    pub fn registry(&self) -> Arc<ListenerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn switches(&self) -> &Arc<IngestSwitches> {
        &self.switches
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_retries(&self) -> usize {
        self.flusher.pending_retries()
    }

    pub async fn status(&self) -> ServiceStatus {
        *self.status.read().await
    }

    /// Requests a scheduled flush without waiting for the next tick.
    pub fn flush_now(&self) {
        self.trigger.notify_one();
    }

    /// Stops ingestion, drains the buffer and waits for the flush loop.
    ///
    /// Items that reach the buffer after the loop's drain are drained here,
    /// so every accepted item is either sent or reported as lost. Returns the
    /// combined report of the final drains, if any ran.
    pub async fn shutdown(self) -> Option<FlushReport> {
        self.switches.set_operational(false);
        *self.status.write().await = ServiceStatus::Stopping;
        self.cancel.cancel();

        let mut report = match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Usage flush loop terminated abnormally: {e}");
                None
            }
        };

        // A producer that passed the gate before it closed can append after
        // the loop's drain has extracted.
        if !self.buffer.is_empty() || self.flusher.pending_retries() > 0 {
            debug!(
                leftover = self.buffer.len(),
                "Draining usage items appended during shutdown"
            );
            if let FlushOutcome::Completed(late) = self.flusher.flush(FlushMode::Drain).await {
                report = Some(match report {
                    Some(mut earlier) => {
                        earlier.absorb(&late);
                        earlier
                    }
                    None => late,
                });
            }
        }

        *self.status.write().await = ServiceStatus::Stopped;
        info!("Usage queue stopped");
        report
    }
}

async fn run_flush_loop<P>(
    flusher: Arc<Flusher<P>>,
    period: Duration,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
    status: Arc<RwLock<ServiceStatus>>,
) -> Option<FlushReport>
where
    P: Send + Sync + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick

    {
        let mut status = status.write().await;
        if *status == ServiceStatus::Starting {
            *status = ServiceStatus::Running;
        }
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Draining usage queue");
                return match flusher.flush(FlushMode::Drain).await {
                    FlushOutcome::Completed(report) => {
                        info!(
                            "Final flush sent {} usage items, lost {}",
                            report.items_sent, report.items_lost
                        );
                        Some(report)
                    }
                    FlushOutcome::Coalesced => None,
                };
            }
            _ = ticker.tick() => {
                flusher.flush(FlushMode::Scheduled).await;
            }
            () = trigger.notified() => {
                debug!("On-demand usage flush requested");
                flusher.flush(FlushMode::Scheduled).await;
            }
        }
    }
}
