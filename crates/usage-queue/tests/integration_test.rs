// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use usage_queue::{
    usage, ApiUsageEvent, Batch, BatchKey, Buffer, Clock, DispatchError, Dispatcher, FlushMode,
    FlushOutcome, Flusher, FlusherConfig, HttpDispatcher, IngestGate, IngestSwitches, ItemParts,
    LossReason, LossSink, ManualClock, PermanentLoss, QueueConfig, QueueItem, RetryPolicy,
    TracingLossSink, UsageDatum, UsageQueue,
};

#[derive(Default)]
struct RecordingSink(Mutex<Vec<PermanentLoss>>);

impl LossSink for RecordingSink {
    fn record_loss(&self, loss: &PermanentLoss) {
        self.0.lock().unwrap().push(loss.clone());
    }
}

fn api_event(account: &str, operation: &str) -> ApiUsageEvent {
    ApiUsageEvent {
        account_id: Some(account.to_string()),
        service: "compute".to_string(),
        operation: operation.to_string(),
        request_count: 1,
    }
}

fn queue_config(url: String) -> QueueConfig {
    QueueConfig {
        intake_url: Some(url),
        api_key: Some("mock-api-key".to_string()),
        flush_window: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(4),
        },
        ..Default::default()
    }
}

struct Harness {
    clock: Arc<ManualClock>,
    gate: IngestGate<ApiUsageEvent, UsageDatum>,
    flusher: Flusher<UsageDatum>,
    losses: Arc<RecordingSink>,
}

fn harness(config: &QueueConfig) -> Harness {
    let clock = Arc::new(ManualClock::at_secs(1_700_000_000));
    let buffer = Arc::new(Buffer::new());
    let losses = Arc::new(RecordingSink::default());
    let gate = IngestGate::new(
        Arc::new(IngestSwitches::new(true, true)),
        Arc::new(usage::api_usage),
        Arc::clone(&buffer),
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    let flusher = Flusher::new(
        buffer,
        Arc::new(HttpDispatcher::new(config).expect("failed to create dispatcher")),
        Arc::clone(&losses) as Arc<dyn LossSink>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        config.flusher_config(),
    );
    Harness {
        clock,
        gate,
        flusher,
        losses,
    }
}

#[tokio::test]
async fn http_dispatcher_ships_one_request_per_batch() {
    let mut server = Server::new_async().await;

    let acct_a = server
        .mock("POST", "/api/v1/usage")
        .match_header("X-Api-Key", "mock-api-key")
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "account_id": "111111111111",
            "namespace": "usage/api",
        })))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;
    let acct_b = server
        .mock("POST", "/api/v1/usage")
        .match_body(Matcher::PartialJson(json!({
            "account_id": "222222222222",
            "namespace": "usage/api",
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&queue_config(server.url()));
    h.gate.ingest(&api_event("111111111111", "Describe"));
    h.gate.ingest(&api_event("222222222222", "Describe"));
    h.gate.ingest(&api_event("111111111111", "Run"));
    h.clock.advance(Duration::from_secs(6));

    let FlushOutcome::Completed(report) = h.flusher.flush(FlushMode::Scheduled).await else {
        panic!("flush was coalesced");
    };
    assert_eq!(report.batches_sent, 2);
    assert_eq!(report.items_sent, 3);

    acct_a.assert_async().await;
    acct_b.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_then_reported_once() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/usage")
        .with_status(503)
        .expect(4)
        .create_async()
        .await;

    let h = harness(&queue_config(server.url()));
    h.gate.ingest(&api_event("111111111111", "Describe"));
    h.clock.advance(Duration::from_secs(6));

    for _ in 0..8 {
        h.flusher.flush(FlushMode::Scheduled).await;
        h.clock.advance(Duration::from_secs(10));
    }

    mock.assert_async().await;
    let losses = h.losses.0.lock().unwrap();
    assert_eq!(losses.len(), 1);
    assert_eq!(losses[0].reason, LossReason::RetriesExhausted);
    assert_eq!(losses[0].attempts, 4);
    assert_eq!(h.flusher.pending_retries(), 0);
}

#[tokio::test]
async fn forbidden_is_rejected_without_retry() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/usage")
        .with_status(403)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&queue_config(server.url()));
    h.gate.ingest(&api_event("111111111111", "Describe"));
    h.clock.advance(Duration::from_secs(6));

    h.flusher.flush(FlushMode::Scheduled).await;
    h.clock.advance(Duration::from_secs(60));
    h.flusher.flush(FlushMode::Scheduled).await;

    mock.assert_async().await;
    let losses = h.losses.0.lock().unwrap();
    assert_eq!(losses.len(), 1);
    assert_eq!(losses[0].reason, LossReason::Rejected);
}

#[tokio::test]
async fn compressed_requests_are_marked() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/usage")
        .match_header("Content-Encoding", "zstd")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let config = QueueConfig {
        compression_level: Some(6),
        ..queue_config(server.url())
    };
    let h = harness(&config);
    h.gate.ingest(&api_event("111111111111", "Describe"));

    // Drain ignores the flush window.
    h.flusher.flush(FlushMode::Drain).await;
    mock.assert_async().await;
}

#[tokio::test]
async fn service_drains_to_intake_on_shutdown() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/usage")
        .match_header("X-Api-Key", "mock-api-key")
        .with_status(202)
        .expect(2)
        .create_async()
        .await;

    let config = QueueConfig {
        flush_interval: Duration::from_secs(3600),
        ..queue_config(server.url())
    };
    let dispatcher = HttpDispatcher::new(&config).expect("failed to create dispatcher");
    let clock = Arc::new(ManualClock::at_secs(0));
    let mut queue: UsageQueue<UsageDatum> =
        UsageQueue::new(config, clock).expect("invalid queue config");
    queue.register_usage_events().expect("failed to register listeners");

    let running = queue.start(Arc::new(dispatcher), Arc::new(TracingLossSink));
    assert!(running.fire(&api_event("111111111111", "Describe")));
    assert!(running.fire(&api_event("222222222222", "Describe")));
    assert_eq!(running.buffered(), 2);

    let report = running.shutdown().await.expect("drain did not run");
    assert_eq!(report.items_sent, 2);
    mock.assert_async().await;
}

#[derive(Default)]
struct RecordingDispatcher(Mutex<Vec<(BatchKey, usize)>>);

#[async_trait]
impl Dispatcher<&'static str> for RecordingDispatcher {
    async fn dispatch(&self, batch: &Batch<&'static str>) -> Result<(), DispatchError> {
        self.0
            .lock()
            .unwrap()
            .push((batch.key().clone(), batch.len()));
        Ok(())
    }
}

#[tokio::test]
async fn aged_items_flush_as_one_batch() {
    let clock = Arc::new(ManualClock::at_secs(0));
    let buffer = Arc::new(Buffer::new());
    let dispatcher = Arc::new(RecordingDispatcher::default());

    for (secs, payload) in [(0, "x"), (1, "y"), (2, "z")] {
        clock.set_secs(secs);
        buffer.append(QueueItem::new(
            clock.as_ref(),
            ItemParts::new("A", "N", payload),
        ));
    }

    let flusher = Flusher::new(
        Arc::clone(&buffer),
        Arc::clone(&dispatcher) as Arc<dyn Dispatcher<&'static str>>,
        Arc::new(TracingLossSink),
        Arc::clone(&clock) as Arc<dyn Clock>,
        FlusherConfig {
            flush_window: Duration::from_secs(5),
            ..Default::default()
        },
    );

    clock.set_secs(10);
    flusher.flush(FlushMode::Scheduled).await;

    let sent = dispatcher.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.to_string(), "A/N");
    assert_eq!(sent[0].1, 3);
    assert!(buffer.is_empty());
}
