use metricstream::{
    AdmissionConfig, AdmissionController, DecisionEvent, DispatchOutcome, IngestionService,
    ManualClock, MemorySink, Metric, MetricBatch, MetricType, MonitoringSink, PoolConfig,
    Rejection, SinkError, ValidationError, WorkerPool,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

fn controller_with(
    config: AdmissionConfig,
) -> (Arc<AdmissionController>, Arc<MemorySink>, Arc<ManualClock>) {
    let sink = Arc::new(MemorySink::new());
    let clock = Arc::new(ManualClock::new());
    let controller = Arc::new(
        AdmissionController::with_parts(config, sink.clone(), clock.clone()).unwrap(),
    );
    (controller, sink, clock)
}

fn batch(source: &str, n: usize) -> MetricBatch {
    let mut batch = MetricBatch::new(source);
    for i in 0..n {
        batch.push(Metric::new(format!("m{i}"), i as f64, MetricType::Counter));
    }
    batch
}

#[test]
fn test_limit_then_window_slides() {
    let (controller, _sink, clock) = controller_with(AdmissionConfig::per_second(5));

    for i in 0..5 {
        assert!(controller.allow_request("a"), "request {i} should be admitted");
        clock.advance(Duration::from_millis(10));
    }
    assert!(!controller.allow_request("a"));

    clock.advance(Duration::from_millis(1100));
    assert!(controller.allow_request("a"));
}

#[test]
fn test_denied_requests_do_not_extend_the_window() {
    let (controller, _sink, clock) = controller_with(AdmissionConfig::per_second(2));

    assert!(controller.allow_request("a"));
    assert!(controller.allow_request("a"));

    // Hammer while full; none of this should count
    for _ in 0..50 {
        clock.advance(Duration::from_millis(10));
        assert!(!controller.allow_request("a"));
    }

    clock.advance(Duration::from_millis(500));
    assert!(controller.allow_request("a"));
    assert_eq!(controller.window_len("a"), 1);
}

#[test]
fn test_telemetry_overflow_keeps_newest() {
    let (controller, sink, clock) = controller_with(AdmissionConfig::per_second(2000));

    for _ in 0..1500 {
        clock.advance(Duration::from_nanos(1));
        controller.allow_request("a");
    }

    let report = controller.flush_metrics();
    assert_eq!(report.events_delivered, 1000);
    assert_eq!(report.events_dropped, 500);

    let timestamps: Vec<u64> = sink.events_for("a").iter().map(|e| e.timestamp_ns).collect();
    let expected: Vec<u64> = (501..=1500).collect();
    assert_eq!(timestamps, expected);

    let metrics = controller.metrics();
    assert_eq!(metrics.events_dropped, 500);
    assert!(metrics.is_losing_telemetry());
}

#[test]
fn test_flush_delivers_each_event_once() {
    let (controller, sink, clock) = controller_with(AdmissionConfig::per_second(3));

    for _ in 0..5 {
        clock.advance(Duration::from_millis(1));
        controller.allow_request("a");
    }
    controller.allow_request("b");

    let first = controller.flush_metrics();
    assert_eq!(first.events_delivered, 6);
    assert_eq!(first.clients_drained, 2);

    let second = controller.flush_metrics();
    assert_eq!(second.events_delivered, 0);

    let decisions: Vec<bool> = sink.events_for("a").iter().map(|e| e.allowed).collect();
    assert_eq!(decisions, vec![true, true, true, false, false]);
    assert_eq!(sink.len(), 6);
}

#[test]
fn test_failing_sink_does_not_stall_flush() {
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    let sink: Arc<dyn MonitoringSink> = Arc::new(move |client: &str, _event: DecisionEvent| {
        if client == "broken" {
            Err(SinkError::Unavailable("collector down".to_string()))
        } else {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    });

    let controller = AdmissionController::with_parts(
        AdmissionConfig::per_second(10),
        sink,
        Arc::new(ManualClock::new()),
    )
    .unwrap();

    for _ in 0..3 {
        controller.allow_request("broken");
        controller.allow_request("fine");
    }

    let report = controller.flush_metrics();
    assert_eq!(report.sink_failures, 3);
    assert_eq!(report.events_delivered, 3);
    assert_eq!(delivered.load(Ordering::Relaxed), 3);
    assert_eq!(controller.pending_events("broken"), 0);
}

#[test]
fn test_pool_backpressure() {
    let pool = WorkerPool::new(PoolConfig::new(1, 2)).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    assert!(pool.enqueue(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
    }));
    started_rx.recv().unwrap();

    // The only worker is busy: two slots, then a refusal
    assert!(pool.enqueue(|| {}));
    assert!(pool.enqueue(|| {}));
    assert!(!pool.enqueue(|| {}));
    assert_eq!(pool.submit(|| {}), Err(Rejection::QueueFull));

    release_tx.send(()).unwrap();
    pool.shutdown();

    let stats = pool.stats();
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.completed, 3);
}

#[test]
fn test_pool_runs_accepted_tasks_exactly_once() {
    let pool = Arc::new(WorkerPool::new(PoolConfig::new(4, 10_000)).unwrap());
    let runs = Arc::new(AtomicUsize::new(0));
    let accepted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let runs = runs.clone();
            let accepted = accepted.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..500 {
                    let runs = runs.clone();
                    if pool.enqueue(move || {
                        runs.fetch_add(1, Ordering::Relaxed);
                    }) {
                        accepted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    pool.shutdown();

    assert_eq!(runs.load(Ordering::Relaxed), accepted.load(Ordering::Relaxed));
    assert!(!pool.enqueue(|| {}));
    assert_eq!(pool.submit(|| {}), Err(Rejection::ShuttingDown));
}

#[test]
fn test_service_outcomes() {
    let sink = Arc::new(MemorySink::new());
    let service = IngestionService::new(
        AdmissionConfig::per_second(2),
        PoolConfig::new(2, 16),
        sink.clone(),
    )
    .unwrap();

    let handled = Arc::new(AtomicUsize::new(0));
    let client = IngestionService::client_id(Some("token-1"));

    let h = handled.clone();
    let outcome = service.dispatch(client, batch("host", 3), move |b| {
        h.fetch_add(b.len(), Ordering::Relaxed);
        Ok::<_, String>(())
    });
    assert_eq!(outcome, DispatchOutcome::Accepted { metrics: 3 });
    assert_eq!(outcome.status_code(), 200);

    let outcome = service.dispatch(client, MetricBatch::new("host"), |_| Ok::<_, String>(()));
    assert_eq!(outcome, DispatchOutcome::Invalid(ValidationError::EmptyBatch));
    assert_eq!(outcome.status_code(), 400);

    let outcome = service.dispatch(client, batch("host", 1), |_| Ok::<_, String>(()));
    assert_eq!(outcome, DispatchOutcome::RateLimited);
    assert_eq!(outcome.status_code(), 429);

    // A different client has its own budget
    let outcome = service.dispatch(
        IngestionService::client_id(None),
        batch("host", 1),
        |_| Err::<(), _>("storage offline"),
    );
    assert!(outcome.is_accepted());

    service.shutdown();
    assert_eq!(handled.load(Ordering::Relaxed), 3);

    let stats = service.stats();
    assert_eq!(stats.batches_processed, 2);
    assert_eq!(stats.metrics_received, 4);
    assert_eq!(stats.validation_errors, 1);
    assert_eq!(stats.rate_limited, 1);
    assert_eq!(stats.total_requests(), 4);

    // The final flush on shutdown delivered every decision
    assert_eq!(sink.events_for("token-1").len(), 3);
    assert_eq!(sink.events_for("default").len(), 1);
}

#[test]
fn test_service_after_shutdown_is_overloaded() {
    let service = IngestionService::new(
        AdmissionConfig::per_second(10),
        PoolConfig::new(1, 4),
        Arc::new(MemorySink::new()),
    )
    .unwrap();

    service.shutdown();
    service.shutdown();

    let outcome = service.dispatch("a", batch("host", 1), |_| Ok::<_, String>(()));
    assert_eq!(outcome, DispatchOutcome::Overloaded(Rejection::ShuttingDown));
    assert_eq!(outcome.status_code(), 503);
}
