//! An ingestion front end in miniature: three clients push metric batches,
//! decisions are flushed to the log every 200ms, and the pool pushes back
//! when the storage handler falls behind.
//!
//! Run with: `RUST_LOG=metricstream=debug cargo run --example ingest_service`

use metricstream::{
    AdmissionConfig, DispatchOutcome, IngestionService, LogSink, Metric, MetricBatch, MetricType,
    PoolConfig,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    println!("=== Metric Ingestion Example ===\n");

    let service = Arc::new(
        IngestionService::new(
            AdmissionConfig::per_second(20),
            PoolConfig::new(2, 8),
            Arc::new(LogSink),
        )
        .expect("valid configuration"),
    );

    service
        .start_flush_thread(Duration::from_millis(200))
        .expect("flush thread");

    // `None` stands in for a request without an Authorization header
    let credentials = [Some("token-alpha"), Some("token-beta"), None];

    let producers: Vec<_> = credentials
        .into_iter()
        .map(|credentials| {
            let service = service.clone();
            thread::spawn(move || {
                let client = IngestionService::client_id(credentials).to_string();
                let mut statuses = [0u32; 4];

                for round in 0..40 {
                    let batch = MetricBatch::new(format!("{client}-host"))
                        .with_metric(
                            Metric::new("cpu.usage", 0.42, MetricType::Gauge)
                                .with_tag("core", "0"),
                        )
                        .with_metric(Metric::new("http.requests", round as f64, MetricType::Counter));

                    let outcome = service.dispatch(&client, batch, |batch| {
                        // Slow storage
                        thread::sleep(Duration::from_millis(5));
                        if batch.iter().any(|m| m.value > 35.0) {
                            return Err("storage rejected write");
                        }
                        Ok(())
                    });

                    let slot = match outcome {
                        DispatchOutcome::Accepted { .. } => 0,
                        DispatchOutcome::RateLimited => 1,
                        DispatchOutcome::Invalid(_) => 2,
                        DispatchOutcome::Overloaded(_) => 3,
                    };
                    statuses[slot] += 1;

                    if !outcome.is_accepted() {
                        warn!(client = %client, status = outcome.status_code(), %outcome, "request refused");
                    }

                    thread::sleep(Duration::from_millis(10));
                }

                info!(
                    client = %client,
                    accepted = statuses[0],
                    rate_limited = statuses[1],
                    invalid = statuses[2],
                    overloaded = statuses[3],
                    "client finished"
                );
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer panicked");
    }

    // A malformed batch is turned away before it reaches a worker
    let outcome = service.dispatch(
        "token-gamma",
        MetricBatch::new("bad-host").with_metric(Metric::new("", f64::NAN, MetricType::Gauge)),
        |_| Ok::<_, String>(()),
    );
    println!("Malformed batch: {} ({})\n", outcome, outcome.status_code());

    service.shutdown();

    println!("{}", service.stats().summary());
    println!("{}", service.controller().metrics().summary());
    println!("{}", service.pool().stats().summary());
    println!("Health: {}", service.health());
}
