//! # Reservoir Demo
//!
//! Several producer threads feed one reservoir with a mixed count/time
//! policy; a handler simulates a slow sink. Prints the metrics snapshot
//! after close.
//!
//! ## Running
//!
//! ```bash
//! cargo run -p reservoir --example demo --release
//!
//! # See per-batch events
//! RUST_LOG=reservoir=debug cargo run -p reservoir --example demo
//! ```

use anyhow::Context;
use reservoir::{
    handler_fn, Batch, DispatcherConfig, HandlerError, InMemoryRegistry, QueueConfig, Reservoir,
    TriggerPolicy,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const PRODUCERS: u64 = 4;
const EVENTS_PER_PRODUCER: u64 = 25_000;

struct Event {
    producer: u64,
    seq: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reservoir=info")),
        )
        .init();

    let stored = Arc::new(AtomicU64::new(0));
    let registry = Arc::new(InMemoryRegistry::new());
    {
        let stored = Arc::clone(&stored);
        registry.register(
            "sink",
            handler_fn("sink", move |batch: Batch<Event>| {
                if let Some(bad) = batch.iter().find(|e| e.producer >= PRODUCERS) {
                    return Err(HandlerError::release(format!("unknown producer in event {}", bad.seq)));
                }
                // Pretend to write somewhere slow.
                thread::sleep(Duration::from_millis(2));
                stored.fetch_add(batch.len() as u64, Ordering::Relaxed);
                Ok(())
            }),
        );
    }

    let policy = TriggerPolicy::by_count_or_time(500, Duration::from_millis(100))
        .context("invalid trigger policy")?;
    let reservoir = Reservoir::<Event>::builder(policy, "sink")
        .registry(registry)
        .queue(QueueConfig::bounded(64 * 1024))
        .dispatcher(
            DispatcherConfig::default()
                .with_workers(2, 8)
                .with_grace_period(Duration::from_secs(5))
                .with_thread_name("demo-sink"),
        )
        .build()
        .context("failed to build reservoir")?;
    let reservoir = Arc::new(reservoir);

    let start = Instant::now();
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let reservoir = Arc::clone(&reservoir);
            thread::spawn(move || {
                for seq in 0..EVENTS_PER_PRODUCER {
                    reservoir.add(Event { producer, seq });
                }
            })
        })
        .collect();
    for handle in producers {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    }
    let add_elapsed = start.elapsed();

    reservoir.close();
    let snap = reservoir.metrics().snapshot();

    println!("added      {} events in {:?}", snap.elements_added, add_elapsed);
    println!("batches    {} dispatched, {} released, {} failed", snap.batches_dispatched, snap.batches_released, snap.batches_failed);
    println!("dropped    {} overflowed, {} in rejected batches", snap.elements_overflowed, snap.elements_dropped);
    println!("stored     {} events", stored.load(Ordering::Relaxed));
    println!("skipped    {} timer fires", snap.timer_fires_skipped);
    Ok(())
}
