#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sqs_poller::client::memory::InMemoryQueueClient;
use sqs_poller::poller::{BackoffSchedule, SqsPollerConfig};

pub const QUEUE_URL: &str = "memory://orders";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fast-polling configuration suited to the in-memory queue.
pub fn test_config() -> SqsPollerConfig {
    SqsPollerConfig::new(QUEUE_URL)
        .with_wait_time_seconds(1)
        .with_concurrency_limit(4)
        .with_backoff(BackoffSchedule::constant(Duration::from_millis(20)))
        .with_drain_timeout(Duration::from_secs(5))
}

pub fn memory_queue() -> Arc<InMemoryQueueClient> {
    Arc::new(InMemoryQueueClient::new())
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Tracks how many handlers run at once and the peak.
#[derive(Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}
