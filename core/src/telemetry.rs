use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hook_core=info,runner_container=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Counters kept by every sink.
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Records handed to `accept`.
    accepted: AtomicU64,
    /// Payload bytes accepted (buffered sink only).
    bytes: AtomicU64,
    /// Flushes (buffered sink) or inserted rows (queued sink) that succeeded.
    delivered: AtomicU64,
    /// Failed flushes or inserts.
    errors: AtomicU64,
}

impl SinkMetrics {
    pub const fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_accepted(&self, bytes: u64) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SinkMetricsSnapshot {
        SinkMetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SinkMetricsSnapshot {
    pub accepted: u64,
    pub bytes: u64,
    pub delivered: u64,
    pub errors: u64,
}
