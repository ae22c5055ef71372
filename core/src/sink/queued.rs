//! Queued sink: producers hand entries to a bounded queue and a single worker
//! inserts them into a [`Store`], one row per entry.
//!
//! A full queue blocks the producer. `stop` does not wait for the queue to
//! empty: entries still queued when the worker sees the stop signal are
//! dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::QueuedSinkConfig;
use crate::entry::Entry;
use crate::errors::{Result, SinkError};
use crate::level::{Level, resolve_levels};
use crate::sink::{Hook, SinkState};
use crate::store::{Row, Store};
use crate::telemetry::{SinkMetrics, SinkMetricsSnapshot};

pub struct QueuedSink<S> {
    store: Arc<S>,
    inner: Mutex<Phase>,
    queue_capacity: usize,
    table: Arc<str>,
    levels: Vec<Level>,
    metrics: Arc<SinkMetrics>,
}

enum Phase {
    Idle,
    Running {
        queue: mpsc::Sender<Entry>,
        worker: Worker,
    },
    Stopped,
}

struct Worker {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl<S: Store> QueuedSink<S> {
    pub fn new(store: S, config: QueuedSinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: Arc::new(store),
            inner: Mutex::new(Phase::Idle),
            queue_capacity: config.effective_queue_capacity(),
            table: Arc::from(config.table.as_str()),
            levels: resolve_levels(&config.levels),
            metrics: Arc::new(SinkMetrics::new()),
        })
    }

    /// Queues one entry for insertion, waiting while the queue is full.
    ///
    /// The first call starts the worker, so it must run inside a tokio runtime.
    pub async fn accept(&self, entry: Entry) -> Result<()> {
        let queue = {
            let mut phase = self.lock();
            if matches!(*phase, Phase::Idle) {
                self.start(&mut phase);
            }
            match &*phase {
                Phase::Running { queue, .. } => queue.clone(),
                _ => return Err(SinkError::Closed),
            }
        };

        // the worker drops the receiver on exit, which fails blocked sends too
        queue.send(entry).await.map_err(|_| SinkError::Closed)?;
        self.metrics.record_accepted(0);
        Ok(())
    }

    /// Signals the worker and waits for it to exit. Queued entries are not
    /// drained first. Later calls return `Ok(())`.
    pub async fn stop(&self) -> Result<()> {
        let worker = {
            let mut phase = self.lock();
            match std::mem::replace(&mut *phase, Phase::Stopped) {
                Phase::Running { worker, .. } => worker,
                Phase::Idle | Phase::Stopped => return Ok(()),
            }
        };

        let _ = worker.stop.send(());
        worker.task.await.map_err(|e| SinkError::Worker {
            reason: e.to_string(),
        })
    }

    pub fn state(&self) -> SinkState {
        match *self.lock() {
            Phase::Idle => SinkState::Uninitialized,
            Phase::Running { .. } => SinkState::Running,
            Phase::Stopped => SinkState::Stopped,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> SinkMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn start(&self, phase: &mut Phase) {
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(drain_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.table),
            queue_rx,
            stop_rx,
            Arc::clone(&self.metrics),
        ));

        *phase = Phase::Running {
            queue: queue_tx,
            worker: Worker {
                stop: stop_tx,
                task,
            },
        };
        debug!(
            "Queued sink started: table={}, queue_capacity={}",
            self.table, self.queue_capacity
        );
    }

    fn lock(&self) -> MutexGuard<'_, Phase> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: Store> Hook for QueuedSink<S> {
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    async fn fire(&self, entry: &Entry) -> Result<()> {
        self.accept(entry.clone()).await
    }
}

/// Inserts one entry as a row of `table`.
pub(crate) async fn drain<S: Store>(
    store: &S,
    table: &str,
    entry: Entry,
    metrics: &SinkMetrics,
) -> Result<()> {
    match store.insert(table, Row::from(entry)).await {
        Ok(()) => {
            metrics.record_delivered();
            Ok(())
        }
        Err(e) => {
            metrics.record_error();
            Err(e.into())
        }
    }
}

async fn drain_loop<S: Store>(
    store: Arc<S>,
    table: Arc<str>,
    mut queue: mpsc::Receiver<Entry>,
    mut stop: oneshot::Receiver<()>,
    metrics: Arc<SinkMetrics>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            entry = queue.recv() => {
                let Some(entry) = entry else {
                    break;
                };
                // the worker has no caller to hand the error to
                if let Err(e) = drain(&*store, &table, entry, &metrics).await {
                    warn!("Failed to insert log entry into {}: {}", table, e);
                }
            }
        }
    }

    queue.close();
    let mut dropped = 0usize;
    while queue.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!("Queued sink stopped with {} undelivered entries", dropped);
    } else {
        debug!("Queued sink stopped");
    }
}
