//! Buffered, time-flushed sink over an async byte writer.
//!
//! Records are appended to an in-memory buffer and written downstream when the
//! buffer cannot take the next record, when the flush interval elapses, or on
//! an explicit [`BufferedSink::flush`] / [`BufferedSink::stop`].
//!
//! A record is never split across two downstream writes by the sink itself:
//! if it does not fit into the free space of a non-empty buffer, the buffer is
//! flushed first. The guarantee therefore does not depend on how full the
//! buffer happened to be when the record arrived.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::{Clock, Ticker, default_clock};
use crate::config::BufferedSinkConfig;
use crate::entry::{Entry, Formatter};
use crate::errors::{Result, SinkError};
use crate::level::{Level, resolve_levels};
use crate::sink::buffer::RecordBuffer;
use crate::sink::{Hook, SinkState};
use crate::telemetry::{SinkMetrics, SinkMetricsSnapshot};

pub struct BufferedSink<W> {
    state: Arc<Mutex<State<W>>>,
    clock: Arc<dyn Clock>,
    flush_interval: Duration,
    formatter: Formatter,
    levels: Vec<Level>,
    metrics: Arc<SinkMetrics>,
}

struct State<W> {
    buffer: RecordBuffer<W>,
    phase: Phase,
}

enum Phase {
    Idle,
    Running(Background),
    Stopped,
}

/// Handles to the flush loop. Dropping `stop` also ends the loop.
struct Background {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl<W> BufferedSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W, config: BufferedSinkConfig) -> Self {
        Self::with_clock(writer, config, default_clock())
    }

    pub fn with_clock(writer: W, config: BufferedSinkConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                buffer: RecordBuffer::new(writer, config.effective_capacity()),
                phase: Phase::Idle,
            })),
            clock,
            flush_interval: config.flush_interval(),
            formatter: config.formatter(),
            levels: resolve_levels(&config.levels),
            metrics: Arc::new(SinkMetrics::new()),
        }
    }

    /// Appends one serialized record.
    ///
    /// The first call starts the periodic flush loop, so it must run inside a
    /// tokio runtime. Returns [`SinkError::Closed`] once the sink is stopped.
    pub async fn accept(&self, record: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(state.phase, Phase::Stopped) {
            return Err(SinkError::Closed);
        }
        if matches!(state.phase, Phase::Idle) {
            self.start(&mut state);
        }

        if record.len() > state.buffer.available() && state.buffer.buffered() > 0 {
            flush_state(&mut state, &self.metrics).await?;
        }
        state.buffer.write(record).await?;

        self.metrics.record_accepted(record.len() as u64);
        Ok(())
    }

    /// Writes buffered records downstream. A no-op before the first record.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if matches!(state.phase, Phase::Idle) {
            return Ok(());
        }
        flush_state(&mut state, &self.metrics).await
    }

    /// Stops the flush loop, waits for it to exit, then flushes once more.
    ///
    /// Only the first call does any work; later calls return `Ok(())`. Stopping
    /// a sink that never received a record leaves the writer untouched.
    pub async fn stop(&self) -> Result<()> {
        let background = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut state.phase, Phase::Stopped) {
                Phase::Running(background) => background,
                Phase::Idle | Phase::Stopped => return Ok(()),
            }
        };

        // the lock is released here: the loop may be waiting for it mid-flush
        let _ = background.stop.send(());
        let joined = background.task.await;

        let mut state = self.state.lock().await;
        let flushed = flush_state(&mut state, &self.metrics).await;
        debug!(
            "Buffered sink stopped, {} bytes left unwritten",
            state.buffer.buffered()
        );

        flushed?;
        joined.map_err(|e| SinkError::Worker {
            reason: e.to_string(),
        })
    }

    pub async fn state(&self) -> SinkState {
        match self.state.lock().await.phase {
            Phase::Idle => SinkState::Uninitialized,
            Phase::Running(_) => SinkState::Running,
            Phase::Stopped => SinkState::Stopped,
        }
    }

    pub fn metrics(&self) -> SinkMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn start(&self, state: &mut State<W>) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let ticker = self.clock.new_ticker(self.flush_interval);
        let task = tokio::spawn(flush_loop(
            Arc::downgrade(&self.state),
            ticker,
            stop_rx,
            Arc::clone(&self.metrics),
        ));

        state.phase = Phase::Running(Background {
            stop: stop_tx,
            task,
        });
        debug!(
            "Buffered sink started: capacity={} bytes, flush_interval={:?}",
            state.buffer.capacity(),
            self.flush_interval
        );
    }
}

impl<W> Hook for BufferedSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Serializes `entry` with the configured format, then accepts the bytes.
    async fn fire(&self, entry: &Entry) -> Result<()> {
        let bytes = self.formatter.format(entry)?;
        self.accept(&bytes).await
    }
}

async fn flush_state<W>(state: &mut State<W>, metrics: &SinkMetrics) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let pending = state.buffer.buffered();
    match state.buffer.flush().await {
        Ok(()) => {
            if pending > 0 {
                metrics.record_delivered();
            }
            Ok(())
        }
        Err(e) => {
            metrics.record_error();
            Err(e)
        }
    }
}

/// Flushes on every tick until told to stop. Never flushes on the way out;
/// the final flush belongs to `stop`.
async fn flush_loop<W>(
    state: Weak<Mutex<State<W>>>,
    mut ticker: Ticker,
    mut stop: oneshot::Receiver<()>,
    metrics: Arc<SinkMetrics>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            tick = ticker.tick() => {
                if tick.is_none() {
                    // clock went away, nothing left to wait for but the stop signal
                    let _ = (&mut stop).await;
                    break;
                }
                let Some(state) = state.upgrade() else {
                    break;
                };
                let mut state = state.lock().await;
                // the buffer keeps the error, the next explicit flush reports it
                if let Err(e) = flush_state(&mut state, &metrics).await {
                    warn!("Periodic flush failed: {}", e);
                }
            }
        }
    }
    ticker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::MemoryWriter;

    fn sink_with(capacity: usize) -> (BufferedSink<MemoryWriter>, MemoryWriter, ManualClock) {
        let writer = MemoryWriter::new();
        let clock = ManualClock::default();
        let sink = BufferedSink::with_clock(
            writer.clone(),
            BufferedSinkConfig::default().with_capacity(capacity),
            Arc::new(clock.clone()),
        );
        (sink, writer, clock)
    }

    #[tokio::test]
    async fn test_lazy_start() {
        let (sink, _writer, clock) = sink_with(64);
        assert_eq!(sink.state().await, SinkState::Uninitialized);
        assert_eq!(clock.active_tickers(), 0);

        sink.accept(b"first\n").await.unwrap();
        assert_eq!(sink.state().await, SinkState::Running);
        assert_eq!(clock.active_tickers(), 1);

        sink.stop().await.unwrap();
        assert_eq!(sink.state().await, SinkState::Stopped);
        assert_eq!(clock.active_tickers(), 0);
    }

    #[tokio::test]
    async fn test_flush_before_first_record_is_noop() {
        let (sink, writer, _clock) = sink_with(64);
        sink.flush().await.unwrap();
        assert_eq!(writer.flushes(), 0);
        assert_eq!(sink.state().await, SinkState::Uninitialized);
    }

    #[tokio::test]
    async fn test_default_levels() {
        let (sink, _writer, _clock) = sink_with(64);
        assert_eq!(
            sink.levels(),
            &[Level::Info, Level::Warn, Level::Error, Level::Fatal]
        );
        assert!(sink.accepts(Level::Warn));
        assert!(!sink.accepts(Level::Debug));
    }

    #[tokio::test]
    async fn test_metrics_follow_records_and_flushes() {
        let (sink, _writer, _clock) = sink_with(64);
        sink.accept(b"abc").await.unwrap();
        sink.accept(b"de").await.unwrap();
        sink.flush().await.unwrap();
        sink.flush().await.unwrap();

        let metrics = sink.metrics();
        assert_eq!(metrics.accepted, 2);
        assert_eq!(metrics.bytes, 5);
        assert_eq!(metrics.delivered, 1);
        assert_eq!(metrics.errors, 0);
    }
}
