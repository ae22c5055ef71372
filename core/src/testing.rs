//! In-memory downstream writer for exercising sinks without real I/O.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// An `AsyncWrite` that records every write call it receives.
///
/// Clones share state, so a test keeps one handle and hands the other to a sink.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<WriterState>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct WriterState {
    writes: Vec<Vec<u8>>,
    flushes: usize,
    fail_writes: bool,
    fail_flushes: bool,
    max_write: Option<usize>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts at most `n` bytes per write call.
    #[must_use]
    pub fn with_max_write(self, n: usize) -> Self {
        self.lock().max_write = Some(n.max(1));
        self
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn fail_flushes(&self, fail: bool) {
        self.lock().fail_flushes = fail;
    }

    /// Each successful write call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Everything written so far, concatenated.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().writes.concat()
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    /// Waits until at least `count` flushes happened or `timeout` elapsed.
    pub async fn wait_for_flushes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            if self.flushes() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.flushes() >= count;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let result = {
            let mut state = self.lock();
            if state.fail_writes {
                Err(io::Error::other("injected write failure"))
            } else {
                let n = state.max_write.map_or(buf.len(), |max| buf.len().min(max));
                state.writes.push(buf[..n].to_vec());
                Ok(n)
            }
        };
        self.shared.notify.notify_waiters();
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = {
            let mut state = self.lock();
            if state.fail_flushes {
                Err(io::Error::other("injected flush failure"))
            } else {
                state.flushes += 1;
                Ok(())
            }
        };
        self.shared.notify.notify_waiters();
        Poll::Ready(result)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}
