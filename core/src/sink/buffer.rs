use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::{Result, SinkError};

/// A fixed-capacity write buffer in front of an async writer.
///
/// Once the downstream fails, the error is kept and returned by every later
/// `write` and `flush`. Callers that swallow a flush error (the periodic flush
/// loop) rely on this to see it again on the next explicit call.
#[derive(Debug)]
pub struct RecordBuffer<W> {
    inner: W,
    buf: Vec<u8>,
    capacity: usize,
    failed: Option<SinkError>,
}

impl<W: AsyncWrite + Unpin> RecordBuffer<W> {
    /// Wraps `inner`. Memory for the buffer is reserved on first use.
    pub fn new(inner: W, capacity: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            capacity: capacity.max(1),
            failed: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes held and not yet written downstream.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes that can be appended without a flush.
    pub fn available(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn error(&self) -> Option<&SinkError> {
        self.failed.as_ref()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Appends `record`.
    ///
    /// Fills the buffer and flushes it when `record` does not fit, except that
    /// a record arriving at an empty buffer that is larger than the free space
    /// goes straight downstream in one piece.
    pub async fn write(&mut self, record: &[u8]) -> Result<usize> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.buf.capacity() < self.capacity {
            self.buf.reserve_exact(self.capacity - self.buf.len());
        }

        let mut rest = record;
        while rest.len() > self.available() {
            if self.buf.is_empty() {
                // nothing to combine with, skip the copy
                self.write_through(rest).await?;
                return Ok(record.len());
            }
            let n = self.available();
            self.buf.extend_from_slice(&rest[..n]);
            rest = &rest[n..];
            self.flush_buffer().await?;
        }
        self.buf.extend_from_slice(rest);
        Ok(record.len())
    }

    /// Writes out everything buffered, then flushes the downstream writer.
    pub async fn flush(&mut self) -> Result<()> {
        self.flush_buffer().await?;
        if let Err(e) = self.inner.flush().await {
            return Err(self.fail(e));
        }
        Ok(())
    }

    async fn flush_buffer(&mut self) -> Result<()> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        let mut written = 0;
        let mut outcome = Ok(());
        while written < self.buf.len() {
            match self.inner.write(&self.buf[written..]).await {
                Ok(0) => {
                    outcome = Err(std::io::Error::from(std::io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => written += n,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        // keep whatever the writer did not take
        self.buf.drain(..written);

        outcome.map_err(|e| self.fail(e))
    }

    async fn write_through(&mut self, record: &[u8]) -> Result<()> {
        if let Err(e) = self.inner.write_all(record).await {
            return Err(self.fail(e));
        }
        Ok(())
    }

    fn fail(&mut self, err: std::io::Error) -> SinkError {
        let err = SinkError::from(err);
        self.failed = Some(err.clone());
        err
    }
}
