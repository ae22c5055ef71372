pub mod buffer;
pub mod buffered;
pub mod queued;

use std::future::Future;

use crate::entry::Entry;
use crate::errors::Result;
use crate::level::Level;

pub use buffered::BufferedSink;
pub use queued::QueuedSink;

/// Lifecycle of a sink. Background resources exist only while `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Uninitialized,
    Running,
    Stopped,
}

/// What a logging front-end sees of a sink.
pub trait Hook: Send + Sync {
    /// Levels this sink wants to receive. Fixed once the sink is built.
    fn levels(&self) -> &[Level];

    fn accepts(&self, level: Level) -> bool {
        self.levels().contains(&level)
    }

    /// Hands one entry to the sink.
    fn fire(&self, entry: &Entry) -> impl Future<Output = Result<()>> + Send;
}
