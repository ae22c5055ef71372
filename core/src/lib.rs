//! Buffered and queued log sinks.
//!
//! [`BufferedSink`] batches serialized records in memory and writes them to an
//! async byte writer on a timer, when the buffer fills, or on demand.
//! [`QueuedSink`] hands structured entries to a bounded queue drained into a
//! [`Store`] by a single worker. Both implement [`Hook`].

pub mod clock;
pub mod config;
pub mod entry;
pub mod errors;
pub mod level;
pub mod sink;
pub mod store;
pub mod telemetry;
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock, Ticker};
pub use config::{BufferedSinkConfig, QueuedSinkConfig, SinksConfig};
pub use entry::{Entry, Format, Formatter};
pub use errors::{Result, SinkError};
pub use level::Level;
pub use sink::{BufferedSink, Hook, QueuedSink, SinkState};
pub use store::{MemoryStore, Row, Store};
