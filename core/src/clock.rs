//! Time sources for the buffered sink.
//!
//! The flush loop never touches the wall clock directly. It asks its [`Clock`]
//! for a [`Ticker`], so tests can swap in a [`ManualClock`] and drive flushes
//! deterministically with [`ManualClock::advance`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// A source of time for a sink.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Returns a ticker that fires every `period`, first after one full period.
    fn new_ticker(&self, period: Duration) -> Ticker;
}

/// Periodic tick events.
///
/// A slow receiver misses ticks rather than catching up on a backlog.
#[derive(Debug)]
pub struct Ticker {
    source: TickSource,
}

#[derive(Debug)]
enum TickSource {
    /// Wall-clock ticks, driven in place by the task that awaits them.
    Interval(Interval),
    /// Ticks pushed by a [`ManualClock`] through a channel of capacity one.
    Channel(mpsc::Receiver<DateTime<Utc>>),
    Stopped,
}

impl Ticker {
    fn from_interval(interval: Interval) -> Self {
        Self {
            source: TickSource::Interval(interval),
        }
    }

    fn from_channel(ticks: mpsc::Receiver<DateTime<Utc>>) -> Self {
        Self {
            source: TickSource::Channel(ticks),
        }
    }

    /// Waits for the next tick. Returns `None` once the ticker is stopped or its
    /// clock has gone away.
    pub async fn tick(&mut self) -> Option<DateTime<Utc>> {
        match &mut self.source {
            TickSource::Interval(interval) => {
                interval.tick().await;
                Some(Utc::now())
            }
            TickSource::Channel(ticks) => ticks.recv().await,
            TickSource::Stopped => None,
        }
    }

    /// Stops delivering ticks. Idempotent.
    pub fn stop(&mut self) {
        if let TickSource::Channel(ticks) = &mut self.source {
            ticks.close();
        }
        self.source = TickSource::Stopped;
    }
}

/// Longest period a wall-clock ticker is armed with.
const MAX_SYSTEM_PERIOD: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Wall-clock time. Stateless, so it can be shared freely.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Must be called inside a tokio runtime.
    fn new_ticker(&self, period: Duration) -> Ticker {
        let period = period.clamp(Duration::from_millis(1), MAX_SYSTEM_PERIOD);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ticker::from_interval(interval)
    }
}

/// A clock that only moves when told to.
///
/// Cloning shares the same underlying time, so a test can keep one handle and
/// give the other to the sink.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug, Default)]
struct ManualState {
    start: DateTime<Utc>,
    elapsed: Duration,
    tickers: Vec<ManualTicker>,
}

#[derive(Debug)]
struct ManualTicker {
    next: Duration,
    period: Duration,
    tx: mpsc::Sender<DateTime<Utc>>,
}

impl ManualState {
    fn at(&self, offset: Duration) -> DateTime<Utc> {
        self.start + chrono::Duration::from_std(offset).unwrap_or_default()
    }
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                start,
                elapsed: Duration::ZERO,
                tickers: Vec::new(),
            })),
        }
    }

    /// Moves time forward, firing every tick that falls due on the way.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.elapsed += by;
        let now = state.elapsed;

        let mut due = Vec::new();
        for ticker in state.tickers.iter_mut() {
            while ticker.next <= now {
                due.push((ticker.tx.clone(), ticker.next));
                ticker.next += ticker.period;
            }
        }
        for (tx, at) in due {
            // a full channel drops the tick, like a slow reader of a real ticker
            let _ = tx.try_send(state.at(at));
        }
        state.tickers.retain(|t| !t.tx.is_closed());
    }

    /// Number of tickers that are still live.
    pub fn active_tickers(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tickers.retain(|t| !t.tx.is_closed());
        state.tickers.len()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.at(state.elapsed)
    }

    fn new_ticker(&self, period: Duration) -> Ticker {
        let period = period.max(Duration::from_nanos(1));
        let (tx, rx) = mpsc::channel(1);

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = state.elapsed + period;
        state.tickers.push(ManualTicker { next, period, tx });

        Ticker::from_channel(rx)
    }
}

/// The clock used when a sink is built without one.
pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
