#[cfg(feature = "mysql")]
pub mod mysql;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::entry::Entry;
use crate::errors::StoreError;

/// Column that carries the entry timestamp in every row.
pub const TIME_COLUMN: &str = "time";

/// One row handed to a [`Store`]: the entry's fields plus its timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub time: DateTime<Utc>,
    /// Never contains [`TIME_COLUMN`].
    pub fields: BTreeMap<String, Value>,
}

impl Row {
    /// Column names in insertion order, the time column last.
    pub fn column_names(&self) -> Vec<&str> {
        self.fields
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(TIME_COLUMN))
            .collect()
    }
}

impl From<Entry> for Row {
    /// The message and level are not part of the row. A field named like the
    /// time column is replaced by the entry timestamp.
    fn from(entry: Entry) -> Self {
        let mut fields = entry.fields;
        fields.remove(TIME_COLUMN);
        Self {
            time: entry.time,
            fields,
        }
    }
}

/// The destination of the queued sink: one insert per entry.
pub trait Store: Send + Sync + 'static {
    fn insert(&self, table: &str, row: Row) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Keeps inserted rows in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<(String, Row)>,
    fail: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following insert fail until switched off again.
    pub fn fail_inserts(&self, fail: bool) {
        self.lock().fail = fail;
    }

    pub fn rows(&self) -> Vec<Row> {
        self.lock().rows.iter().map(|(_, row)| row.clone()).collect()
    }

    pub fn rows_in(&self, table: &str) -> Vec<Row> {
        self.lock()
            .rows
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, row)| row.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    async fn insert(&self, table: &str, row: Row) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.fail {
            return Err(StoreError::Insert {
                table: table.to_string(),
                reason: "injected insert failure".to_string(),
            });
        }
        state.rows.push((table.to_string(), row));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use chrono::TimeZone;

    #[test]
    fn test_row_from_entry_overwrites_time_field() {
        let time = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let entry = Entry::new(Level::Info, "ignored")
            .with_time(time)
            .with_field("user", "test name")
            .with_field("status", 200)
            .with_field("time", "user supplied");

        let row = Row::from(entry);
        assert_eq!(row.time, time);
        assert!(!row.fields.contains_key(TIME_COLUMN));
        assert_eq!(row.fields["user"], "test name");
        assert_eq!(row.column_names(), vec!["status", "user", "time"]);
    }

    #[tokio::test]
    async fn test_memory_store_insert_and_failure() {
        let store = MemoryStore::new();
        let row = Row::from(Entry::new(Level::Info, "a").with_field("uid", "1"));

        store.insert("audit", row.clone()).await.unwrap();
        assert_eq!(store.rows_in("audit"), vec![row.clone()]);
        assert!(store.rows_in("other").is_empty());

        store.fail_inserts(true);
        let err = store.insert("audit", row).await.unwrap_err();
        assert!(matches!(err, StoreError::Insert { .. }));
        assert_eq!(store.len(), 1);
    }
}
