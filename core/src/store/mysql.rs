use serde_json::Value;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::{debug, info};

use crate::config::is_identifier;
use crate::errors::StoreError;
use crate::store::{Row, Store, TIME_COLUMN};

/// Inserts rows into MySQL, one statement per row.
///
/// Columns are taken from the row itself, so the target table must already
/// have a column for every field that producers attach, plus `time`.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection {
                reason: e.to_string(),
            })?;

        info!("Connected to MySQL with up to {} connections", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

impl Store for MySqlStore {
    async fn insert(&self, table: &str, row: Row) -> Result<(), StoreError> {
        let sql = insert_statement(table, &row)?;

        let mut query = sqlx::query(&sql);
        for value in row.fields.values() {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else if let Some(u) = n.as_u64() {
                        query.bind(u)
                    } else {
                        query.bind(n.as_f64())
                    }
                }
                Value::String(s) => query.bind(s.as_str()),
                // arrays and objects land as JSON text
                other => query.bind(other.to_string()),
            };
        }
        query = query.bind(row.time);

        query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Insert {
                table: table.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Inserted row with {} fields into {}", row.fields.len(), table);
        Ok(())
    }
}

fn insert_statement(table: &str, row: &Row) -> Result<String, StoreError> {
    if !is_identifier(table) {
        return Err(StoreError::Insert {
            table: table.to_string(),
            reason: "table name is not a plain identifier".to_string(),
        });
    }
    for column in row.fields.keys() {
        if !is_identifier(column) {
            return Err(StoreError::UnsupportedValue {
                column: column.clone(),
                reason: "column name is not a plain identifier".to_string(),
            });
        }
    }

    let columns = row
        .fields
        .keys()
        .map(String::as_str)
        .chain(std::iter::once(TIME_COLUMN))
        .map(|c| format!("`{}`", c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; row.fields.len() + 1].join(", ");

    Ok(format!(
        "INSERT INTO `{}` ({}) VALUES ({})",
        table, columns, placeholders
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::level::Level;

    #[test]
    fn test_insert_statement() {
        let row = Row::from(
            Entry::new(Level::Info, "")
                .with_field("user", "test name")
                .with_field("status", 200),
        );

        let sql = insert_statement("operations_audit", &row).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `operations_audit` (`status`, `user`, `time`) VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn test_insert_statement_rejects_odd_columns() {
        let row = Row::from(Entry::new(Level::Info, "").with_field("user name", "x"));
        let err = insert_statement("operations_audit", &row).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedValue { .. }));
    }
}
