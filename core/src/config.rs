use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::entry::{Format, Formatter};
use crate::errors::ConfigError;
use crate::level::Level;

pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;
pub const DEFAULT_AUDIT_TABLE: &str = "operations_audit";

/// Environment variable holding the YAML config when no file is given.
pub const CONFIG_ENV_VAR: &str = "HOOK_CONFIG";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SinksConfig {
    #[serde(default)]
    pub buffered: Option<BufferedSinkConfig>,
    #[serde(default)]
    pub queued: Option<QueuedSinkConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferedSinkConfig {
    /// Bytes held in memory before a flush is forced. Zero means the default.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// How often buffered data is flushed when nobody else flushes it.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub disable_timestamp: bool,
    /// Levels routed to this sink. Empty means info, warning, error and fatal.
    #[serde(default)]
    pub levels: Vec<Level>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueuedSinkConfig {
    /// Entries waiting for the worker before producers block.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub levels: Vec<Level>,
}

fn default_capacity() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_flush_interval_ms() -> u64 {
    duration_to_ms(DEFAULT_FLUSH_INTERVAL)
}

/// Whole milliseconds, rounded up so a non-zero duration never becomes zero.
fn duration_to_ms(duration: Duration) -> u64 {
    if duration.is_zero() {
        return 0;
    }
    let ms = duration.as_millis() + u128::from(duration.subsec_nanos() % 1_000_000 != 0);
    u64::try_from(ms).unwrap_or(u64::MAX)
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_table() -> String {
    DEFAULT_AUDIT_TABLE.to_string()
}

impl Default for BufferedSinkConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_SIZE,
            flush_interval_ms: default_flush_interval_ms(),
            format: Format::Text,
            disable_timestamp: false,
            levels: Vec::new(),
        }
    }
}

impl BufferedSinkConfig {
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = duration_to_ms(interval);
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn without_timestamp(mut self) -> Self {
        self.disable_timestamp = true;
        self
    }

    #[must_use]
    pub fn with_levels(mut self, levels: Vec<Level>) -> Self {
        self.levels = levels;
        self
    }

    /// Capacity with the zero value replaced by the default.
    pub fn effective_capacity(&self) -> usize {
        if self.capacity == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.capacity
        }
    }

    /// Flush interval with the zero value replaced by the default.
    pub fn flush_interval(&self) -> Duration {
        if self.flush_interval_ms == 0 {
            DEFAULT_FLUSH_INTERVAL
        } else {
            Duration::from_millis(self.flush_interval_ms)
        }
    }

    pub fn formatter(&self) -> Formatter {
        Formatter::new(self.format, self.disable_timestamp)
    }
}

impl Default for QueuedSinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            table: DEFAULT_AUDIT_TABLE.to_string(),
            levels: Vec::new(),
        }
    }
}

impl QueuedSinkConfig {
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn with_levels(mut self, levels: Vec<Level>) -> Self {
        self.levels = levels;
        self
    }

    pub fn effective_queue_capacity(&self) -> usize {
        if self.queue_capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            self.queue_capacity
        }
    }

    /// The table name ends up verbatim in SQL, so only plain identifiers pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.table.is_empty() {
            return Err(ConfigError::MissingField {
                field: "table".to_string(),
            });
        }
        if !is_identifier(&self.table) {
            return Err(ConfigError::ValidationFailed {
                reason: format!("table name '{}' is not a plain identifier", self.table),
            });
        }
        Ok(())
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub async fn load_config(config_path: Option<&str>) -> anyhow::Result<SinksConfig> {
    match config_path {
        Some(path) => SinksConfig::from_file(path),
        None => SinksConfig::from_env(),
    }
}

impl SinksConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SinksConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config_str = std::env::var(CONFIG_ENV_VAR)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", CONFIG_ENV_VAR))?;
        let config: SinksConfig = serde_yaml::from_str(&config_str)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.buffered.is_none() && self.queued.is_none() {
            return Err(anyhow::anyhow!("At least one sink must be configured"));
        }
        if let Some(queued) = &self.queued {
            queued.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_buffered_defaults() {
        let config = BufferedSinkConfig::default();
        assert_eq!(config.effective_capacity(), 256 * 1024);
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.format, Format::Text);
        assert!(config.levels.is_empty());
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = BufferedSinkConfig::default()
            .with_capacity(0)
            .with_flush_interval(Duration::ZERO);
        assert_eq!(config.effective_capacity(), DEFAULT_BUFFER_SIZE);
        assert_eq!(config.flush_interval(), DEFAULT_FLUSH_INTERVAL);

        let queued = QueuedSinkConfig::default().with_queue_capacity(0);
        assert_eq!(queued.effective_queue_capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_sub_millisecond_interval_rounds_up() {
        let config = BufferedSinkConfig::default().with_flush_interval(Duration::from_micros(500));
        assert_eq!(config.flush_interval_ms, 1);
        assert_eq!(config.flush_interval(), Duration::from_millis(1));

        let config = BufferedSinkConfig::default().with_flush_interval(Duration::from_micros(1500));
        assert_eq!(config.flush_interval(), Duration::from_millis(2));
    }

    #[test]
    fn test_huge_interval_saturates() {
        let config = BufferedSinkConfig::default().with_flush_interval(Duration::MAX);
        assert_eq!(config.flush_interval_ms, u64::MAX);
        assert_eq!(config.flush_interval(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_chained_builders() {
        let config = BufferedSinkConfig::default()
            .with_capacity(1024)
            .with_flush_interval(Duration::from_millis(250))
            .with_format(Format::Json)
            .without_timestamp()
            .with_levels(vec![Level::Error]);

        assert_eq!(config.capacity, 1024);
        assert_eq!(config.flush_interval_ms, 250);
        assert_eq!(config.format, Format::Json);
        assert!(config.disable_timestamp);
        assert_eq!(config.levels, vec![Level::Error]);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
buffered:
  capacity: 4096
  flush_interval_ms: 500
  format: json
  levels: [info, warning]
queued:
  table: request_audit
"#;
        let config: SinksConfig = serde_yaml::from_str(yaml).unwrap();

        let buffered = config.buffered.as_ref().unwrap();
        assert_eq!(buffered.capacity, 4096);
        assert_eq!(buffered.flush_interval(), Duration::from_millis(500));
        assert_eq!(buffered.format, Format::Json);
        assert_eq!(buffered.levels, vec![Level::Info, Level::Warn]);

        let queued = config.queued.as_ref().unwrap();
        assert_eq!(queued.table, "request_audit");
        assert_eq!(queued.queue_capacity, DEFAULT_QUEUE_CAPACITY);

        config.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_a_sink() {
        let config = SinksConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_table_names() {
        for table in ["", "audit; DROP TABLE users", "1audit", "audit-log"] {
            let config = QueuedSinkConfig::default().with_table(table);
            assert!(config.validate().is_err(), "table '{}' should be rejected", table);
        }
        assert!(QueuedSinkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "buffered:\n  capacity: 128").unwrap();

        let config = SinksConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.buffered.unwrap().capacity, 128);
        assert!(config.queued.is_none());
    }

    #[test]
    fn test_from_file_missing() {
        assert!(SinksConfig::from_file("/nonexistent/hooks.yaml").is_err());
    }
}
