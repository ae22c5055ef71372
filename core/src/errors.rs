use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Downstream write failed: {reason}")]
    Write { reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sink is stopped")]
    Closed,

    #[error("Background task failed: {reason}")]
    Worker { reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum SerializationError {
    #[error("JSON serialization failed: {reason}")]
    Json { reason: String },

    #[error("YAML serialization failed: {reason}")]
    Yaml { reason: String },

    #[error("Text formatting failed: {reason}")]
    Text { reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Failed to connect to store: {reason}")]
    Connection { reason: String },

    #[error("Insert into {table} failed: {reason}")]
    Insert { table: String, reason: String },

    #[error("Unsupported value for column {column}: {reason}")]
    UnsupportedValue { column: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SinkError>;

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(SerializationError::Json {
            reason: err.to_string(),
        })
    }
}

impl From<serde_yaml::Error> for SinkError {
    fn from(err: serde_yaml::Error) -> Self {
        SinkError::Serialization(SerializationError::Yaml {
            reason: err.to_string(),
        })
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Write {
            reason: err.to_string(),
        }
    }
}

impl SinkError {
    /// Whether the same call may succeed if repeated later.
    ///
    /// Downstream write failures are sticky inside a buffered sink, so they are
    /// only worth retrying against a fresh sink.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Store(StoreError::Connection { .. }) => true,
            SinkError::Store(StoreError::Insert { .. }) => true,
            SinkError::Config(_) => false,
            SinkError::Serialization(_) => false,
            SinkError::Closed => false,
            SinkError::Write { .. } => false,
            _ => false,
        }
    }

    /// Whether the error concerns only the record at hand, leaving the sink usable.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            SinkError::Serialization(_)
                | SinkError::Store(StoreError::UnsupportedValue { .. })
        )
    }
}
