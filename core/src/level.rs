use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Severity of a log entry, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    #[serde(rename = "warning", alias = "warn")]
    Warn,
    Error,
    Fatal,
    Panic,
}

/// Levels a sink accepts when none are configured.
pub const DEFAULT_LEVELS: [Level; 4] = [Level::Info, Level::Warn, Level::Error, Level::Fatal];

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Panic => "panic",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "fatal" => Ok(Level::Fatal),
            "panic" => Ok(Level::Panic),
            other => Err(ConfigError::Invalid {
                message: format!("unknown log level '{}'", other),
            }),
        }
    }
}

/// Resolves a configured allow-list, falling back to [`DEFAULT_LEVELS`] when empty.
pub fn resolve_levels(configured: &[Level]) -> Vec<Level> {
    if configured.is_empty() {
        DEFAULT_LEVELS.to_vec()
    } else {
        configured.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("info".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("WARNING".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warn);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Error < Level::Fatal);
        assert!(Level::Fatal < Level::Panic);
    }

    #[test]
    fn test_resolve_levels_defaults() {
        assert_eq!(resolve_levels(&[]), DEFAULT_LEVELS.to_vec());
        assert_eq!(resolve_levels(&[Level::Debug]), vec![Level::Debug]);
    }

    #[test]
    fn test_serde_names() {
        let levels: Vec<Level> = serde_yaml::from_str("[info, warning, warn, error]").unwrap();
        assert_eq!(levels, vec![Level::Info, Level::Warn, Level::Warn, Level::Error]);
        assert_eq!(serde_json::to_string(&Level::Fatal).unwrap(), "\"fatal\"");
    }

    #[test]
    fn test_serialized_name_matches_display() {
        for level in [Level::Trace, Level::Info, Level::Warn, Level::Panic] {
            let json = serde_json::to_string(&level).unwrap();
            assert_eq!(json, format!("\"{}\"", level));
        }
        assert_eq!(serde_json::to_string(&Level::Warn).unwrap(), "\"warning\"");
    }
}
