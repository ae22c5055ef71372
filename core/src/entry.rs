use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{Result, SerializationError};
use crate::level::Level;

/// A structured log entry as handed over by a logging front-end.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub level: Level,
    pub time: DateTime<Utc>,
    pub message: String,
    /// Structured fields, kept ordered so serialized output is stable.
    pub fields: BTreeMap<String, Value>,
}

impl Entry {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            time: Utc::now(),
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Output encoding for entries written by the buffered sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// `time=... level=info msg=... key=value`, one entry per line.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

const TIME_KEY: &str = "time";
const LEVEL_KEY: &str = "level";
const MESSAGE_KEY: &str = "msg";

/// Serializes entries into the bytes a buffered sink accepts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter {
    pub format: Format,
    pub disable_timestamp: bool,
}

impl Formatter {
    pub fn new(format: Format, disable_timestamp: bool) -> Self {
        Self {
            format,
            disable_timestamp,
        }
    }

    pub fn format(&self, entry: &Entry) -> Result<Vec<u8>> {
        match self.format {
            Format::Text => self.format_text(entry),
            Format::Json => self.format_json(entry),
        }
    }

    fn format_text(&self, entry: &Entry) -> Result<Vec<u8>> {
        let mut line = String::with_capacity(64 + entry.message.len());

        let append = |line: &mut String, key: &str, value: &str| -> std::fmt::Result {
            if !line.is_empty() {
                line.push(' ');
            }
            if needs_quoting(value) {
                write!(line, "{}={:?}", key, value)
            } else {
                write!(line, "{}={}", key, value)
            }
        };

        let render = |line: &mut String| -> std::fmt::Result {
            if !self.disable_timestamp {
                append(line, TIME_KEY, &format_time(&entry.time))?;
            }
            append(line, LEVEL_KEY, entry.level.as_str())?;
            append(line, MESSAGE_KEY, &entry.message)?;
            for (key, value) in &entry.fields {
                let key = field_key(key);
                match value {
                    Value::String(s) => append(line, &key, s)?,
                    other => append(line, &key, &other.to_string())?,
                }
            }
            Ok(())
        };

        render(&mut line).map_err(|e| SerializationError::Text {
            reason: e.to_string(),
        })?;
        line.push('\n');
        Ok(line.into_bytes())
    }

    fn format_json(&self, entry: &Entry) -> Result<Vec<u8>> {
        let mut object = serde_json::Map::with_capacity(entry.fields.len() + 3);
        for (key, value) in &entry.fields {
            object.insert(field_key(key).into_owned(), value.clone());
        }
        if !self.disable_timestamp {
            object.insert(TIME_KEY.to_string(), Value::String(format_time(&entry.time)));
        }
        object.insert(LEVEL_KEY.to_string(), Value::String(entry.level.as_str().to_string()));
        object.insert(MESSAGE_KEY.to_string(), Value::String(entry.message.clone()));

        let mut bytes = serde_json::to_vec(&Value::Object(object))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// User fields never shadow the envelope keys.
fn field_key(key: &str) -> Cow<'_, str> {
    match key {
        TIME_KEY | LEVEL_KEY | MESSAGE_KEY => Cow::Owned(format!("fields.{}", key)),
        _ => Cow::Borrowed(key),
    }
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/' | '@' | '^' | '+'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_entry() -> Entry {
        Entry::new(Level::Info, "test2")
            .with_time(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_text_without_timestamp() {
        let formatter = Formatter::new(Format::Text, true);
        let bytes = formatter.format(&sample_entry()).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "level=info msg=test2\n");
    }

    #[test]
    fn test_text_warning_level_name() {
        let formatter = Formatter::new(Format::Text, true);
        let entry = Entry::new(Level::Warn, "test3");
        let bytes = formatter.format(&entry).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "level=warning msg=test3\n");
    }

    #[test]
    fn test_text_quotes_and_sorts_fields() {
        let formatter = Formatter::default();
        let entry = sample_entry()
            .with_field("user", "test name")
            .with_field("status", 200)
            .with_field("path", "/api/v1");

        let line = String::from_utf8(formatter.format(&entry).unwrap()).unwrap();
        assert_eq!(
            line,
            "time=\"2024-03-01T12:00:00.000Z\" level=info msg=test2 path=/api/v1 status=200 user=\"test name\"\n"
        );
    }

    #[test]
    fn test_text_prefixes_clashing_fields() {
        let formatter = Formatter::new(Format::Text, true);
        let entry = Entry::new(Level::Info, "real")
            .with_field("msg", "shadow")
            .with_field("level", "debug");

        let line = String::from_utf8(formatter.format(&entry).unwrap()).unwrap();
        assert_eq!(
            line,
            "level=info msg=real fields.level=debug fields.msg=shadow\n"
        );
        assert_eq!(line.matches(" msg=").count(), 1);
    }

    #[test]
    fn test_text_quotes_empty_message() {
        let formatter = Formatter::new(Format::Text, true);
        let entry = Entry::new(Level::Error, "");
        let line = String::from_utf8(formatter.format(&entry).unwrap()).unwrap();
        assert_eq!(line, "level=error msg=\"\"\n");
    }

    #[test]
    fn test_json_envelope_and_clashing_fields() {
        let formatter = Formatter::new(Format::Json, false);
        let entry = sample_entry()
            .with_field("uid", "12121")
            .with_field("msg", "shadow");

        let bytes = formatter.format(&entry).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["msg"], "test2");
        assert_eq!(value["fields.msg"], "shadow");
        assert_eq!(value["uid"], "12121");
        assert_eq!(value["level"], "info");
        assert_eq!(value["time"], "2024-03-01T12:00:00.000Z");
    }

    #[test]
    fn test_format_from_yaml() {
        let format: Format = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, Format::Json);
        assert_eq!(Format::default(), Format::Text);
    }
}
