// MIDB - GDB Machine Interface Frontend
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Typed representation of one decoded MI output line.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which MI output class a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// `^done`, `^error`, `^running`, `^connected`, `^exit`
    #[serde(rename = "result")]
    Result,
    /// `*stopped`, `*running`
    #[serde(rename = "exec")]
    AsyncExec,
    /// `=thread-group-started`, `=breakpoint-modified`, ...
    #[serde(rename = "notify")]
    AsyncNotify,
    /// `+download`, ...
    #[serde(rename = "status")]
    AsyncStatus,
    /// `~"..."`
    #[serde(rename = "console")]
    ConsoleStream,
    /// `@"..."`
    #[serde(rename = "target")]
    TargetStream,
    /// `&"..."`
    #[serde(rename = "log")]
    LogStream,
    /// A line that is not MI at all, i.e. output of the debugged program
    #[serde(rename = "output")]
    ProgramOutput,
}

impl RecordKind {
    /// Whether records of this kind carry a textual payload rather than a tuple
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            Self::ConsoleStream | Self::TargetStream | Self::LogStream | Self::ProgramOutput
        )
    }

    /// Whether this is one of the asynchronous record classes
    pub fn is_async(self) -> bool {
        matches!(self, Self::AsyncExec | Self::AsyncNotify | Self::AsyncStatus)
    }
}

/// Output stream a record was read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    /// Regular output
    #[default]
    Stdout,
    /// Error output
    Stderr,
}

/// One decoded MI record. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    /// Output class
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Correlation token echoed back by the debugger
    #[serde(default)]
    pub token: Option<u64>,
    /// Result or async class, e.g. `done`, `error`, `stopped`
    #[serde(default)]
    pub message: Option<String>,
    /// Key/value tree for result and async records, a string for streams
    #[serde(default)]
    pub payload: Value,
    /// Stream the record was read from
    #[serde(default)]
    pub stream: Stream,
}

impl ProtocolRecord {
    /// A result record (`^message,payload`)
    pub fn result(token: Option<u64>, message: &str, payload: Value) -> Self {
        Self {
            kind: RecordKind::Result,
            token,
            message: Some(message.to_string()),
            payload,
            stream: Stream::Stdout,
        }
    }

    /// An asynchronous record of the given class
    pub fn async_record(kind: RecordKind, token: Option<u64>, message: &str, payload: Value) -> Self {
        Self { kind, token, message: Some(message.to_string()), payload, stream: Stream::Stdout }
    }

    /// A stream record (console, target, log or program output)
    pub fn stream(kind: RecordKind, text: impl Into<String>) -> Self {
        Self { kind, token: None, message: None, payload: Value::String(text.into()), stream: Stream::Stdout }
    }

    /// Same record read from stderr
    pub fn on_stderr(mut self) -> Self {
        self.stream = Stream::Stderr;
        self
    }

    /// Message of the record, if any
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The payload as a key/value object
    pub fn payload_object(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    /// Whether the payload object has `key`
    pub fn has(&self, key: &str) -> bool {
        self.payload_object().is_some_and(|p| p.contains_key(key))
    }

    /// A payload field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload_object()?.get(key)
    }

    /// A string payload field
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.field(key)?.as_str()
    }

    /// Text of a stream record
    pub fn text(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// `msg` of an error record
    pub fn error_msg(&self) -> Option<&str> {
        self.payload_str("msg")
    }

    /// `^error`, or any record whose message is `error`
    pub fn is_error(&self) -> bool {
        self.message() == Some("error")
    }

    /// `^done`
    pub fn is_done_result(&self) -> bool {
        self.kind == RecordKind::Result && self.message() == Some("done")
    }
}

/// String value of a JSON field, if it is a string
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.as_str()
}

/// Integer value of a field MI transmits as a decimal string
pub(crate) fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_bridge_shape() {
        let raw = r#"{"type":"result","message":"done","payload":{"name":"var1"},"token":3,"stream":"stdout"}"#;
        let record: ProtocolRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.kind, RecordKind::Result);
        assert_eq!(record.token, Some(3));
        assert!(record.is_done_result());
        assert_eq!(record.payload_str("name"), Some("var1"));
    }

    #[test]
    fn test_stream_record_defaults() {
        let raw = r#"{"type":"console","payload":"hello\n"}"#;
        let record: ProtocolRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.kind, RecordKind::ConsoleStream);
        assert_eq!(record.stream, Stream::Stdout);
        assert_eq!(record.message(), None);
        assert_eq!(record.text(), Some("hello\n"));
        assert!(!record.has("anything"));
    }

    #[test]
    fn test_error_accessors() {
        let record = ProtocolRecord::result(Some(1), "error", json!({"msg": "No registers."}));
        assert!(record.is_error());
        assert!(!record.is_done_result());
        assert_eq!(record.error_msg(), Some("No registers."));
    }

    #[test]
    fn test_int_field_accepts_strings_and_numbers() {
        let value = json!({"a": "12", "b": 7, "c": "x"});
        assert_eq!(int_field(&value, "a"), Some(12));
        assert_eq!(int_field(&value, "b"), Some(7));
        assert_eq!(int_field(&value, "c"), None);
        assert_eq!(int_field(&value, "d"), None);
    }
}
