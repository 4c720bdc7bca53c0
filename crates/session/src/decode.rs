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

//! Wire-level decoder for GDB/MI output lines.
//!
//! Result and async records become JSON objects. Lists drop the `key=`
//! prefixes of their elements (`stack=[frame={..},frame={..}]` becomes an
//! array of objects), and a key repeated inside one tuple folds into an
//! array. C-strings are unescaped, octal escapes included.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::record::{ProtocolRecord, RecordKind, Stream};

/// The prompt gdb prints after every batch of output
pub const PROMPT: &str = "(gdb)";

/// Errors raised while decoding one MI line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The line ended inside a value
    #[error("unexpected end of input")]
    UnexpectedEnd,
    /// A character that cannot start or continue a value
    #[error("unexpected character {found:?} at column {pos}")]
    Unexpected {
        /// Offending character
        found: char,
        /// Byte offset in the line
        pos: usize,
    },
    /// A c-string was not closed
    #[error("unterminated c-string starting at column {0}")]
    UnterminatedString(usize),
}

/// Decode one line of debugger output.
///
/// Returns `Ok(None)` for the prompt and for blank lines.
pub fn decode_line(line: &str) -> Result<Option<ProtocolRecord>, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.trim() == PROMPT {
        return Ok(None);
    }

    let mut cursor = Cursor::new(line);
    let token = cursor.token();

    let kind = match cursor.peek() {
        Some(b'^') => RecordKind::Result,
        Some(b'*') => RecordKind::AsyncExec,
        Some(b'=') => RecordKind::AsyncNotify,
        Some(b'+') => RecordKind::AsyncStatus,
        Some(b'~') if token.is_none() => RecordKind::ConsoleStream,
        Some(b'@') if token.is_none() => RecordKind::TargetStream,
        Some(b'&') if token.is_none() => RecordKind::LogStream,
        _ => return Ok(Some(ProtocolRecord::stream(RecordKind::ProgramOutput, line))),
    };
    cursor.bump();

    if kind.is_stream() {
        let text = cursor.c_string()?;
        return Ok(Some(ProtocolRecord::stream(kind, text)));
    }

    let class = cursor.take_while(|b| b != b',');
    let payload = if cursor.eat(b',') { Value::Object(cursor.results(None)?) } else { Value::Null };

    Ok(Some(ProtocolRecord {
        kind,
        token,
        message: Some(class.to_string()),
        payload,
        stream: Stream::Stdout,
    }))
}

/// Groups decoded lines into one batch per `(gdb)` prompt.
#[derive(Debug, Default)]
pub struct RecordBatcher {
    pending: Vec<ProtocolRecord>,
}

impl RecordBatcher {
    /// Create an empty batcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line; returns a complete batch when the prompt is seen.
    ///
    /// Lines that fail to decode are kept as program output so nothing the
    /// debugger printed is lost.
    pub fn push_line(&mut self, line: &str) -> Option<Vec<ProtocolRecord>> {
        if line.trim() == PROMPT {
            return self.flush();
        }
        match decode_line(line) {
            Ok(Some(record)) => self.pending.push(record),
            Ok(None) => {}
            Err(err) => {
                warn!(%err, line, "Undecodable MI line");
                self.pending.push(ProtocolRecord::stream(RecordKind::ProgramOutput, line));
            }
        }
        None
    }

    /// Take whatever has been collected so far
    pub fn flush(&mut self) -> Option<Vec<ProtocolRecord>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Number of records waiting for a prompt
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no records are waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

struct Cursor<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, bytes: src.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: u8) -> Result<(), DecodeError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.unexpected()),
            None => Err(DecodeError::UnexpectedEnd),
        }
    }

    fn unexpected(&self) -> DecodeError {
        let found = self.src.get(self.pos..).and_then(|rest| rest.chars().next()).unwrap_or('\0');
        DecodeError::Unexpected { found, pos: self.pos }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &src[start..self.pos]
    }

    fn token(&mut self) -> Option<u64> {
        let digits = self.take_while(|b| b.is_ascii_digit());
        if digits.is_empty() {
            None
        } else {
            digits.parse().ok()
        }
    }

    /// `key=value(,key=value)*` until `close` (or the end of the line)
    fn results(&mut self, close: Option<u8>) -> Result<Map<String, Value>, DecodeError> {
        let mut map = Map::new();
        loop {
            if close.is_some() && self.peek() == close {
                break;
            }
            if self.peek().is_none() {
                if close.is_some() {
                    return Err(DecodeError::UnexpectedEnd);
                }
                break;
            }
            let (key, value) = self.result()?;
            fold_insert(&mut map, key, value);
            if !self.eat(b',') {
                break;
            }
        }
        Ok(map)
    }

    fn result(&mut self) -> Result<(String, Value), DecodeError> {
        let key = self.take_while(|b| b != b'=' && b != b',' && b != b'}' && b != b']');
        if key.is_empty() {
            return Err(self.unexpected_or_end());
        }
        self.expect(b'=')?;
        let value = self.value()?;
        Ok((key.to_string(), value))
    }

    fn value(&mut self) -> Result<Value, DecodeError> {
        match self.peek() {
            Some(b'"') => Ok(Value::String(self.c_string()?)),
            Some(b'{') => {
                self.bump();
                let map = self.results(Some(b'}'))?;
                self.expect(b'}')?;
                Ok(Value::Object(map))
            }
            Some(b'[') => {
                self.bump();
                let list = self.list()?;
                self.expect(b']')?;
                Ok(Value::Array(list))
            }
            _ => Err(self.unexpected_or_end()),
        }
    }

    fn list(&mut self) -> Result<Vec<Value>, DecodeError> {
        let mut items = Vec::new();
        while self.peek() != Some(b']') {
            let item = match self.peek() {
                Some(b'"' | b'{' | b'[') => self.value()?,
                Some(_) => self.result()?.1,
                None => return Err(DecodeError::UnexpectedEnd),
            };
            items.push(item);
            if !self.eat(b',') {
                break;
            }
        }
        Ok(items)
    }

    fn c_string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        self.expect(b'"')?;
        let mut out = Vec::new();
        loop {
            let Some(b) = self.bump() else {
                return Err(DecodeError::UnterminatedString(start));
            };
            match b {
                b'"' => break,
                b'\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(DecodeError::UnterminatedString(start));
                    };
                    match esc {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'v' => out.push(0x0b),
                        b'e' => out.push(0x1b),
                        b'0'..=b'7' => {
                            let mut code = u32::from(esc - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        self.pos += 1;
                                        code = code * 8 + u32::from(d - b'0');
                                    }
                                    _ => break,
                                }
                            }
                            out.push((code & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn unexpected_or_end(&self) -> DecodeError {
        if self.peek().is_some() {
            self.unexpected()
        } else {
            DecodeError::UnexpectedEnd
        }
    }
}

fn fold_insert(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        None => {
            map.insert(key, value);
        }
        Some(Value::Array(existing)) => existing.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(line: &str) -> ProtocolRecord {
        decode_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_prompt_and_blank_lines() {
        assert_eq!(decode_line("(gdb) ").unwrap(), None);
        assert_eq!(decode_line("").unwrap(), None);
        assert_eq!(decode_line("\r\n").unwrap(), None);
    }

    #[test]
    fn test_result_with_token() {
        let record = decode(r#"3^done,name="var1",numchild="0",value="10",type="int",has_more="0""#);
        assert_eq!(record.kind, RecordKind::Result);
        assert_eq!(record.token, Some(3));
        assert_eq!(record.message(), Some("done"));
        assert_eq!(record.payload_str("name"), Some("var1"));
        assert_eq!(record.payload_str("type"), Some("int"));
    }

    #[test]
    fn test_result_without_payload() {
        let record = decode("^running");
        assert_eq!(record.message(), Some("running"));
        assert_eq!(record.payload, Value::Null);
        assert_eq!(record.token, None);
    }

    #[test]
    fn test_error_message_unescaped() {
        let record = decode(r#"1^error,msg="No symbol \"foo\" in current context.""#);
        assert!(record.is_error());
        assert_eq!(record.error_msg(), Some("No symbol \"foo\" in current context."));
    }

    #[test]
    fn test_list_of_results_drops_keys() {
        let record = decode(
            r#"^done,stack=[frame={level="0",addr="0x1",func="main",line="5"},frame={level="1",addr="0x2",func="_start"}]"#,
        );
        assert_eq!(
            record.field("stack"),
            Some(&json!([
                {"level": "0", "addr": "0x1", "func": "main", "line": "5"},
                {"level": "1", "addr": "0x2", "func": "_start"}
            ]))
        );
    }

    #[test]
    fn test_children_payload() {
        let record = decode(
            r#"5^done,numchild="2",children=[child={name="var9.a",exp="a",numchild="0",value="4195840",type="int",thread-id="1"},child={name="var9.b",exp="b",numchild="0",value="0",type="float",thread-id="1"}],has_more="0""#,
        );
        let children = record.field("children").and_then(Value::as_array).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1]["name"], "var9.b");
        assert_eq!(children[0]["thread-id"], "1");
        assert!(record.has("has_more") && record.has("numchild"));
    }

    #[test]
    fn test_repeated_keys_fold_into_array() {
        let record = decode(r#"*stopped,reason="breakpoint-hit",thread-id="1",stopped-threads="all",core="0",bkptno="1",bkptno="2""#);
        assert_eq!(record.field("bkptno"), Some(&json!(["1", "2"])));
        assert_eq!(record.kind, RecordKind::AsyncExec);
    }

    #[test]
    fn test_empty_containers() {
        let record = decode(r#"^done,register-names=[],frame={}"#);
        assert_eq!(record.field("register-names"), Some(&json!([])));
        assert_eq!(record.field("frame"), Some(&json!({})));
    }

    #[test]
    fn test_list_of_strings() {
        let record = decode(r#"^done,register-names=["rax","rbx",""]"#);
        assert_eq!(record.field("register-names"), Some(&json!(["rax", "rbx", ""])));
    }

    #[test]
    fn test_stream_records() {
        let console = decode(r#"~"GNU gdb (GDB) 12.1\n""#);
        assert_eq!(console.kind, RecordKind::ConsoleStream);
        assert_eq!(console.text(), Some("GNU gdb (GDB) 12.1\n"));

        let log = decode(r#"&"complete p\n""#);
        assert_eq!(log.kind, RecordKind::LogStream);

        let target = decode(r#"@"hi""#);
        assert_eq!(target.kind, RecordKind::TargetStream);
    }

    #[test]
    fn test_octal_escapes() {
        let record = decode(r#"~"caf\303\251""#);
        assert_eq!(record.text(), Some("café"));
    }

    #[test]
    fn test_notify_record() {
        let record = decode(r#"=thread-group-started,id="i1",pid="4242""#);
        assert_eq!(record.kind, RecordKind::AsyncNotify);
        assert_eq!(record.message(), Some("thread-group-started"));
        assert_eq!(record.payload_str("pid"), Some("4242"));
    }

    #[test]
    fn test_plain_line_is_program_output() {
        let record = decode("Hello from the inferior");
        assert_eq!(record.kind, RecordKind::ProgramOutput);
        assert_eq!(record.text(), Some("Hello from the inferior"));
    }

    #[test]
    fn test_malformed_lines_are_errors() {
        assert_eq!(decode_line(r#"^done,msg="open"#), Err(DecodeError::UnterminatedString(10)));
        assert_eq!(decode_line(r#"^done,frame={a="1""#), Err(DecodeError::UnexpectedEnd));
        assert!(matches!(
            decode_line(r#"^done,a=1"#),
            Err(DecodeError::Unexpected { found: '1', .. })
        ));
    }

    #[test]
    fn test_batcher_groups_by_prompt() {
        let mut batcher = RecordBatcher::new();
        assert!(batcher.push_line(r#"=thread-group-started,id="i1",pid="1""#).is_none());
        assert!(batcher.push_line(r#"*running,thread-id="all""#).is_none());
        assert_eq!(batcher.len(), 2);
        let batch = batcher.push_line("(gdb)").unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batcher.is_empty());
        assert!(batcher.push_line("(gdb)").is_none());
    }

    #[test]
    fn test_batcher_keeps_undecodable_lines() {
        let mut batcher = RecordBatcher::new();
        batcher.push_line(r#"^done,a=1"#);
        let batch = batcher.flush().unwrap();
        assert_eq!(batch[0].kind, RecordKind::ProgramOutput);
    }
}
