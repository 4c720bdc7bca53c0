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

//! Sparse source and assembly cache.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    hash::Hash,
    ops::{Deref, DerefMut},
    path::Path,
};

use chrono::{DateTime, Local};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A cache map that tracks three states for each key:
/// 1. Key not in map = Not fetched
/// 2. Key maps to Some(V) = Fetched with valid value
/// 3. Key maps to None = Fetched but no valid value
#[derive(Debug, Clone)]
pub struct FetchCache<K, V> {
    data: HashMap<K, Option<V>>,
}

impl<K, V> Deref for FetchCache<K, V> {
    type Target = HashMap<K, Option<V>>;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl<K, V> DerefMut for FetchCache<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<'a, K, V> IntoIterator for &'a FetchCache<K, V> {
    type Item = (&'a K, &'a Option<V>);
    type IntoIter = std::collections::hash_map::Iter<'a, K, Option<V>>;
    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl<K, V> FetchCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// An empty cache
    pub fn new() -> Self {
        Self { data: HashMap::new() }
    }

    /// Check if the cache has an entry for the given key
    pub fn has_cached(&self, key: &K) -> bool {
        self.data.contains_key(key)
    }

    /// The value, if it was fetched successfully
    pub fn fetched(&self, key: &K) -> Option<&V> {
        self.data.get(key)?.as_ref()
    }

    /// Whether fetching the key already failed
    pub fn is_negative(&self, key: &K) -> bool {
        matches!(self.data.get(key), Some(None))
    }

    /// Record a failed fetch
    pub fn mark_negative(&mut self, key: K) {
        self.data.insert(key, None);
    }

    /// Drop every successful entry, keeping the failures
    pub fn retain_negative(&mut self) {
        self.data.retain(|_, v| v.is_none());
    }
}

impl<K, V> Default for FetchCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// One disassembled instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsmInstruction {
    /// Address, as printed (`0x...`)
    pub address: String,
    /// Enclosing function
    #[serde(rename = "func-name", default)]
    pub func_name: Option<String>,
    /// Offset into the function
    #[serde(default)]
    pub offset: Option<String>,
    /// Instruction text
    #[serde(default)]
    pub inst: Option<String>,
    /// Raw opcode bytes, in modes that print them
    #[serde(default)]
    pub opcodes: Option<String>,
}

impl AsmInstruction {
    /// Numeric address
    pub fn addr(&self) -> Option<u64> {
        parse_address(&self.address)
    }
}

/// One `src_and_asm_line` entry of a source-interleaved disassembly
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceAsmLine {
    /// Line number, as transmitted
    pub line: String,
    /// File name as compiled
    #[serde(default)]
    pub file: Option<String>,
    /// Absolute path of the file
    #[serde(default)]
    pub fullname: Option<String>,
    /// Instructions generated for the line
    #[serde(default)]
    pub line_asm_insn: Vec<AsmInstruction>,
}

/// Cached content of one source file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceFile {
    /// Absolute path
    pub fullname: String,
    /// Fetched lines, 1-based
    pub lines: BTreeMap<u32, String>,
    /// Instructions per line
    pub assembly: BTreeMap<u32, Vec<AsmInstruction>>,
    /// Total number of lines in the file, once known
    pub num_lines: Option<u32>,
    /// Modification time of the file when it was read
    #[serde(skip)]
    pub last_modified: Option<DateTime<Local>>,
}

impl SourceFile {
    fn new(fullname: &str) -> Self {
        Self { fullname: fullname.to_string(), ..Default::default() }
    }
}

/// Read `[start_line, end_line]` of a file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceJob {
    /// Absolute path
    pub fullname: String,
    /// First requested line, 1-based
    pub start_line: u32,
    /// Last requested line
    pub end_line: u32,
}

/// Lines read for a [`SourceJob`]
#[derive(Debug, Clone, PartialEq)]
pub struct SourceWindow {
    /// Absolute path
    pub fullname: String,
    /// Line number of `lines[0]`
    pub start_line: u32,
    /// Last line returned
    pub end_line: u32,
    /// Total number of lines in the file
    pub num_lines: u32,
    /// The lines, without terminators
    pub lines: Vec<String>,
    /// Modification time of the file
    pub last_modified: Option<DateTime<Local>>,
}

impl SourceWindow {
    /// Cut the requested window out of a file's text
    pub fn from_text(job: &SourceJob, text: &str, last_modified: Option<DateTime<Local>>) -> Self {
        let all: Vec<&str> = text.split('\n').collect();
        let num_lines = all.len() as u32;
        let start_line = job.start_line.max(1);
        let end_line = job.end_line.min(num_lines);
        let lines = if start_line <= end_line {
            all[(start_line - 1) as usize..end_line as usize].iter().map(|l| l.to_string()).collect()
        } else {
            Vec::new()
        };
        Self { fullname: job.fullname.clone(), start_line, end_line, num_lines, lines, last_modified }
    }
}

/// Read the window a [`SourceJob`] asks for
pub async fn read_source_window(job: &SourceJob) -> Result<SourceWindow> {
    let bytes = tokio::fs::read(&job.fullname)
        .await
        .wrap_err_with(|| format!("Failed to read {}", job.fullname))?;
    // Files in legacy encodings are still shown, with U+FFFD for bad bytes
    let text = String::from_utf8_lossy(&bytes);
    let last_modified = tokio::fs::metadata(&job.fullname)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Local>::from);
    Ok(SourceWindow::from_text(job, &text, last_modified))
}

/// Parse an address printed as `0x...` (or plain decimal)
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => {
            let end = hex.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(hex.len());
            u64::from_str_radix(&hex[..end], 16).ok()
        }
        None => text.parse().ok(),
    }
}

/// Whether a path can ever be read: only absolute paths are
pub fn is_resolvable_path(fullname: &str) -> bool {
    Path::new(fullname).has_root()
}

/// What the cache knows about disassembly at an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    /// A fetched range covers the address
    Cached,
    /// Fetching this address failed before
    Unfetchable,
    /// Never fetched
    Unknown,
}

/// All cached source and assembly of a session
#[derive(Debug, Clone, Default)]
pub struct SourceCache {
    files: HashMap<String, SourceFile>,
    missing: HashSet<String>,
    being_fetched: HashSet<String>,
    raw: FetchCache<u64, Vec<AsmInstruction>>,
    raw_addr_being_fetched: Option<u64>,
}

impl SourceCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// A cached file
    pub fn file(&self, fullname: &str) -> Option<&SourceFile> {
        self.files.get(fullname)
    }

    /// Whether the line of the file has been fetched
    pub fn is_line_cached(&self, fullname: &str, line: u32) -> bool {
        self.files.get(fullname).is_some_and(|f| f.lines.contains_key(&line))
    }

    /// Whether instructions for the line have been fetched
    pub fn has_assembly(&self, fullname: &str, line: u32) -> bool {
        self.files.get(fullname).is_some_and(|f| f.assembly.contains_key(&line))
    }

    /// Line count of the file, if known
    pub fn num_lines(&self, fullname: &str) -> Option<u32> {
        self.files.get(fullname)?.num_lines
    }

    /// Whether the file can never be read
    pub fn is_missing(&self, fullname: &str) -> bool {
        self.missing.contains(fullname)
    }

    /// Remember that the file can never be read
    pub fn mark_missing(&mut self, fullname: &str) {
        debug!(%fullname, "Marking source file missing");
        self.being_fetched.remove(fullname);
        self.missing.insert(fullname.to_string());
    }

    /// Files known to be missing
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.missing.iter().map(String::as_str)
    }

    /// Whether a read of the file is outstanding
    pub fn is_being_fetched(&self, fullname: &str) -> bool {
        self.being_fetched.contains(fullname)
    }

    /// Note an outstanding read. Returns false if one already was.
    pub fn begin_fetch(&mut self, fullname: &str) -> bool {
        self.being_fetched.insert(fullname.to_string())
    }

    /// Merge lines read from disk. Lines already cached are kept as they are.
    pub fn save_source(&mut self, window: SourceWindow) {
        self.being_fetched.remove(&window.fullname);
        let file = self.files.entry(window.fullname.clone()).or_insert_with(|| SourceFile::new(&window.fullname));
        for (line, text) in (window.start_line..).zip(window.lines) {
            file.lines.entry(line).or_insert(text);
        }
        file.num_lines = Some(window.num_lines);
        if window.last_modified.is_some() {
            file.last_modified = window.last_modified;
        }
        debug!(fullname = %window.fullname, start = window.start_line, end = window.end_line, "Cached source lines");
    }

    /// Merge a source-interleaved disassembly, keyed by the file of its
    /// first entry. Existing instructions for a line are replaced.
    pub fn save_file_assembly(&mut self, lines: Vec<SourceAsmLine>) -> Option<String> {
        let fullname = lines.first()?.fullname.clone()?;
        let file = self.files.entry(fullname.clone()).or_insert_with(|| SourceFile::new(&fullname));
        for entry in lines {
            match entry.line.trim().parse::<u32>() {
                Ok(line) => {
                    file.assembly.insert(line, entry.line_asm_insn);
                }
                Err(_) => debug!(line = %entry.line, "Skipping disassembly entry without line"),
            }
        }
        Some(fullname)
    }

    /// Store instructions disassembled from a bare address
    pub fn save_raw_disassembly(&mut self, start: u64, instructions: Vec<AsmInstruction>) {
        if self.raw_addr_being_fetched == Some(start) {
            self.raw_addr_being_fetched = None;
        }
        self.raw.insert(start, Some(instructions));
    }

    /// Note an outstanding raw disassembly
    pub fn begin_raw_fetch(&mut self, addr: u64) {
        self.raw_addr_being_fetched = Some(addr);
    }

    /// Address whose raw disassembly is outstanding
    pub fn raw_addr_being_fetched(&self) -> Option<u64> {
        self.raw_addr_being_fetched
    }

    /// The outstanding raw disassembly failed; never retry it automatically
    pub fn mark_raw_fetch_failed(&mut self) -> Option<u64> {
        let addr = self.raw_addr_being_fetched.take()?;
        debug!(addr = format_args!("{addr:#x}"), "Marking address as unfetchable");
        self.raw.mark_negative(addr);
        Some(addr)
    }

    /// What is known about disassembly at `addr`
    pub fn raw_status(&self, addr: u64) -> RawStatus {
        if self.raw.is_negative(&addr) {
            return RawStatus::Unfetchable;
        }
        if self.raw_instructions_for(addr).is_some() {
            return RawStatus::Cached;
        }
        RawStatus::Unknown
    }

    /// The fetched range containing `addr`
    pub fn raw_instructions_for(&self, addr: u64) -> Option<&[AsmInstruction]> {
        if let Some(insns) = self.raw.fetched(&addr) {
            return Some(insns);
        }
        self.raw
            .values()
            .flatten()
            .find(|insns| insns.iter().any(|i| i.addr() == Some(addr)))
            .map(Vec::as_slice)
    }

    /// Forget all disassembly, including addresses that failed before
    pub fn clear_cached_assembly(&mut self) {
        for file in self.files.values_mut() {
            file.assembly.clear();
        }
        self.raw.clear();
        self.raw_addr_being_fetched = None;
    }

    /// Forget raw disassembly but keep remembering failed addresses
    pub fn clear_raw_disassembly(&mut self) {
        self.raw.retain_negative();
        self.raw_addr_being_fetched = None;
    }

    /// Drop every cached file; known-missing paths stay missing
    pub fn refresh(&mut self) {
        self.files.clear();
        self.being_fetched.clear();
    }

    /// Paths with cached content
    pub fn cached_files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn job(path: &str, start: u32, end: u32) -> SourceJob {
        SourceJob { fullname: path.to_string(), start_line: start, end_line: end }
    }

    fn insn(addr: &str) -> AsmInstruction {
        AsmInstruction {
            address: addr.to_string(),
            func_name: Some("main".into()),
            offset: Some("0".into()),
            inst: Some("nop".into()),
            opcodes: None,
        }
    }

    #[test]
    fn test_window_clamps_to_file() {
        let text = "one\ntwo\nthree";
        let window = SourceWindow::from_text(&job("/a.c", 0, 10), text, None);
        assert_eq!(window.start_line, 1);
        assert_eq!(window.end_line, 3);
        assert_eq!(window.num_lines, 3);
        assert_eq!(window.lines, vec!["one", "two", "three"]);

        let empty = SourceWindow::from_text(&job("/a.c", 5, 9), text, None);
        assert!(empty.lines.is_empty());
    }

    #[test]
    fn test_merge_never_overwrites() {
        let mut cache = SourceCache::new();
        cache.save_source(SourceWindow::from_text(&job("/a.c", 1, 2), "old1\nold2\nold3", None));
        cache.save_source(SourceWindow::from_text(&job("/a.c", 2, 3), "new1\nnew2\nnew3", None));
        let file = cache.file("/a.c").unwrap();
        assert_eq!(file.lines.get(&2).map(String::as_str), Some("old2"));
        assert_eq!(file.lines.get(&3).map(String::as_str), Some("new3"));
        assert_eq!(cache.num_lines("/a.c"), Some(3));
        assert!(cache.is_line_cached("/a.c", 1));
        assert!(!cache.is_line_cached("/b.c", 1));
    }

    #[test]
    fn test_fetch_bookkeeping() {
        let mut cache = SourceCache::new();
        assert!(cache.begin_fetch("/a.c"));
        assert!(!cache.begin_fetch("/a.c"));
        assert!(cache.is_being_fetched("/a.c"));
        cache.mark_missing("/a.c");
        assert!(!cache.is_being_fetched("/a.c"));
        assert!(cache.is_missing("/a.c"));

        cache.refresh();
        assert!(cache.is_missing("/a.c"));
    }

    #[test]
    fn test_raw_negative_cache() {
        let mut cache = SourceCache::new();
        cache.begin_raw_fetch(0x1000);
        assert_eq!(cache.mark_raw_fetch_failed(), Some(0x1000));
        assert_eq!(cache.raw_status(0x1000), RawStatus::Unfetchable);
        assert_eq!(cache.raw_addr_being_fetched(), None);

        cache.save_raw_disassembly(0x2000, vec![insn("0x0000000000002000"), insn("0x0000000000002004")]);
        assert_eq!(cache.raw_status(0x2004), RawStatus::Cached);
        assert_eq!(cache.raw_status(0x3000), RawStatus::Unknown);

        cache.clear_raw_disassembly();
        assert_eq!(cache.raw_status(0x2004), RawStatus::Unknown);
        assert_eq!(cache.raw_status(0x1000), RawStatus::Unfetchable);

        cache.clear_cached_assembly();
        assert_eq!(cache.raw_status(0x1000), RawStatus::Unknown);
    }

    #[test]
    fn test_file_assembly_keyed_by_first_fullname() {
        let mut cache = SourceCache::new();
        let lines: Vec<SourceAsmLine> = serde_json::from_value(serde_json::json!([
            {"line": "3", "file": "a.c", "fullname": "/src/a.c", "line_asm_insn": [
                {"address": "0x401000", "func-name": "main", "offset": "0", "inst": "push %rbp"}
            ]},
            {"line": "4", "file": "a.c", "fullname": "/src/a.c", "line_asm_insn": []}
        ]))
        .unwrap();
        assert_eq!(cache.save_file_assembly(lines).as_deref(), Some("/src/a.c"));
        assert!(cache.has_assembly("/src/a.c", 3));
        assert!(cache.has_assembly("/src/a.c", 4));
        assert_eq!(cache.file("/src/a.c").unwrap().assembly[&3][0].addr(), Some(0x401000));
        assert_eq!(cache.save_file_assembly(Vec::new()), None);
    }

    #[test]
    fn test_address_helpers() {
        assert_eq!(parse_address("0x00007ffff7dd1000"), Some(0x7ffff7dd1000));
        assert_eq!(parse_address("4096"), Some(4096));
        assert_eq!(parse_address("main"), None);
        assert!(is_resolvable_path("/usr/src/a.c"));
        assert!(!is_resolvable_path("a.c"));
    }

    #[tokio::test]
    async fn test_read_source_window_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 1..=100 {
            writeln!(file, "line {i}").unwrap();
        }
        let path = file.path().to_string_lossy().into_owned();

        let window = read_source_window(&job(&path, 40, 60)).await.unwrap();
        assert_eq!(window.start_line, 40);
        assert_eq!(window.end_line, 60);
        assert_eq!(window.lines.len(), 21);
        assert_eq!(window.lines[0], "line 40");
        // trailing newline yields an empty last line
        assert_eq!(window.num_lines, 101);
        assert!(window.last_modified.is_some());
    }

    #[tokio::test]
    async fn test_read_source_window_with_invalid_utf8() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"int x; // caf\xe9\nint y;\n").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let window = read_source_window(&job(&path, 1, 10)).await.unwrap();
        assert_eq!(window.end_line, 3);
        assert_eq!(window.lines[0], "int x; // caf\u{fffd}");
        assert_eq!(window.lines[1], "int y;");
    }

    #[tokio::test]
    async fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.c").to_string_lossy().into_owned();
        assert!(read_source_window(&job(&path, 1, 10)).await.is_err());
    }
}
