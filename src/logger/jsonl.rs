//! JSONL activity log: one self-contained JSON object per line.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! concurrent `tail -f` never sees half a record.
//!
//! Fallback chain when the primary file cannot be written:
//! 1. Primary file path
//! 2. Fallback path
//! 3. stderr with `[MFC-JSONL]` prefix
//! 4. Silent discard (the daemon never dies for logging)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MfcError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DaemonStart,
    DaemonStop,
    PassStart,
    PassSkip,
    PassComplete,
    FileDelete,
    FileRelocate,
    DirectoryReclaim,
    QueryFail,
    LibraryClean,
    ConfigReload,
    Error,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DaemonStart => "daemon_start",
            Self::DaemonStop => "daemon_stop",
            Self::PassStart => "pass_start",
            Self::PassSkip => "pass_skip",
            Self::PassComplete => "pass_complete",
            Self::FileDelete => "file_delete",
            Self::FileRelocate => "file_relocate",
            Self::DirectoryReclaim => "directory_reclaim",
            Self::QueryFail => "query_fail",
            Self::LibraryClean => "library_clean",
            Self::ConfigReload => "config_reload",
            Self::Error => "error",
        }
    }
}

/// One JSONL record. Only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with milliseconds.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Relocation target directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Sidecar files handled with the video.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// New entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            category: None,
            destination: None,
            related: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Fallback,
    Stderr,
    Discard,
}

#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Optional second location, ideally on another filesystem.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this size.
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: crate::core::config::PathsConfig::default().jsonl_log,
            fallback_path: Some(std::env::temp_dir().join("mfc-activity.jsonl")),
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            fsync_interval_secs: 10,
        }
    }
}

/// Append-only JSONL writer with size-based rotation.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
    last_fsync: SystemTime,
}

const WRITE_BUFFER: usize = 64 * 1024;

impl JsonlWriter {
    /// Open the log, falling through the chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Normal,
            bytes_written: 0,
            last_fsync: SystemTime::now(),
        };
        if !w.attach(WriterState::Normal) {
            w.fall_back("cannot open primary log");
        }
        w
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => eprintln!("[MFC-JSONL] cannot serialize {}: {e}", entry.event.as_str()),
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub fn fsync(&mut self) {
        self.flush();
        if let Some(w) = self.writer.as_ref() {
            let _ = w.get_ref().sync_data();
        }
        self.last_fsync = SystemTime::now();
    }

    /// Current degradation state.
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Fallback => "fallback",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    /// Return to the primary path if it is writable again, e.g. once a
    /// network share holding the log is remounted.
    pub fn try_recover(&mut self) -> bool {
        if self.state == WriterState::Normal {
            return true;
        }
        self.flush();
        let recovered = self.attach(WriterState::Normal);
        if recovered {
            eprintln!(
                "[MFC-JSONL] back on primary log {}",
                self.config.path.display()
            );
        }
        recovered
    }

    // ──────────────────────── internals ────────────────────────

    fn target(&self, state: WriterState) -> Option<&Path> {
        match state {
            WriterState::Normal => Some(&self.config.path),
            WriterState::Fallback => self.config.fallback_path.as_deref(),
            WriterState::Stderr | WriterState::Discard => None,
        }
    }

    /// Point the writer at the file for `state`; false leaves it untouched.
    fn attach(&mut self, state: WriterState) -> bool {
        let Some(path) = self.target(state) else {
            return false;
        };
        match open_append(path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(WRITE_BUFFER, file));
                self.state = state;
                self.bytes_written = size;
                true
            }
            Err(_) => false,
        }
    }

    fn fall_back(&mut self, why: &str) {
        self.writer = None;
        if self.state == WriterState::Normal && self.attach(WriterState::Fallback) {
            if let Some(path) = self.target(WriterState::Fallback) {
                eprintln!("[MFC-JSONL] {why}; logging to {}", path.display());
            }
            return;
        }
        self.state = if matches!(self.state, WriterState::Stderr | WriterState::Discard) {
            WriterState::Discard
        } else {
            eprintln!("[MFC-JSONL] {why}; logging to stderr");
            WriterState::Stderr
        };
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.writer.is_some() && self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                let written = self
                    .writer
                    .as_mut()
                    .is_some_and(|w| w.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += len;
                    self.maybe_fsync();
                } else {
                    self.fall_back("log write failed");
                    self.write_line(line);
                }
            }
            WriterState::Stderr => eprint!("[MFC-JSONL] {line}"),
            WriterState::Discard => {}
        }
    }

    fn maybe_fsync(&mut self) {
        let due = SystemTime::now()
            .duration_since(self.last_fsync)
            .unwrap_or(Duration::ZERO)
            >= Duration::from_secs(self.config.fsync_interval_secs);
        if due {
            self.fsync();
        }
    }

    /// `log` -> `log.1` -> `log.2` ...; the oldest generation is dropped.
    fn rotate(&mut self) {
        let state = self.state;
        let Some(base) = self.target(state).map(Path::to_path_buf) else {
            return;
        };
        self.flush();
        self.writer = None;

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = rename(&base, rotated_name(&base, 1));

        if !self.attach(state) {
            self.fall_back("cannot reopen log after rotation");
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create for appending; returns the file and its current size.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| MfcError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| MfcError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(path: PathBuf, max_size_bytes: u64) -> JsonlConfig {
        JsonlConfig {
            path,
            fallback_path: None,
            max_size_bytes,
            max_rotated_files: 3,
            fsync_interval_secs: 60,
        }
    }

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 1024 * 1024));

        let mut entry = LogEntry::new(EventType::FileDelete, Severity::Info);
        entry.path = Some("/media/movies/X/X.mkv".to_string());
        entry.category = Some("movie".to_string());
        entry.ok = Some(true);
        writer.write_entry(&entry);
        writer.write_entry(&LogEntry::new(EventType::PassComplete, Severity::Info));
        writer.flush();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "file_delete");
        assert_eq!(first["category"], "movie");
        assert_eq!(first["ok"], true);
    }

    #[test]
    fn unset_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 1024 * 1024));
        writer.write_entry(&LogEntry::new(EventType::DaemonStart, Severity::Info));
        writer.flush();

        let line = fs::read_to_string(&path).unwrap();
        assert!(!line.contains("\"path\""));
        assert!(!line.contains("\"related\""));
    }

    #[test]
    fn rotation_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rot.jsonl");
        let mut writer = JsonlWriter::open(config_at(path.clone(), 100));
        for _ in 0..10 {
            writer.write_entry(&LogEntry::new(EventType::PassStart, Severity::Info));
        }
        writer.flush();

        assert!(path.exists());
        assert!(rotated_name(&path, 1).exists());
        assert!(!rotated_name(&path, 4).exists());
    }

    #[test]
    fn falls_back_when_primary_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"x").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            fallback_path: Some(fallback.clone()),
            ..config_at(blocker.join("primary.jsonl"), 1024 * 1024)
        });

        assert_eq!(writer.state(), "fallback");
        writer.write_entry(&LogEntry::new(EventType::Error, Severity::Warning));
        writer.flush();
        assert!(!fs::read_to_string(&fallback).unwrap().is_empty());
    }

    #[test]
    fn recovers_to_primary_once_writable() {
        let dir = tempfile::tempdir().unwrap();
        let share = dir.path().join("share");
        fs::write(&share, b"not mounted").unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let mut writer = JsonlWriter::open(JsonlConfig {
            fallback_path: Some(fallback),
            ..config_at(share.join("activity.jsonl"), 1024 * 1024)
        });
        assert_eq!(writer.state(), "fallback");
        assert!(!writer.try_recover());

        fs::remove_file(&share).unwrap();
        fs::create_dir(&share).unwrap();
        assert!(writer.try_recover());
        assert_eq!(writer.state(), "normal");
        writer.write_entry(&LogEntry::new(EventType::PassStart, Severity::Info));
        writer.flush();
        assert!(share.join("activity.jsonl").exists());
    }

    #[test]
    fn degrades_to_stderr_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let writer = JsonlWriter::open(config_at(blocker.join("x.jsonl"), 1024));
        assert_eq!(writer.state(), "stderr");
    }
}
