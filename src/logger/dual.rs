//! Dual-write activity logger: JSONL always, SQLite when available.
//!
//! A dedicated thread owns both sinks. Everything else sends `ActivityEvent`s
//! over a bounded crossbeam channel with `try_send`, so a slow disk never
//! stalls a cleanup pass.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::PathsConfig;
use crate::core::errors::{MfcError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
#[cfg(feature = "sqlite")]
use crate::logger::sqlite::{ActivityRow, SqliteLogger};

const CHANNEL_CAPACITY: usize = 1024;

/// Consecutive SQLite write failures before that sink is abandoned.
#[cfg(feature = "sqlite")]
const SQLITE_FAILURE_LIMIT: u32 = 3;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    DaemonStarted {
        version: String,
        config_hash: String,
    },
    DaemonStopped {
        reason: String,
        uptime_secs: u64,
    },
    PassStarted {
        trigger: String,
    },
    PassSkipped {
        reason: String,
    },
    PassCompleted {
        movies: usize,
        episodes: usize,
        music_videos: usize,
        failures: usize,
        duration_ms: u64,
    },
    FileDeleted {
        path: String,
        category: String,
        related: Vec<String>,
    },
    FileRelocated {
        path: String,
        category: String,
        destination: String,
        related: Vec<String>,
    },
    DispositionFailed {
        path: String,
        category: String,
        error_code: String,
        error_message: String,
    },
    DirectoryReclaimed {
        path: String,
    },
    QueryFailed {
        category: String,
        error_code: String,
        error_message: String,
    },
    LibraryCleanRequested {
        triggered: bool,
        details: String,
    },
    ConfigReloaded {
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Asks the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cheaply cloneable sender half of the activity logger.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event without blocking. A full channel drops the event and
    /// bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to finish; join its handle to wait for the flush.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// Handle plus receiver without a thread behind it, for inspecting what
    /// a component logs.
    #[must_use]
    pub fn capture(capacity: usize) -> (Self, Receiver<ActivityEvent>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                dropped_events: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }
}

// ──────────────────── configuration ────────────────────

pub struct DualLoggerConfig {
    /// `None` disables the SQLite sink.
    pub sqlite_path: Option<PathBuf>,
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl DualLoggerConfig {
    #[must_use]
    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self {
            sqlite_path: Some(paths.sqlite_db.clone()),
            jsonl_config: JsonlConfig {
                path: paths.jsonl_log.clone(),
                ..JsonlConfig::default()
            },
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl Default for DualLoggerConfig {
    fn default() -> Self {
        Self::from_paths(&PathsConfig::default())
    }
}

// ──────────────────── spawn ────────────────────

/// Start the logger thread. It runs until `shutdown()` or until every
/// handle is dropped.
pub fn spawn_logger(
    config: DualLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("mfc-logger".to_string())
        .spawn(move || {
            logger_thread_main(rx, config.sqlite_path, config.jsonl_config, dropped_clone);
        })
        .map_err(|e| MfcError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: Receiver<ActivityEvent>,
    sqlite_path: Option<PathBuf>,
    jsonl_config: JsonlConfig,
    dropped: Arc<AtomicU64>,
) {
    #[cfg(feature = "sqlite")]
    let mut sqlite = sqlite_path.and_then(|p| match SqliteLogger::open(&p) {
        Ok(db) => Some(db),
        Err(e) => {
            eprintln!("[MFC-DUAL] failed to open SQLite at {}: {e}", p.display());
            None
        }
    });
    #[cfg(not(feature = "sqlite"))]
    let _ = sqlite_path;
    #[cfg(feature = "sqlite")]
    let mut sqlite_failures: u32 = 0;

    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        if matches!(event, ActivityEvent::PassStarted { .. }) {
            jsonl.try_recover();
        }
        let entry = event_to_log_entry(&event);
        jsonl.write_entry(&entry);

        #[cfg(feature = "sqlite")]
        if let Some(db) = &sqlite {
            if db.log_activity(&entry_to_activity_row(&entry)).is_ok() {
                sqlite_failures = 0;
            } else {
                sqlite_failures += 1;
                if sqlite_failures >= SQLITE_FAILURE_LIMIT {
                    eprintln!("[MFC-DUAL] SQLite write failed {sqlite_failures} times, disabling");
                    sqlite = None;
                }
            }
        }
    }

    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::DaemonStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DaemonStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::DaemonStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::PassStarted { trigger } => {
            let mut e = LogEntry::new(EventType::PassStart, Severity::Info);
            e.details = Some(format!("trigger={trigger}"));
            e
        }
        ActivityEvent::PassSkipped { reason } => {
            let mut e = LogEntry::new(EventType::PassSkip, Severity::Info);
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::PassCompleted {
            movies,
            episodes,
            music_videos,
            failures,
            duration_ms,
        } => {
            let severity = if *failures > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::PassComplete, severity);
            e.details = Some(format!(
                "movies={movies} episodes={episodes} music_videos={music_videos} failures={failures}"
            ));
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(*failures == 0);
            e
        }
        ActivityEvent::FileDeleted {
            path,
            category,
            related,
        } => {
            let mut e = LogEntry::new(EventType::FileDelete, Severity::Info);
            e.path = Some(path.clone());
            e.category = Some(category.clone());
            e.related = (!related.is_empty()).then(|| related.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::FileRelocated {
            path,
            category,
            destination,
            related,
        } => {
            let mut e = LogEntry::new(EventType::FileRelocate, Severity::Info);
            e.path = Some(path.clone());
            e.category = Some(category.clone());
            e.destination = Some(destination.clone());
            e.related = (!related.is_empty()).then(|| related.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::DispositionFailed {
            path,
            category,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::FileDelete, Severity::Warning);
            e.path = Some(path.clone());
            e.category = Some(category.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::DirectoryReclaimed { path } => {
            let mut e = LogEntry::new(EventType::DirectoryReclaim, Severity::Info);
            e.path = Some(path.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::QueryFailed {
            category,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::QueryFail, Severity::Warning);
            e.category = Some(category.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::LibraryCleanRequested { triggered, details } => {
            let mut e = LogEntry::new(EventType::LibraryClean, Severity::Info);
            e.ok = Some(*triggered);
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::ConfigReloaded { details } => {
            let mut e = LogEntry::new(EventType::ConfigReload, Severity::Info);
            e.details = Some(details.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::DaemonStop, Severity::Info),
    }
}

#[cfg(feature = "sqlite")]
#[allow(clippy::cast_possible_wrap)]
fn entry_to_activity_row(entry: &LogEntry) -> ActivityRow {
    let mut details = entry.details.clone();
    if let Some(related) = &entry.related {
        let joined = format!("related={}", related.join(";"));
        details = Some(match details {
            Some(d) => format!("{d} {joined}"),
            None => joined,
        });
    }
    ActivityRow {
        timestamp: entry.ts.clone(),
        event_type: entry.event.as_str().to_string(),
        severity: entry.severity.as_str().to_string(),
        path: entry.path.clone(),
        category: entry.category.clone(),
        destination: entry.destination.clone(),
        duration_ms: entry.duration_ms.map(|d| d as i64),
        success: i32::from(entry.ok.unwrap_or(true)),
        error_code: entry.error_code.clone(),
        error_message: entry.error_message.clone(),
        details,
    }
}
