//! Multi-channel notifications: media host GUI, journal, desktop, and file.
//!
//! Channels are fire-and-forget; a failing channel never disturbs a pass.
//! With `notify_when_idle` set, on-screen channels stay quiet while a video
//! is playing. The journal and file channels always record the message.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::library::MediaCategory;
use crate::library::host::MediaHost;

pub const NOTIFICATION_TITLE: &str = "Media File Cleaner";

// ──────────────────── notification level ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ──────────────────── notification events ────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    /// End-of-pass summary; only sent when something was cleaned.
    PassSummary {
        movies: usize,
        episodes: usize,
        music_videos: usize,
        relocated: bool,
    },
    DispositionFailed {
        path: String,
        message: String,
    },
    QueryFailed {
        category: String,
        message: String,
    },
    ConfigurationError {
        message: String,
    },
    DiskCheckFailed {
        path: String,
        message: String,
    },
    DaemonStarted {
        version: String,
    },
    DaemonStopped {
        reason: String,
    },
}

impl NotificationEvent {
    #[must_use]
    pub const fn level(&self) -> NotificationLevel {
        match self {
            Self::PassSummary { .. } | Self::DaemonStarted { .. } | Self::DaemonStopped { .. } => {
                NotificationLevel::Info
            }
            Self::DiskCheckFailed { .. } | Self::QueryFailed { .. } => NotificationLevel::Warning,
            Self::DispositionFailed { .. } | Self::ConfigurationError { .. } => {
                NotificationLevel::Error
            }
        }
    }

    /// One-line human-readable message.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::PassSummary {
                movies,
                episodes,
                music_videos,
                relocated,
            } => {
                let parts: Vec<String> = [
                    (*movies, MediaCategory::Movie),
                    (*episodes, MediaCategory::Episode),
                    (*music_videos, MediaCategory::MusicVideo),
                ]
                .into_iter()
                .filter(|(n, _)| *n > 0)
                .map(|(n, category)| count_label(n, category))
                .collect();
                let verb = if *relocated { "Moved" } else { "Cleaned up" };
                if parts.is_empty() {
                    format!("{verb} nothing")
                } else {
                    format!("{verb} {}", parts.join(", "))
                }
            }
            Self::DispositionFailed { path, message } => {
                format!("Could not clean {path}: {message}")
            }
            Self::QueryFailed { category, message } => {
                format!("Skipped {category} cleanup: {message}")
            }
            Self::ConfigurationError { message } => format!("Configuration error: {message}"),
            Self::DiskCheckFailed { path, message } => {
                format!("Cannot check free space on {path}: {message}")
            }
            Self::DaemonStarted { version } => format!("mfc v{version} started"),
            Self::DaemonStopped { reason } => format!("mfc stopped ({reason})"),
        }
    }
}

fn count_label(n: usize, category: MediaCategory) -> String {
    if n == 1 {
        let single = match category {
            MediaCategory::Movie => "movie",
            MediaCategory::Episode => "episode",
            MediaCategory::MusicVideo => "music video",
        };
        format!("1 {single}")
    } else {
        format!("{n} {}", category.plural())
    }
}

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Keep on-screen channels quiet while a video is playing.
    pub notify_when_idle: bool,
    /// On-screen display time.
    pub duration_ms: u64,
    pub icon: Option<String>,
    /// Active channel names: `host`, `journal`, `desktop`, `file`.
    pub channels: Vec<String>,
    pub desktop: DesktopConfig,
    pub file: FileConfig,
    pub journal: JournalConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_when_idle: false,
            duration_ms: 5000,
            icon: None,
            channels: vec!["host".to_string(), "journal".to_string()],
            desktop: DesktopConfig::default(),
            file: FileConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DesktopConfig {
    pub min_level: NotificationLevel,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub path: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        Self {
            path: home
                .join(".local")
                .join("share")
                .join("mfc")
                .join("notifications.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JournalConfig {
    pub min_level: NotificationLevel,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            min_level: NotificationLevel::Info,
        }
    }
}

// ──────────────────── channels ────────────────────

#[derive(Debug, Serialize)]
struct NotificationRecord {
    ts: String,
    level: NotificationLevel,
    summary: String,
    #[serde(flatten)]
    event: NotificationEvent,
}

trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether this channel puts something on a screen.
    fn is_visual(&self) -> bool;
    fn send(&self, event: &NotificationEvent);
}

// ──── Host GUI ────

struct HostChannel {
    host: Arc<dyn MediaHost>,
    duration_ms: u64,
    icon: Option<String>,
}

impl Channel for HostChannel {
    fn name(&self) -> &'static str {
        "host"
    }

    fn is_visual(&self) -> bool {
        true
    }

    fn send(&self, event: &NotificationEvent) {
        if !self.host.is_connected() {
            return;
        }
        if let Err(err) = self.host.show_notification(
            NOTIFICATION_TITLE,
            &event.summary(),
            self.duration_ms,
            self.icon.as_deref(),
        ) {
            eprintln!("[MFC-NOTIFY] host notification failed: {err}");
        }
    }
}

// ──── Desktop (notify-send / osascript) ────

struct DesktopChannel {
    min_level: NotificationLevel,
    duration_ms: u64,
}

impl Channel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn is_visual(&self) -> bool {
        true
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level {
            return;
        }
        let summary = event.summary();

        #[cfg(target_os = "linux")]
        {
            let urgency = match event.level() {
                NotificationLevel::Error => "critical",
                NotificationLevel::Warning => "normal",
                NotificationLevel::Info => "low",
            };
            let _ = Command::new("notify-send")
                .arg("--urgency")
                .arg(urgency)
                .arg("--expire-time")
                .arg(self.duration_ms.to_string())
                .arg("--app-name=mfc")
                .arg(NOTIFICATION_TITLE)
                .arg(&summary)
                .spawn();
        }

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                "display notification \"{}\" with title \"{NOTIFICATION_TITLE}\"",
                summary.replace('"', "\\\"")
            );
            let _ = Command::new("osascript").arg("-e").arg(&script).spawn();
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let _ = (summary, self.duration_ms);
        }
    }
}

// ──── File (append-only JSONL) ────

struct FileChannel {
    path: PathBuf,
}

impl Channel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn is_visual(&self) -> bool {
        false
    }

    fn send(&self, event: &NotificationEvent) {
        let record = NotificationRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            summary: event.summary(),
            event: event.clone(),
        };
        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };

        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let file = {
            let mut opts = OpenOptions::new();
            opts.create(true).append(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
        };
        if let Ok(mut f) = file {
            let _ = writeln!(f, "{json}");
        }
    }
}

// ──── Journal (stderr picked up by systemd) ────

struct JournalChannel {
    min_level: NotificationLevel,
}

impl Channel for JournalChannel {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn is_visual(&self) -> bool {
        false
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level {
            return;
        }
        let priority = match event.level() {
            NotificationLevel::Error => "ERR",
            NotificationLevel::Warning => "WARNING",
            NotificationLevel::Info => "INFO",
        };
        eprintln!("[MFC-NOTIFY] [{priority}] {}", event.summary());
    }
}

// ──────────────────── notification manager ────────────────────

/// How a notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// On-screen channels skipped because a video is playing.
    Suppressed,
    Disabled,
}

pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
    enabled: bool,
    notify_when_idle: bool,
    host: Option<Arc<dyn MediaHost>>,
}

impl NotificationManager {
    /// Build the configured channels. Unknown channel names are ignored.
    #[must_use]
    pub fn from_config(config: &NotificationConfig, host: Arc<dyn MediaHost>) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        for channel_name in &config.channels {
            match channel_name.as_str() {
                "host" => channels.push(Box::new(HostChannel {
                    host: Arc::clone(&host),
                    duration_ms: config.duration_ms,
                    icon: config.icon.clone(),
                })),
                "desktop" => channels.push(Box::new(DesktopChannel {
                    min_level: config.desktop.min_level,
                    duration_ms: config.duration_ms,
                })),
                "file" => channels.push(Box::new(FileChannel {
                    path: config.file.path.clone(),
                })),
                "journal" => channels.push(Box::new(JournalChannel {
                    min_level: config.journal.min_level,
                })),
                other => eprintln!("[MFC-NOTIFY] unknown notification channel {other:?}"),
            }
        }

        Self {
            channels,
            enabled: true,
            notify_when_idle: config.notify_when_idle,
            host: Some(host),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
            enabled: false,
            notify_when_idle: false,
            host: None,
        }
    }

    /// Dispatch `event` to every channel, minus on-screen ones while a video
    /// plays and `notify_when_idle` is set.
    pub fn notify(&self, event: &NotificationEvent) -> Delivery {
        if !self.enabled {
            return Delivery::Disabled;
        }

        let suppress_visual = self.notify_when_idle
            && self
                .host
                .as_ref()
                .is_some_and(|h| h.is_playing_video().unwrap_or(false));

        for channel in &self.channels {
            if suppress_visual && channel.is_visual() {
                continue;
            }
            channel.send(event);
        }

        if suppress_visual {
            Delivery::Suppressed
        } else {
            Delivery::Sent
        }
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::host::RecordingHost;
    use std::sync::atomic::Ordering;

    fn summary_event() -> NotificationEvent {
        NotificationEvent::PassSummary {
            movies: 2,
            episodes: 1,
            music_videos: 0,
            relocated: false,
        }
    }

    fn config(channels: &[&str]) -> NotificationConfig {
        NotificationConfig {
            channels: channels.iter().map(ToString::to_string).collect(),
            ..NotificationConfig::default()
        }
    }

    #[test]
    fn summary_counts_per_category() {
        assert_eq!(summary_event().summary(), "Cleaned up 2 movies, 1 episode");
        let moved = NotificationEvent::PassSummary {
            movies: 0,
            episodes: 0,
            music_videos: 3,
            relocated: true,
        };
        assert_eq!(moved.summary(), "Moved 3 music videos");
    }

    #[test]
    fn levels_are_ordered() {
        assert!(NotificationLevel::Info < NotificationLevel::Warning);
        assert!(NotificationLevel::Warning < NotificationLevel::Error);
        assert_eq!(
            NotificationEvent::ConfigurationError {
                message: String::new()
            }
            .level(),
            NotificationLevel::Error
        );
    }

    #[test]
    fn host_channel_shows_notification() {
        let host = Arc::new(RecordingHost::default());
        let manager = NotificationManager::from_config(&config(&["host", "journal"]), host.clone());
        assert_eq!(manager.channel_names(), vec!["host", "journal"]);
        assert_eq!(manager.notify(&summary_event()), Delivery::Sent);
        assert_eq!(
            host.notification_messages(),
            vec!["Cleaned up 2 movies, 1 episode"]
        );
    }

    #[test]
    fn suppressed_while_playing_when_idle_only() {
        let host = Arc::new(RecordingHost::playing());
        let mut cfg = config(&["host"]);
        cfg.notify_when_idle = true;
        let manager = NotificationManager::from_config(&cfg, host.clone());
        assert_eq!(manager.notify(&summary_event()), Delivery::Suppressed);
        assert!(host.notification_messages().is_empty());

        host.playing.store(false, Ordering::SeqCst);
        assert_eq!(manager.notify(&summary_event()), Delivery::Sent);
        assert_eq!(host.notification_messages().len(), 1);
    }

    #[test]
    fn playing_without_idle_flag_still_notifies() {
        let host = Arc::new(RecordingHost::playing());
        let manager = NotificationManager::from_config(&config(&["host"]), host.clone());
        assert_eq!(manager.notify(&summary_event()), Delivery::Sent);
        assert_eq!(host.notification_messages().len(), 1);
    }

    #[test]
    fn file_channel_records_even_when_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(RecordingHost::playing());
        let mut cfg = config(&["host", "file"]);
        cfg.notify_when_idle = true;
        cfg.file.path = dir.path().join("notify.jsonl");
        let manager = NotificationManager::from_config(&cfg, host);

        manager.notify(&summary_event());
        let contents = fs::read_to_string(dir.path().join("notify.jsonl")).unwrap();
        let record: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(record["type"], "pass_summary");
        assert_eq!(record["level"], "info");
    }

    #[test]
    fn disabled_manager_does_nothing() {
        let host = Arc::new(RecordingHost::default());
        let cfg = NotificationConfig {
            enabled: false,
            ..config(&["host"])
        };
        let manager = NotificationManager::from_config(&cfg, host.clone());
        assert!(!manager.is_enabled());
        assert_eq!(manager.notify(&summary_event()), Delivery::Disabled);
        assert!(host.notification_messages().is_empty());
    }
}
