//! Media host control surface: play state, library scan state, library
//! clean trigger, and on-screen notifications.

#![allow(missing_docs)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::core::errors::{MfcError, Result};

/// The media center the cleaner runs alongside.
pub trait MediaHost: Send + Sync {
    /// Whether a live host is behind this handle.
    fn is_connected(&self) -> bool {
        true
    }

    fn is_playing_video(&self) -> Result<bool>;

    fn is_library_scanning(&self) -> Result<bool>;

    /// Ask the host to drop library entries whose files are gone.
    fn clean_library(&self) -> Result<()>;

    fn show_notification(
        &self,
        title: &str,
        message: &str,
        duration_ms: u64,
        icon: Option<&str>,
    ) -> Result<()>;
}

/// Stand-in when no host endpoint is configured: never playing, never
/// scanning, and unable to clean.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineHost;

impl MediaHost for OfflineHost {
    fn is_connected(&self) -> bool {
        false
    }

    fn is_playing_video(&self) -> Result<bool> {
        Ok(false)
    }

    fn is_library_scanning(&self) -> Result<bool> {
        Ok(false)
    }

    fn clean_library(&self) -> Result<()> {
        Err(MfcError::Runtime {
            details: "no media host configured (host.rpc_url)".to_string(),
        })
    }

    fn show_notification(
        &self,
        _title: &str,
        _message: &str,
        _duration_ms: u64,
        _icon: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Scriptable in-memory host that records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub playing: AtomicBool,
    /// When set, play-state queries fail as if the host were unreachable.
    pub unreachable: AtomicBool,
    /// Number of upcoming scan-state polls that report a running scan.
    pub scanning_polls: AtomicUsize,
    pub scan_queries: AtomicUsize,
    pub clean_requests: AtomicUsize,
    pub notifications: Mutex<Vec<(String, String)>>,
}

impl RecordingHost {
    #[must_use]
    pub fn playing() -> Self {
        let host = Self::default();
        host.playing.store(true, Ordering::SeqCst);
        host
    }

    #[must_use]
    pub fn notification_messages(&self) -> Vec<String> {
        self.notifications
            .lock()
            .map(|n| n.iter().map(|(_, message)| message.clone()).collect())
            .unwrap_or_default()
    }
}

impl MediaHost for RecordingHost {
    fn is_playing_video(&self) -> Result<bool> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MfcError::MetadataQuery {
                context: "host",
                details: "host unreachable".to_string(),
            });
        }
        Ok(self.playing.load(Ordering::SeqCst))
    }

    fn is_library_scanning(&self) -> Result<bool> {
        self.scan_queries.fetch_add(1, Ordering::SeqCst);
        let remaining = self.scanning_polls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.scanning_polls.store(remaining - 1, Ordering::SeqCst);
            return Ok(true);
        }
        Ok(false)
    }

    fn clean_library(&self) -> Result<()> {
        self.clean_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn show_notification(
        &self,
        title: &str,
        message: &str,
        _duration_ms: u64,
        _icon: Option<&str>,
    ) -> Result<()> {
        if let Ok(mut sent) = self.notifications.lock() {
            sent.push((title.to_string(), message.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_host_is_idle_and_cannot_clean() {
        let host = OfflineHost;
        assert!(!host.is_connected());
        assert!(!host.is_playing_video().unwrap());
        assert!(!host.is_library_scanning().unwrap());
        assert_eq!(host.clean_library().unwrap_err().code(), "MFC-3900");
        assert!(host.show_notification("t", "m", 1000, None).is_ok());
    }

    #[test]
    fn recording_host_scripts_scans_and_records() {
        let host = RecordingHost::default();
        host.scanning_polls.store(2, Ordering::SeqCst);
        assert!(host.is_library_scanning().unwrap());
        assert!(host.is_library_scanning().unwrap());
        assert!(!host.is_library_scanning().unwrap());
        assert_eq!(host.scan_queries.load(Ordering::SeqCst), 3);

        host.show_notification("mfc", "hello", 5000, None).unwrap();
        assert_eq!(host.notification_messages(), vec!["hello"]);

        host.unreachable.store(true, Ordering::SeqCst);
        assert!(host.is_playing_video().is_err());
    }
}
