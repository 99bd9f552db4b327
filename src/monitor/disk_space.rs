//! Disk space monitor: free-space percentage of the volume holding a path.
//!
//! Measurement never fails outward. Anything that prevents a reading
//! (missing path, unmounted share, zero-capacity volume) reports 100% free
//! so that an unreadable disk can never trigger pressure-driven deletion.

#![allow(missing_docs)]

use std::path::PathBuf;

use serde::Serialize;

use crate::core::errors::MfcError;
use crate::core::paths::{native_stat_path, redact_credentials};
use crate::platform::pal::Platform;

/// Reported when no real measurement is possible.
pub const UNKNOWN_FREE_PCT: f64 = 100.0;

/// Outcome of one free-space measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiskReading {
    Measured { path: PathBuf, free_pct: f64 },
    Unreachable { path: String, reason: String },
    ZeroCapacity { path: PathBuf },
}

impl DiskReading {
    /// Percentage used for gating decisions.
    #[must_use]
    pub fn effective_pct(&self) -> f64 {
        match self {
            Self::Measured { free_pct, .. } => free_pct.clamp(0.0, 100.0),
            Self::Unreachable { .. } | Self::ZeroCapacity { .. } => UNKNOWN_FREE_PCT,
        }
    }

    /// Diagnostic for the user when the reading is not a real measurement.
    #[must_use]
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Self::Measured { .. } => None,
            Self::Unreachable { path, reason } => {
                Some(format!("Couldn't access {path} to check free space: {reason}"))
            }
            Self::ZeroCapacity { path } => Some(
                MfcError::ZeroCapacity { path: path.clone() }.to_string()
                    + ". Did you select the correct disk to check for free space?",
            ),
        }
    }
}

/// Free-space checks against the platform's filesystem stats.
pub struct DiskSpaceMonitor<'a> {
    platform: &'a dyn Platform,
}

impl<'a> DiskSpaceMonitor<'a> {
    #[must_use]
    pub fn new(platform: &'a dyn Platform) -> Self {
        Self { platform }
    }

    /// Measure the volume holding `raw_path` (local or network-style).
    #[must_use]
    pub fn measure(&self, raw_path: &str) -> DiskReading {
        let redacted = redact_credentials(raw_path);
        if raw_path.trim().is_empty() {
            return DiskReading::Unreachable {
                path: redacted,
                reason: "no path configured".to_string(),
            };
        }

        let native = match native_stat_path(raw_path) {
            Ok(path) => path,
            Err(err) => {
                return DiskReading::Unreachable {
                    path: redacted,
                    reason: err.to_string(),
                };
            }
        };
        if !native.exists() {
            return DiskReading::Unreachable {
                path: redacted,
                reason: "path does not exist".to_string(),
            };
        }

        match self.platform.fs_stats(&native) {
            Ok(stats) => stats.free_pct().map_or(
                DiskReading::ZeroCapacity {
                    path: native.clone(),
                },
                |free_pct| DiskReading::Measured {
                    path: native.clone(),
                    free_pct,
                },
            ),
            Err(err) => DiskReading::Unreachable {
                path: redacted,
                reason: err.to_string(),
            },
        }
    }

    /// Free space in `[0, 100]`; exactly 100 when the path cannot be measured.
    #[must_use]
    pub fn free_space_percentage(&self, raw_path: &str) -> f64 {
        self.measure(raw_path).effective_pct()
    }

    /// Whether the configured path is at or below the threshold.
    #[must_use]
    pub fn disk_space_low(&self, raw_path: &str, threshold_pct: f64) -> bool {
        self.free_space_percentage(raw_path) <= threshold_pct
    }
}
