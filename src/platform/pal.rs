//! PAL trait and platform-specific implementations.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{MfcError, Result};

/// Filesystem statistics for a path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub is_readonly: bool,
}

impl FsStats {
    /// Free blocks as a percentage of all blocks, `None` on a zero-capacity volume.
    #[must_use]
    pub fn free_pct(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some((self.free_bytes as f64 * 100.0) / self.total_bytes as f64)
    }
}

/// OS abstraction used by the disk space monitor.
pub trait Platform: Send + Sync {
    fn fs_stats(&self, path: &Path) -> Result<FsStats>;
}

/// Unix platform implementation using `statvfs`.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct UnixPlatform;

#[cfg(unix)]
impl UnixPlatform {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
impl Platform for UnixPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| MfcError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        let fragment = u64::from(stat.fragment_size());
        Ok(FsStats {
            total_bytes: u64::from(stat.blocks()).saturating_mul(fragment),
            free_bytes: u64::from(stat.blocks_free()).saturating_mul(fragment),
            available_bytes: u64::from(stat.blocks_available()).saturating_mul(fragment),
            is_readonly: stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY),
        })
    }
}

/// In-memory mock implementation for deterministic tests.
///
/// Stats are keyed by path prefix; the longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    stats_by_prefix: HashMap<PathBuf, FsStats>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(stats_by_prefix: HashMap<PathBuf, FsStats>) -> Self {
        Self { stats_by_prefix }
    }

    /// Convenience: one volume at `prefix` with the given free percentage.
    #[must_use]
    pub fn with_free_pct(prefix: impl Into<PathBuf>, free_pct: f64) -> Self {
        let total: u64 = 1_000_000;
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let free = ((free_pct / 100.0) * total as f64).round() as u64;
        let mut stats = HashMap::new();
        stats.insert(
            prefix.into(),
            FsStats {
                total_bytes: total,
                free_bytes: free,
                available_bytes: free,
                is_readonly: false,
            },
        );
        Self::new(stats)
    }
}

impl Platform for MockPlatform {
    fn fs_stats(&self, path: &Path) -> Result<FsStats> {
        self.stats_by_prefix
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.as_os_str().len())
            .map(|(_, stats)| stats.clone())
            .ok_or_else(|| MfcError::FsStats {
                path: path.to_path_buf(),
                details: "mock volume not found".to_string(),
            })
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(unix)]
    {
        Ok(Arc::new(UnixPlatform::new()))
    }
    #[cfg(not(unix))]
    {
        Err(MfcError::UnsupportedPlatform {
            details: "only unix statvfs is currently implemented".to_string(),
        })
    }
}
