//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use media_file_cleaner::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{MfcError, Result};

// Platform
pub use crate::platform::pal::{FsStats, Platform, detect_platform};

// Monitor
pub use crate::monitor::disk_space::{DiskReading, DiskSpaceMonitor};

// Library
pub use crate::library::host::MediaHost;
pub use crate::library::query::{ExpirationCriteria, ExpirationQuery};
pub use crate::library::{CandidateVideo, MediaCategory, VideoLibrary};

// Disposal
pub use crate::disposal::engine::DispositionEngine;
pub use crate::disposal::exclusion::ExclusionFilter;
pub use crate::disposal::reclaim::DirectoryReclaimer;
pub use crate::disposal::{DispositionMode, DispositionPolicy, DispositionResult};

// Orchestration
pub use crate::daemon::notifications::{NotificationEvent, NotificationManager};
pub use crate::daemon::orchestrator::{CleanupOrchestrator, PassOptions, PassReport};

// Logging
pub use crate::logger::cleaner_log::CleanerLog;
