#![forbid(unsafe_code)]

//! Media File Cleaner (mfc): expires watched videos from a media-center
//! library.
//!
//! A cleanup pass runs in stages:
//! 1. **Gating**: skip while something is playing, or while the disk still
//!    has enough free space when cleaning is pressure-driven
//! 2. **Sweep**: query each enabled category for expired videos, honor the
//!    exclusion folders, then delete or relocate each file with its sidecars
//!    and reclaim the directories left behind
//! 3. **Summary**: one notification and a line in the cleaned-files log,
//!    then an optional library clean once the host stops scanning
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use media_file_cleaner::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use media_file_cleaner::core::config::Config;
//! use media_file_cleaner::disposal::exclusion::ExclusionFilter;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod disposal;
pub mod library;
pub mod logger;
pub mod monitor;
pub mod platform;
