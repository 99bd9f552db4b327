//! Disposal of expired videos: exclusion veto, stacked-path expansion, the
//! delete/relocate engine, and empty-directory reclamation.

#![allow(missing_docs)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::library::CandidateVideo;

pub mod engine;
pub mod exclusion;
pub mod reclaim;
pub mod stack;

/// What happens to an expired video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispositionMode {
    #[default]
    Delete,
    Relocate,
}

/// Per-pass disposition snapshot derived from the config.
#[derive(Debug, Clone, PartialEq)]
pub struct DispositionPolicy {
    pub mode: DispositionMode,
    /// Set whenever `mode` is `Relocate`.
    pub holding_root: Option<PathBuf>,
    pub create_category_subdirs: bool,
    pub clean_related_files: bool,
    pub delete_empty_parent_dirs: bool,
    /// Lowercase, without the leading dot.
    pub ignored_extensions: Vec<String>,
    pub update_path_reference: bool,
}

impl Default for DispositionPolicy {
    fn default() -> Self {
        Self {
            mode: DispositionMode::Delete,
            holding_root: None,
            create_category_subdirs: true,
            clean_related_files: false,
            delete_empty_parent_dirs: false,
            ignored_extensions: Vec::new(),
            update_path_reference: false,
        }
    }
}

/// Outcome classification for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionAction {
    Deleted,
    Relocated,
    SkippedExcluded,
    SkippedMissing,
    /// Every part already existed at the destination at equal or larger size;
    /// the source copies were discarded instead of moved.
    CollisionResolved,
    Failed,
}

impl DispositionAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Relocated => "relocated",
            Self::SkippedExcluded => "skipped_excluded",
            Self::SkippedMissing => "skipped_missing",
            Self::CollisionResolved => "collision_resolved",
            Self::Failed => "failed",
        }
    }
}

/// Result of disposing one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispositionResult {
    pub candidate: CandidateVideo,
    pub succeeded: bool,
    pub action: DispositionAction,
    /// Sidecar files deleted or moved alongside the video.
    pub related_files: Vec<String>,
    /// Final directory of a relocated video.
    pub destination: Option<PathBuf>,
    /// Per-part failures, already logged.
    pub errors: Vec<String>,
}

impl DispositionResult {
    #[must_use]
    pub fn skipped(candidate: &CandidateVideo, action: DispositionAction) -> Self {
        Self {
            candidate: candidate.clone(),
            succeeded: false,
            action,
            related_files: Vec::new(),
            destination: None,
            errors: Vec::new(),
        }
    }
}
