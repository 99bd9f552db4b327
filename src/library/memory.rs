//! In-memory library with fixed candidate lists, for dry runs and tests.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::errors::{MfcError, Result};
use crate::library::query::{ExpirationCriteria, ExpirationQuery};
use crate::library::{CandidateVideo, FileId, MediaCategory, VideoLibrary};

#[derive(Debug, Default)]
pub struct StaticLibrary {
    candidates: HashMap<MediaCategory, Vec<CandidateVideo>>,
    failing: HashSet<MediaCategory>,
    /// Every `update_path_reference` call, in order.
    pub path_updates: Mutex<Vec<(FileId, PathBuf)>>,
    /// Criteria seen by `find_expired`, in order.
    pub queries: Mutex<Vec<(MediaCategory, ExpirationCriteria)>>,
}

impl StaticLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, candidate: CandidateVideo) -> Self {
        self.candidates
            .entry(candidate.category)
            .or_default()
            .push(candidate);
        self
    }

    /// Make every query for `category` fail.
    #[must_use]
    pub fn failing(mut self, category: MediaCategory) -> Self {
        self.failing.insert(category);
        self
    }

    #[must_use]
    pub fn queried_categories(&self) -> Vec<MediaCategory> {
        self.queries
            .lock()
            .map(|q| q.iter().map(|(c, _)| *c).collect())
            .unwrap_or_default()
    }
}

impl VideoLibrary for StaticLibrary {
    fn describe(&self) -> String {
        "static".to_string()
    }

    fn find_expired(
        &self,
        category: MediaCategory,
        criteria: &ExpirationCriteria,
    ) -> Result<Vec<CandidateVideo>> {
        if let Ok(mut seen) = self.queries.lock() {
            seen.push((category, criteria.clone()));
        }
        if self.failing.contains(&category) {
            return Err(MfcError::MetadataQuery {
                context: "static",
                details: format!("{category} store unavailable"),
            });
        }
        ExpirationQuery::build(category, criteria, chrono::Local::now().naive_local())?;
        Ok(self.candidates.get(&category).cloned().unwrap_or_default())
    }

    fn update_path_reference(&self, file_id: &FileId, new_dir: &Path) -> Result<()> {
        if let Ok(mut updates) = self.path_updates.lock() {
            updates.push((file_id.clone(), new_dir.to_path_buf()));
        }
        Ok(())
    }
}
