//! Human-readable log of cleaned files, newest block first.
//!
//! ```text
//! [B][17/10/2026 	 14:03:11][/B]
//! 	-	/media/movies/X/X.mkv
//!
//! [B][16/10/2026 	 13:33:10][/B]
//! ...
//! ```

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::core::errors::{MfcError, Result};

pub const DEFAULT_LINES_TO_KEEP: usize = 15;

const HEADING_FORMAT: &str = "%d/%m/%Y \t %H:%M:%S";

pub struct CleanerLog {
    path: PathBuf,
}

impl CleanerLog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Put a timestamped block of `lines` above the existing contents.
    /// Nothing is written for an empty list.
    pub fn prepend(&self, lines: &[String]) -> Result<()> {
        self.prepend_at(lines, Local::now())
    }

    pub fn prepend_at(&self, lines: &[String], at: DateTime<Local>) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let previous = self.get()?;
        let mut block = format!("[B][{}][/B]\n", at.format(HEADING_FORMAT));
        for line in lines {
            block.push_str("\t-\t");
            block.push_str(line);
            block.push('\n');
        }
        block.push('\n');
        block.push_str(&previous);
        self.write(&block)
    }

    /// Whole log, or an empty string if it does not exist yet.
    pub fn get(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(MfcError::io(&self.path, e)),
        }
    }

    /// Keep only the first `lines_to_keep` lines; returns what is left.
    pub fn trim(&self, lines_to_keep: usize) -> Result<String> {
        let contents = self.get()?;
        let kept: String = contents
            .split_inclusive('\n')
            .take(lines_to_keep)
            .collect();
        self.write(&kept)?;
        Ok(kept)
    }

    pub fn clear(&self) -> Result<()> {
        self.write("")
    }

    fn write(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| MfcError::io(parent, e))?;
        }
        fs::write(&self.path, contents).map_err(|e| MfcError::io(&self.path, e))
    }
}
