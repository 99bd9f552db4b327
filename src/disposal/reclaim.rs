//! Empty-directory reclaimer.
//!
//! A directory counts as empty when nothing below it, at any depth, is a file
//! with an extension outside the ignore list. Empty trees are removed bottom
//! up: ignored leftovers first, then the directory itself.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{MfcError, Result};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

pub struct DirectoryReclaimer<'a> {
    enabled: bool,
    /// Lowercase extensions without the dot.
    ignored_extensions: &'a [String],
    logger: Option<ActivityLoggerHandle>,
}

/// One directory of the tree with its direct files.
struct DirNode {
    path: PathBuf,
    files: Vec<PathBuf>,
}

impl<'a> DirectoryReclaimer<'a> {
    #[must_use]
    pub fn new(enabled: bool, ignored_extensions: &'a [String]) -> Self {
        Self {
            enabled,
            ignored_extensions,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLoggerHandle>) -> Self {
        self.logger = logger;
        self
    }

    /// Remove `dir` if it is empty by the ignore-list rule. Returns whether
    /// the directory is gone. Failures are logged and never propagated.
    pub fn reclaim(&self, dir: &Path) -> bool {
        if !self.enabled {
            return false;
        }
        if dir.parent().is_none() {
            eprintln!("[MFC-RECLAIM] refusing to reclaim filesystem root {}", dir.display());
            return false;
        }

        let nodes = match self.survey(dir) {
            Ok(Some(nodes)) => nodes,
            Ok(None) => return false,
            Err(err) => {
                eprintln!("[{}] reclaim of {} aborted: {err}", err.code(), dir.display());
                return false;
            }
        };

        match remove_bottom_up(&nodes) {
            Ok(()) => {
                if let Some(logger) = &self.logger {
                    logger.send(ActivityEvent::DirectoryReclaimed {
                        path: dir.to_string_lossy().into_owned(),
                    });
                }
                true
            }
            Err(err) => {
                eprintln!("[{}] reclaim of {} aborted: {err}", err.code(), dir.display());
                false
            }
        }
    }

    /// Walk the tree in pre-order. `Ok(None)` as soon as a blocking file shows up.
    fn survey(&self, root: &Path) -> Result<Option<Vec<DirNode>>> {
        let mut nodes = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut files = Vec::new();
            for entry in fs::read_dir(&dir).map_err(|e| MfcError::io(&dir, e))? {
                let entry = entry.map_err(|e| MfcError::io(&dir, e))?;
                let path = entry.path();
                let file_type = entry.file_type().map_err(|e| MfcError::io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if self.is_ignored(&path) {
                    files.push(path);
                } else {
                    return Ok(None);
                }
            }
            nodes.push(DirNode { path: dir, files });
        }
        Ok(Some(nodes))
    }

    fn is_ignored(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.ignored_extensions.iter().any(|i| *i == ext))
    }
}

/// Pre-order reversed is a valid post-order: every child before its parent.
fn remove_bottom_up(nodes: &[DirNode]) -> Result<()> {
    for node in nodes.iter().rev() {
        for file in &node.files {
            fs::remove_file(file).map_err(|e| MfcError::io(file, e))?;
        }
        fs::remove_dir(&node.path).map_err(|e| MfcError::io(&node.path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ignored() -> Vec<String> {
        vec!["nfo".to_string(), "jpg".to_string(), "txt".to_string()]
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn disabled_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("X");
        fs::create_dir(&target).unwrap();
        let ext = ignored();
        assert!(!DirectoryReclaimer::new(false, &ext).reclaim(&target));
        assert!(target.exists());
    }

    #[test]
    fn removes_tree_of_ignored_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("X");
        touch(&target.join("X.nfo"));
        touch(&target.join("extrafanart/fanart1.JPG"));
        fs::create_dir_all(target.join("empty/deeper")).unwrap();

        let ext = ignored();
        let (logger, rx) = ActivityLoggerHandle::capture(4);
        assert!(
            DirectoryReclaimer::new(true, &ext)
                .with_logger(Some(logger))
                .reclaim(&target)
        );
        assert!(!target.exists());
        assert!(dir.path().exists());
        assert!(matches!(
            rx.try_recv().unwrap(),
            ActivityEvent::DirectoryReclaimed { .. }
        ));
    }

    #[test]
    fn nested_video_blocks_everything() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("X");
        touch(&target.join("X.nfo"));
        touch(&target.join("extras/deep/featurette.mkv"));

        let ext = ignored();
        assert!(!DirectoryReclaimer::new(true, &ext).reclaim(&target));
        assert!(target.join("X.nfo").exists());
        assert!(target.join("extras/deep/featurette.mkv").exists());
    }

    #[test]
    fn extensionless_file_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("X");
        touch(&target.join("README"));
        let ext = ignored();
        assert!(!DirectoryReclaimer::new(true, &ext).reclaim(&target));
        assert!(target.exists());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ext = ignored();
        assert!(!DirectoryReclaimer::new(true, &ext).reclaim(&dir.path().join("gone")));
    }

    #[test]
    fn refuses_root() {
        let ext = ignored();
        assert!(!DirectoryReclaimer::new(true, &ext).reclaim(Path::new("/")));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn never_deletes_non_ignored_content(
            files in prop::collection::vec(
                (0usize..3, prop::sample::select(vec!["nfo", "jpg", "mkv", "srt"])),
                0..8,
            )
        ) {
            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("root");
            fs::create_dir(&target).unwrap();
            let subdirs = ["", "a", "a/b"];
            let mut created = Vec::new();
            for (i, (depth, ext)) in files.iter().enumerate() {
                let path = target.join(subdirs[*depth]).join(format!("f{i}.{ext}"));
                touch(&path);
                created.push((path, *ext));
            }

            let ext = ignored();
            let blocked = created.iter().any(|(_, e)| !ext.iter().any(|i| i == e));
            let removed = DirectoryReclaimer::new(true, &ext).reclaim(&target);

            prop_assert_eq!(removed, !blocked);
            for (path, e) in &created {
                if !ext.iter().any(|i| i == e) {
                    prop_assert!(path.exists());
                }
            }
        }
    }
}
