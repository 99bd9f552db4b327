//! File disposition engine: deletes or relocates a candidate's files.
//!
//! Every constituent of a stacked video is handled in one call. The exclusion
//! check runs before anything touches the filesystem, and a relocation only
//! replaces an existing destination file when the incoming one is larger.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::core::errors::{MfcError, Result};
use crate::core::paths::{NetworkPath, is_network_path, redact_credentials};
use crate::disposal::exclusion::ExclusionFilter;
use crate::disposal::stack;
use crate::disposal::{DispositionAction, DispositionMode, DispositionPolicy, DispositionResult};
use crate::library::{CandidateVideo, MediaCategory};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

/// What happened to a single file during relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveOutcome {
    Moved,
    /// Destination was smaller and got replaced.
    Replaced,
    /// Destination was at least as large; the source was removed instead.
    Discarded,
}

pub struct DispositionEngine<'a> {
    policy: &'a DispositionPolicy,
    exclusions: &'a ExclusionFilter,
    logger: Option<ActivityLoggerHandle>,
}

impl<'a> DispositionEngine<'a> {
    #[must_use]
    pub fn new(policy: &'a DispositionPolicy, exclusions: &'a ExclusionFilter) -> Self {
        Self {
            policy,
            exclusions,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLoggerHandle>) -> Self {
        self.logger = logger;
        self
    }

    /// Apply the policy's mode to `candidate`.
    pub fn dispose(&self, candidate: &CandidateVideo) -> DispositionResult {
        match self.policy.mode {
            DispositionMode::Delete => self.delete(candidate),
            DispositionMode::Relocate => match self.destination_for(candidate) {
                Ok(destination) => self.relocate(candidate, &destination),
                Err(err) => self.failed(candidate, &err),
            },
        }
    }

    /// Target directory for relocating `candidate` under the holding root.
    pub fn destination_for(&self, candidate: &CandidateVideo) -> Result<PathBuf> {
        let root = self
            .policy
            .holding_root
            .as_ref()
            .ok_or_else(|| MfcError::InvalidConfig {
                details: "relocation requires disposition.holding_folder".to_string(),
            })?;
        if !self.policy.create_category_subdirs {
            return Ok(root.clone());
        }
        Ok(match candidate.category {
            MediaCategory::Movie => {
                let title = sanitize_component(&candidate.title);
                match candidate.year {
                    Some(year) => root.join(format!("{title} ({year})")),
                    None => root.join(title),
                }
            }
            MediaCategory::Episode => {
                let show = candidate.show.as_deref().unwrap_or(&candidate.title);
                let show_dir = root.join(sanitize_component(show));
                match candidate.season {
                    Some(season) => show_dir.join(format!("Season {season}")),
                    None => show_dir,
                }
            }
            MediaCategory::MusicVideo => {
                let artists = if candidate.artists.is_empty() {
                    candidate.title.clone()
                } else {
                    candidate.artists.join(", ")
                };
                root.join(sanitize_component(&artists))
            }
        })
    }

    // ──────────────────── delete ────────────────────

    /// Delete every constituent of `candidate` and, when enabled, its
    /// sidecar files. Succeeds if at least one constituent was removed.
    pub fn delete(&self, candidate: &CandidateVideo) -> DispositionResult {
        let parts = match self.prepare(candidate) {
            Ok(Some(parts)) => parts,
            Ok(None) => {
                return DispositionResult::skipped(candidate, DispositionAction::SkippedExcluded);
            }
            Err(err) => return self.failed(candidate, &err),
        };

        let related = if self.policy.clean_related_files {
            find_related(&parts)
        } else {
            Vec::new()
        };

        let mut result = DispositionResult::skipped(candidate, DispositionAction::SkippedMissing);
        let mut deleted = 0usize;
        let mut first_error: Option<MfcError> = None;

        for part in &parts {
            if !present(part) {
                eprintln!("[MFC-DISPOSE] already gone: {}", part.display());
                continue;
            }
            match fs::remove_file(part) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    let err = MfcError::io(part, e);
                    result.errors.push(err.to_string());
                    first_error.get_or_insert(err);
                }
            }
        }

        if deleted == 0 {
            return match first_error {
                Some(err) => self.failed_with(result, &err),
                None => result,
            };
        }

        for file in related {
            match fs::remove_file(&file) {
                Ok(()) => result.related_files.push(file.to_string_lossy().into_owned()),
                Err(e) => result.errors.push(MfcError::io(&file, e).to_string()),
            }
        }

        result.succeeded = true;
        result.action = DispositionAction::Deleted;
        self.log(ActivityEvent::FileDeleted {
            path: candidate.path.clone(),
            category: candidate.category.to_string(),
            related: result.related_files.clone(),
        });
        result
    }

    // ──────────────────── relocate ────────────────────

    /// Move every constituent of `candidate` into `destination`, creating it
    /// if needed. Sidecars travel along when related-file handling is on.
    pub fn relocate(&self, candidate: &CandidateVideo, destination: &Path) -> DispositionResult {
        let parts = match self.prepare(candidate) {
            Ok(Some(parts)) => parts,
            Ok(None) => {
                return DispositionResult::skipped(candidate, DispositionAction::SkippedExcluded);
            }
            Err(err) => return self.failed(candidate, &err),
        };

        if let Err(e) = fs::create_dir_all(destination) {
            return self.failed(candidate, &MfcError::io(destination, e));
        }

        let related = if self.policy.clean_related_files {
            find_related(&parts)
        } else {
            Vec::new()
        };

        let mut result = DispositionResult::skipped(candidate, DispositionAction::SkippedMissing);
        result.destination = Some(destination.to_path_buf());
        let mut outcomes = Vec::new();
        let mut first_error: Option<MfcError> = None;
        let mut moved_names = HashSet::new();

        for part in &parts {
            if !present(part) {
                eprintln!("[MFC-DISPOSE] already gone: {}", part.display());
                continue;
            }
            let Some(name) = part.file_name() else {
                continue;
            };
            match relocate_file(part, &destination.join(name)) {
                Ok(outcome) => {
                    moved_names.insert(name.to_os_string());
                    outcomes.push(outcome);
                }
                Err(err) => {
                    result.errors.push(err.to_string());
                    first_error.get_or_insert(err);
                }
            }
        }

        if outcomes.is_empty() {
            return match first_error {
                Some(err) => self.failed_with(result, &err),
                None => result,
            };
        }

        for file in related {
            let Some(name) = file.file_name() else {
                continue;
            };
            if moved_names.contains(name) {
                continue;
            }
            match relocate_file(&file, &destination.join(name)) {
                Ok(_) => result.related_files.push(file.to_string_lossy().into_owned()),
                Err(err) => result.errors.push(err.to_string()),
            }
        }

        result.succeeded = true;
        if outcomes.iter().all(|o| *o == MoveOutcome::Discarded) {
            result.action = DispositionAction::CollisionResolved;
        } else {
            result.action = DispositionAction::Relocated;
        }
        self.log(ActivityEvent::FileRelocated {
            path: candidate.path.clone(),
            category: candidate.category.to_string(),
            destination: destination.to_string_lossy().into_owned(),
            related: result.related_files.clone(),
        });
        result
    }

    // ──────────────────── internals ────────────────────

    /// Expand and vet the candidate's parts. `Ok(None)` means excluded.
    fn prepare(&self, candidate: &CandidateVideo) -> Result<Option<Vec<PathBuf>>> {
        let raw_parts = stack::expand(&candidate.path)?;
        if raw_parts.iter().any(|p| self.exclusions.is_excluded(p)) {
            eprintln!(
                "[MFC-2003] excluded, not touching {}",
                redact_credentials(&candidate.path)
            );
            return Ok(None);
        }
        raw_parts.iter().map(|p| local_path(p)).collect::<Result<Vec<_>>>().map(Some)
    }

    fn failed(&self, candidate: &CandidateVideo, err: &MfcError) -> DispositionResult {
        let result = DispositionResult::skipped(candidate, DispositionAction::Failed);
        self.failed_with(result, err)
    }

    fn failed_with(&self, mut result: DispositionResult, err: &MfcError) -> DispositionResult {
        result.succeeded = false;
        result.action = DispositionAction::Failed;
        if result.errors.is_empty() {
            result.errors.push(err.to_string());
        }
        eprintln!(
            "[{}] could not dispose of {}: {err}",
            err.code(),
            redact_credentials(&result.candidate.path)
        );
        self.log(ActivityEvent::DispositionFailed {
            path: redact_credentials(&result.candidate.path),
            category: result.candidate.category.to_string(),
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
        result
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

// ──────────────────── filesystem helpers ────────────────────

/// Turn a library path into one this OS can operate on.
fn local_path(raw: &str) -> Result<PathBuf> {
    if is_network_path(raw) {
        let parsed = NetworkPath::parse(raw)?;
        if cfg!(windows) {
            return Ok(PathBuf::from(parsed.to_unc()));
        }
        return Err(MfcError::UnsupportedPlatform {
            details: format!(
                "cannot modify files on unmounted share {}",
                redact_credentials(raw)
            ),
        });
    }
    Ok(PathBuf::from(raw.strip_prefix("file://").unwrap_or(raw)))
}

/// Constituent files of a library path, as paths this OS can operate on.
pub fn local_parts(raw: &str) -> Result<Vec<PathBuf>> {
    stack::expand(raw)?.iter().map(|p| local_path(p)).collect()
}

pub(crate) fn present(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Container extensions that always mark a separate video, never a sidecar.
const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "asf", "avi", "divx", "flv", "iso", "m2ts", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg",
    "mts", "ogm", "ogv", "rm", "rmvb", "ts", "vob", "webm", "wmv", "xvid",
];

/// Whether `name` belongs to the video whose base name is `base`: the base
/// followed by nothing or by a separator (`X.srt`, `X.en.srt`, `X-poster.jpg`),
/// and not itself a video.
fn is_sidecar_name(name: &str, base: &str) -> bool {
    let Some(rest) = name.strip_prefix(base) else {
        return false;
    };
    let bounded = rest.is_empty() || rest.starts_with(['.', '-', '_', ' ']);
    let is_video = Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()));
    bounded && !is_video
}

/// Non-video files next to the parts that share their base name.
fn find_related(parts: &[PathBuf]) -> Vec<PathBuf> {
    let names: Vec<String> = parts.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    let base = stack::base_name(&names);
    if base.is_empty() {
        return Vec::new();
    }

    let own: HashSet<&Path> = parts.iter().map(PathBuf::as_path).collect();
    let mut dirs: Vec<&Path> = parts.iter().filter_map(|p| p.parent()).collect();
    dirs.sort();
    dirs.dedup();

    let mut related = Vec::new();
    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_file = entry.file_type().is_ok_and(|t| t.is_file());
            let matches = is_sidecar_name(&entry.file_name().to_string_lossy(), &base);
            if is_file && matches && !own.contains(path.as_path()) {
                related.push(path);
            }
        }
    }
    related.sort();
    related
}

/// Move `src` to `dest`, applying the larger-file-wins rule on collision.
fn relocate_file(src: &Path, dest: &Path) -> Result<MoveOutcome> {
    match fs::metadata(dest) {
        Ok(existing) if existing.is_file() => {
            let incoming = fs::metadata(src).map_err(|e| MfcError::io(src, e))?.len();
            if incoming > existing.len() {
                move_file(src, dest, true)?;
                Ok(MoveOutcome::Replaced)
            } else {
                fs::remove_file(src).map_err(|e| MfcError::io(src, e))?;
                Ok(MoveOutcome::Discarded)
            }
        }
        Ok(_) => Err(MfcError::Io {
            path: dest.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "destination exists and is not a regular file",
            ),
        }),
        Err(_) => {
            move_file(src, dest, false)?;
            Ok(MoveOutcome::Moved)
        }
    }
}

fn move_file(src: &Path, dest: &Path, replace: bool) -> Result<()> {
    if replace && cfg!(windows) {
        fs::remove_file(dest).map_err(|e| MfcError::io(dest, e))?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_across_devices(src, dest),
        Err(e) => Err(MfcError::io(src, e)),
    }
}

/// Copy into a temporary sibling of `dest`, rename into place, then drop the
/// source. A failed copy leaves both the source and any existing `dest` as
/// they were.
fn copy_across_devices(src: &Path, dest: &Path) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".mfc-{:016x}.partial", rand::rng().random::<u64>()));

    if let Err(e) = fs::copy(src, &tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(MfcError::io(src, e));
    }
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(MfcError::io(dest, e));
    }
    fs::remove_file(src).map_err(|e| MfcError::io(src, e))
}

/// Make a title usable as one path component.
fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}
