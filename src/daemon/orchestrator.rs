//! Cleanup orchestrator: one pass through the state machine
//! `Idle → Gating → PerCategorySweep → Summarizing → LibraryRescanWait → Idle`.
//!
//! Every pass works on one config snapshot. Errors are recovered at the
//! smallest scope that contains them: a failed file is a failure count, a
//! failed query skips its category, and only gating or a broken disposition
//! config ends the pass early.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::MfcError;
use crate::core::paths::redact_credentials;
use crate::daemon::notifications::{NotificationEvent, NotificationManager};
use crate::disposal::engine::{DispositionEngine, local_parts, present};
use crate::disposal::exclusion::ExclusionFilter;
use crate::disposal::reclaim::DirectoryReclaimer;
use crate::disposal::{DispositionAction, DispositionMode, DispositionPolicy, DispositionResult};
use crate::library::host::MediaHost;
use crate::library::query::ExpirationCriteria;
use crate::library::{CandidateVideo, MediaCategory, VideoLibrary};
use crate::logger::cleaner_log::CleanerLog;
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::disk_space::DiskSpaceMonitor;
use crate::platform::pal::{Platform, detect_platform};

/// Pause between the last file operation and the library clean request.
pub const SETTLE_DELAY: Duration = Duration::from_secs(10);

// ──────────────────── states and triggers ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassState {
    Idle,
    Gating,
    PerCategorySweep,
    Summarizing,
    LibraryRescanWait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassTrigger {
    DelayedStart,
    Interval,
    Signal,
    Manual,
}

impl PassTrigger {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DelayedStart => "delayed_start",
            Self::Interval => "interval",
            Self::Signal => "signal",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PassOptions {
    pub trigger: PassTrigger,
    /// List what would be disposed of without touching anything.
    pub dry_run: bool,
    /// Bypass play-state and disk-pressure gating.
    pub force: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            trigger: PassTrigger::Manual,
            dry_run: false,
            force: false,
        }
    }
}

/// Why a pass ended in Gating.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    VideoPlaying,
    /// Play state could not be read; assume something is playing.
    HostUnreachable { details: String },
    DiskNotLow { free_pct: f64, threshold_pct: f64 },
    Configuration { details: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VideoPlaying => write!(f, "a video is playing"),
            Self::HostUnreachable { details } => {
                write!(f, "cannot read play state ({details})")
            }
            Self::DiskNotLow {
                free_pct,
                threshold_pct,
            } => write!(
                f,
                "disk space is not low ({free_pct:.1}% free, threshold {threshold_pct:.1}%)"
            ),
            Self::Configuration { details } => write!(f, "configuration error: {details}"),
        }
    }
}

/// What happened in LibraryRescanWait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LibraryCleanOutcome {
    /// Disabled, dry run, or nothing cleaned.
    NotNeeded,
    NoHost,
    Requested { polls: usize },
    StillScanning { polls: usize },
    Aborted,
    Failed { details: String },
}

// ──────────────────── report ────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryTally {
    pub cleaned: usize,
    pub failed: usize,
    pub vanished: usize,
    pub excluded: usize,
    pub query_error: Option<String>,
}

/// A disposition a dry run would have performed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedDisposition {
    pub path: String,
    pub category: MediaCategory,
    pub destination: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub trigger: PassTrigger,
    pub dry_run: bool,
    /// States entered, in order.
    pub states: Vec<PassState>,
    pub skipped: Option<SkipReason>,
    pub movies: CategoryTally,
    pub episodes: CategoryTally,
    pub music_videos: CategoryTally,
    /// Paths of every cleaned video, in disposal order.
    pub cleaned: Vec<String>,
    pub planned: Vec<PlannedDisposition>,
    pub reclaimed_dirs: Vec<PathBuf>,
    pub library_clean: LibraryCleanOutcome,
    pub duration_ms: u64,
}

impl PassReport {
    fn new(options: &PassOptions) -> Self {
        Self {
            trigger: options.trigger,
            dry_run: options.dry_run,
            states: vec![PassState::Idle],
            skipped: None,
            movies: CategoryTally::default(),
            episodes: CategoryTally::default(),
            music_videos: CategoryTally::default(),
            cleaned: Vec::new(),
            planned: Vec::new(),
            reclaimed_dirs: Vec::new(),
            library_clean: LibraryCleanOutcome::NotNeeded,
            duration_ms: 0,
        }
    }

    fn enter(&mut self, state: PassState) {
        self.states.push(state);
    }

    #[must_use]
    pub const fn tally(&self, category: MediaCategory) -> &CategoryTally {
        match category {
            MediaCategory::Movie => &self.movies,
            MediaCategory::Episode => &self.episodes,
            MediaCategory::MusicVideo => &self.music_videos,
        }
    }

    fn tally_mut(&mut self, category: MediaCategory) -> &mut CategoryTally {
        match category {
            MediaCategory::Movie => &mut self.movies,
            MediaCategory::Episode => &mut self.episodes,
            MediaCategory::MusicVideo => &mut self.music_videos,
        }
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.movies.failed + self.episodes.failed + self.music_videos.failed
    }

    #[must_use]
    pub fn query_failures(&self) -> usize {
        [&self.movies, &self.episodes, &self.music_videos]
            .iter()
            .filter(|t| t.query_error.is_some())
            .count()
    }

    /// The summary line, or `None` when nothing was cleaned.
    #[must_use]
    pub fn summary(&self, relocated: bool) -> Option<String> {
        if self.cleaned.is_empty() {
            return None;
        }
        Some(
            NotificationEvent::PassSummary {
                movies: self.movies.cleaned,
                episodes: self.episodes.cleaned,
                music_videos: self.music_videos.cleaned,
                relocated,
            }
            .summary(),
        )
    }
}

// ──────────────────── waiting ────────────────────

/// Blocking pause used by LibraryRescanWait.
pub trait Waiter {
    /// Wait for `duration`. Returns `false` if the wait was cut short by a
    /// shutdown request.
    fn wait(&self, duration: Duration) -> bool;
}

/// Sleeps in short slices, returning early once the shutdown flag is set.
#[derive(Default)]
pub struct ThreadWaiter {
    shutdown: Option<Arc<AtomicBool>>,
}

impl ThreadWaiter {
    #[must_use]
    pub fn with_shutdown(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    fn aborted(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl Waiter for ThreadWaiter {
    fn wait(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(250);
        let deadline = Instant::now() + duration;
        loop {
            if self.aborted() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// Returns immediately and remembers every requested duration.
#[derive(Debug, Default)]
pub struct RecordingWaiter {
    pub waits: Mutex<Vec<Duration>>,
}

impl Waiter for RecordingWaiter {
    fn wait(&self, duration: Duration) -> bool {
        if let Ok(mut waits) = self.waits.lock() {
            waits.push(duration);
        }
        true
    }
}

// ──────────────────── orchestrator ────────────────────

/// Everything one pass needs, borrowed for the duration of the pass.
pub struct CleanupOrchestrator<'a> {
    config: &'a Config,
    library: &'a dyn VideoLibrary,
    host: &'a dyn MediaHost,
    platform: &'a dyn Platform,
    notifier: &'a NotificationManager,
    logger: Option<ActivityLoggerHandle>,
    waiter: Box<dyn Waiter + 'a>,
}

/// Per-pass snapshots derived from the config.
struct Snapshot {
    criteria: ExpirationCriteria,
    policy: DispositionPolicy,
    exclusions: ExclusionFilter,
}

impl<'a> CleanupOrchestrator<'a> {
    #[must_use]
    pub fn new(
        config: &'a Config,
        library: &'a dyn VideoLibrary,
        host: &'a dyn MediaHost,
        platform: &'a dyn Platform,
        notifier: &'a NotificationManager,
    ) -> Self {
        Self {
            config,
            library,
            host,
            platform,
            notifier,
            logger: None,
            waiter: Box::new(ThreadWaiter::default()),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLoggerHandle>) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub fn with_waiter(mut self, waiter: impl Waiter + 'a) -> Self {
        self.waiter = Box::new(waiter);
        self
    }

    /// Run one complete pass and return to Idle.
    pub fn run_pass(&self, options: &PassOptions) -> PassReport {
        let started = Instant::now();
        let mut report = PassReport::new(options);
        self.log(ActivityEvent::PassStarted {
            trigger: options.trigger.as_str().to_string(),
        });

        report.enter(PassState::Gating);
        let gate = if options.force {
            Ok(())
        } else {
            self.check_gates()
        };
        let snapshot = gate.and_then(|()| self.snapshot());
        let snapshot = match snapshot {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                self.debug(&format!("pass skipped: {reason}"));
                self.log(ActivityEvent::PassSkipped {
                    reason: reason.to_string(),
                });
                report.skipped = Some(reason);
                report.enter(PassState::Idle);
                report.duration_ms = elapsed_ms(started);
                return report;
            }
        };

        report.enter(PassState::PerCategorySweep);
        for category in self.config.categories.enabled() {
            self.sweep_category(category, &snapshot, options, &mut report);
        }

        if !options.dry_run {
            report.enter(PassState::Summarizing);
            self.summarize(&report, &snapshot.policy);

            report.enter(PassState::LibraryRescanWait);
            report.library_clean = self.request_library_clean(&report);
        }

        report.enter(PassState::Idle);
        report.duration_ms = elapsed_ms(started);
        self.log(ActivityEvent::PassCompleted {
            movies: report.movies.cleaned,
            episodes: report.episodes.cleaned,
            music_videos: report.music_videos.cleaned,
            failures: report.failures(),
            duration_ms: report.duration_ms,
        });
        report
    }

    // ──────────────────── gating ────────────────────

    fn check_gates(&self) -> std::result::Result<(), SkipReason> {
        if self.config.service.delete_when_idle {
            match self.host.is_playing_video() {
                Ok(true) => return Err(SkipReason::VideoPlaying),
                Ok(false) => {}
                Err(err) => {
                    eprintln!("[{}] cannot read play state: {err}", err.code());
                    return Err(SkipReason::HostUnreachable {
                        details: err.to_string(),
                    });
                }
            }
        }

        let disk = &self.config.disk;
        if disk.delete_when_low_disk_space {
            let reading = DiskSpaceMonitor::new(self.platform).measure(&disk.check_path);
            if let Some(diagnostic) = reading.diagnostic() {
                eprintln!("[MFC-2001] {diagnostic}");
                self.notifier.notify(&NotificationEvent::DiskCheckFailed {
                    path: redact_credentials(&disk.check_path),
                    message: diagnostic,
                });
            }
            let free_pct = reading.effective_pct();
            self.debug(&format!(
                "free space {free_pct:.2}%, threshold {:.2}%",
                disk.threshold_pct
            ));
            if free_pct > disk.threshold_pct {
                return Err(SkipReason::DiskNotLow {
                    free_pct,
                    threshold_pct: disk.threshold_pct,
                });
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> std::result::Result<Snapshot, SkipReason> {
        let policy = self.config.disposition_policy().map_err(|err| {
            eprintln!("[{}] {err}", err.code());
            self.log(ActivityEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
            self.notifier.notify(&NotificationEvent::ConfigurationError {
                message: err.to_string(),
            });
            SkipReason::Configuration {
                details: err.to_string(),
            }
        })?;
        Ok(Snapshot {
            criteria: self.config.expiration_criteria(),
            policy,
            exclusions: self.config.exclusion_filter(),
        })
    }

    // ──────────────────── sweep ────────────────────

    fn sweep_category(
        &self,
        category: MediaCategory,
        snapshot: &Snapshot,
        options: &PassOptions,
        report: &mut PassReport,
    ) {
        let candidates = match self.library.find_expired(category, &snapshot.criteria) {
            Ok(candidates) => candidates,
            Err(err) => {
                self.query_failed(category, &err);
                report.tally_mut(category).query_error = Some(err.to_string());
                return;
            }
        };
        self.debug(&format!(
            "{} expired {} found",
            candidates.len(),
            category.plural()
        ));

        let engine = DispositionEngine::new(&snapshot.policy, &snapshot.exclusions)
            .with_logger(self.logger.clone());
        let reclaimer = DirectoryReclaimer::new(
            snapshot.policy.delete_empty_parent_dirs,
            &snapshot.policy.ignored_extensions,
        )
        .with_logger(self.logger.clone());

        for candidate in &candidates {
            let parts = local_parts(&candidate.path).ok();
            if let Some(parts) = &parts
                && !parts.iter().any(|p| present(p))
            {
                eprintln!(
                    "[MFC-DISPOSE] WARNING: {} no longer exists, skipping",
                    redact_credentials(&candidate.path)
                );
                report.tally_mut(category).vanished += 1;
                continue;
            }

            if options.dry_run {
                self.plan(candidate, &engine, snapshot, report);
                continue;
            }

            let result = engine.dispose(candidate);
            self.record(&result, snapshot, report);

            if result.succeeded
                && let Some(parts) = &parts
            {
                for dir in parent_dirs(parts) {
                    if reclaimer.reclaim(&dir) {
                        report.reclaimed_dirs.push(dir);
                    }
                }
            }
        }
    }

    fn plan(
        &self,
        candidate: &CandidateVideo,
        engine: &DispositionEngine<'_>,
        snapshot: &Snapshot,
        report: &mut PassReport,
    ) {
        let excluded = crate::disposal::stack::expand(&candidate.path)
            .map(|parts| parts.iter().any(|p| snapshot.exclusions.is_excluded(p)))
            .unwrap_or(true);
        if excluded {
            report.tally_mut(candidate.category).excluded += 1;
            return;
        }
        let destination = match snapshot.policy.mode {
            DispositionMode::Delete => None,
            DispositionMode::Relocate => engine.destination_for(candidate).ok(),
        };
        report.planned.push(PlannedDisposition {
            path: candidate.path.clone(),
            category: candidate.category,
            destination,
        });
    }

    fn record(&self, result: &DispositionResult, snapshot: &Snapshot, report: &mut PassReport) {
        let candidate = &result.candidate;
        let tally = report.tally_mut(candidate.category);
        match result.action {
            DispositionAction::SkippedExcluded => {
                tally.excluded += 1;
                return;
            }
            DispositionAction::SkippedMissing => {
                tally.vanished += 1;
                return;
            }
            DispositionAction::Failed => {
                tally.failed += 1;
                self.notifier.notify(&NotificationEvent::DispositionFailed {
                    path: redact_credentials(&candidate.path),
                    message: result.errors.join("; "),
                });
                return;
            }
            DispositionAction::Deleted
            | DispositionAction::Relocated
            | DispositionAction::CollisionResolved => {}
        }

        tally.cleaned += 1;
        report.cleaned.push(candidate.path.clone());

        if snapshot.policy.update_path_reference
            && let (Some(file_id), Some(destination)) = (&candidate.file_id, &result.destination)
            && let Err(err) = self.library.update_path_reference(file_id, destination)
        {
            eprintln!(
                "[{}] library still points at the old location of {}: {err}",
                err.code(),
                redact_credentials(&candidate.path)
            );
            self.log(ActivityEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
    }

    fn query_failed(&self, category: MediaCategory, err: &MfcError) {
        eprintln!("[{}] {} query failed: {err}", err.code(), category.plural());
        self.log(ActivityEvent::QueryFailed {
            category: category.to_string(),
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
        self.notifier.notify(&NotificationEvent::QueryFailed {
            category: category.plural().to_string(),
            message: err.to_string(),
        });
    }

    // ──────────────────── summarizing ────────────────────

    fn summarize(&self, report: &PassReport, policy: &DispositionPolicy) {
        if report.cleaned.is_empty() {
            self.debug("nothing cleaned, no summary");
            return;
        }
        self.notifier.notify(&NotificationEvent::PassSummary {
            movies: report.movies.cleaned,
            episodes: report.episodes.cleaned,
            music_videos: report.music_videos.cleaned,
            relocated: policy.mode == DispositionMode::Relocate,
        });

        let lines: Vec<String> = report.cleaned.iter().map(|p| redact_credentials(p)).collect();
        if let Err(err) = CleanerLog::new(&self.config.paths.cleaner_log).prepend(&lines) {
            eprintln!("[{}] cannot update cleaned-files log: {err}", err.code());
            self.log(ActivityEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
    }

    // ──────────────────── library rescan wait ────────────────────

    fn request_library_clean(&self, report: &PassReport) -> LibraryCleanOutcome {
        if !self.config.library.clean_library || report.cleaned.is_empty() {
            return LibraryCleanOutcome::NotNeeded;
        }
        let outcome = self.wait_and_clean();
        let (triggered, details) = match &outcome {
            LibraryCleanOutcome::Requested { polls } => {
                (true, format!("requested after {polls} scan checks"))
            }
            other => (false, format!("{other:?}")),
        };
        self.log(ActivityEvent::LibraryCleanRequested { triggered, details });
        outcome
    }

    fn wait_and_clean(&self) -> LibraryCleanOutcome {
        if !self.host.is_connected() {
            self.debug("no media host, library clean skipped");
            return LibraryCleanOutcome::NoHost;
        }
        if !self.waiter.wait(SETTLE_DELAY) {
            return LibraryCleanOutcome::Aborted;
        }

        let library = &self.config.library;
        let backoff = Duration::from_secs_f64((library.scan_wait_minutes * 60.0).max(0.0));
        let max_polls = max_scan_polls(
            self.config.service.scan_interval_minutes,
            library.scan_wait_minutes,
        );

        let mut polls = 0usize;
        loop {
            match self.host.is_library_scanning() {
                Ok(false) => break,
                Ok(true) if polls >= max_polls => {
                    eprintln!(
                        "[MFC-PASS] library still scanning after {polls} checks, not cleaning this pass"
                    );
                    return LibraryCleanOutcome::StillScanning { polls };
                }
                Ok(true) => {
                    self.debug(&format!(
                        "library is being updated, waiting {:.1} minutes before cleaning up",
                        library.scan_wait_minutes
                    ));
                    polls += 1;
                    if !self.waiter.wait(backoff) {
                        return LibraryCleanOutcome::Aborted;
                    }
                }
                Err(err) => {
                    eprintln!("[{}] cannot read library scan state: {err}", err.code());
                    return LibraryCleanOutcome::Failed {
                        details: err.to_string(),
                    };
                }
            }
        }

        match self.host.clean_library() {
            Ok(()) => LibraryCleanOutcome::Requested { polls },
            Err(err) => {
                eprintln!("[{}] library clean request failed: {err}", err.code());
                LibraryCleanOutcome::Failed {
                    details: err.to_string(),
                }
            }
        }
    }

    // ──────────────────── helpers ────────────────────

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }

    fn debug(&self, message: &str) {
        if self.config.service.debugging_enabled {
            eprintln!("[MFC-PASS] DEBUG: {message}");
        }
    }
}

/// Connect to the configured library and host, then run one pass.
///
/// Fails only when the library or host cannot be set up at all.
pub fn run_configured_pass(
    config: &Config,
    options: &PassOptions,
    logger: Option<ActivityLoggerHandle>,
    waiter: impl Waiter,
) -> crate::core::errors::Result<PassReport> {
    let platform = detect_platform()?;
    let connection = crate::library::connect(config, logger.clone())?;
    let notifier =
        NotificationManager::from_config(&config.notifications, Arc::clone(&connection.host));
    Ok(CleanupOrchestrator::new(
        config,
        connection.library.as_ref(),
        connection.host.as_ref(),
        platform.as_ref(),
        &notifier,
    )
    .with_logger(logger)
    .with_waiter(waiter)
    .run_pass(options))
}

/// How many times a busy library scan is re-checked before giving up.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn max_scan_polls(scan_interval_minutes: f64, scan_wait_minutes: f64) -> usize {
    if scan_wait_minutes <= 0.0 || scan_interval_minutes <= 0.0 {
        return 0;
    }
    (scan_interval_minutes / scan_wait_minutes).floor() as usize
}

fn parent_dirs(parts: &[PathBuf]) -> BTreeSet<PathBuf> {
    parts
        .iter()
        .filter_map(|p| p.parent())
        .filter(|p| p.parent().is_some())
        .map(Path::to_path_buf)
        .collect()
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::daemon::notifications::NotificationConfig;
    use crate::library::FileId;
    use crate::library::host::{OfflineHost, RecordingHost};
    use crate::library::memory::StaticLibrary;
    use crate::platform::pal::MockPlatform;
    use std::fs;
    use std::sync::atomic::Ordering;

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
        platform: MockPlatform,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.service.delete_when_idle = true;
            config.paths.cleaner_log = dir.path().join("cleaner.log");
            config.disk.check_path = dir.path().to_string_lossy().into_owned();
            Self {
                dir,
                config,
                platform: MockPlatform::with_free_pct("/", 50.0),
            }
        }

        fn video(&self, rel: &str) -> PathBuf {
            let path = self.dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"video").unwrap();
            path
        }

        fn run(
            &self,
            library: &StaticLibrary,
            host: &Arc<RecordingHost>,
            options: &PassOptions,
        ) -> PassReport {
            let notifier = NotificationManager::from_config(
                &NotificationConfig {
                    channels: vec!["host".to_string()],
                    ..NotificationConfig::default()
                },
                host.clone(),
            );
            CleanupOrchestrator::new(
                &self.config,
                library,
                host.as_ref(),
                &self.platform,
                &notifier,
            )
            .with_waiter(RecordingWaiter::default())
            .run_pass(options)
        }
    }

    fn movie(path: &Path) -> CandidateVideo {
        CandidateVideo::new(MediaCategory::Movie, path.to_string_lossy())
    }

    #[test]
    fn full_pass_deletes_reclaims_and_summarizes() {
        let mut fx = Fixture::new();
        fx.config.disposition.delete_related = true;
        fx.config.disposition.delete_folders = true;
        let video = fx.video("movies/X/X.mkv");
        fs::write(fx.dir.path().join("movies/X/X.nfo"), b"meta").unwrap();

        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::default());
        let report = fx.run(&library, &host, &PassOptions::default());

        assert_eq!(
            report.states,
            vec![
                PassState::Idle,
                PassState::Gating,
                PassState::PerCategorySweep,
                PassState::Summarizing,
                PassState::LibraryRescanWait,
                PassState::Idle,
            ]
        );
        assert_eq!(report.movies.cleaned, 1);
        assert!(!fx.dir.path().join("movies/X").exists());
        assert!(fx.dir.path().join("movies").exists());
        assert_eq!(report.reclaimed_dirs.len(), 1);
        assert_eq!(host.notification_messages(), vec!["Cleaned up 1 movie"]);
        assert_eq!(report.library_clean, LibraryCleanOutcome::Requested { polls: 0 });
        assert_eq!(host.clean_requests.load(Ordering::SeqCst), 1);

        let log = fs::read_to_string(&fx.config.paths.cleaner_log).unwrap();
        assert!(log.contains(&format!("\t-\t{}\n", video.display())));
    }

    #[test]
    fn playing_video_skips_pass_without_side_effects() {
        let fx = Fixture::new();
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::playing());

        let report = fx.run(&library, &host, &PassOptions::default());
        assert_eq!(report.skipped, Some(SkipReason::VideoPlaying));
        assert_eq!(
            report.states,
            vec![PassState::Idle, PassState::Gating, PassState::Idle]
        );
        assert!(video.exists());
        assert!(library.queried_categories().is_empty());
    }

    #[test]
    fn unreachable_host_skips_pass() {
        let fx = Fixture::new();
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::default());
        host.unreachable.store(true, Ordering::SeqCst);

        let report = fx.run(&library, &host, &PassOptions::default());
        assert!(matches!(
            report.skipped,
            Some(SkipReason::HostUnreachable { .. })
        ));
        assert!(video.exists());
    }

    #[test]
    fn force_bypasses_gating() {
        let fx = Fixture::new();
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::playing());

        let options = PassOptions {
            force: true,
            ..PassOptions::default()
        };
        let report = fx.run(&library, &host, &options);
        assert!(report.skipped.is_none());
        assert!(!video.exists());
    }

    #[test]
    fn disk_pressure_mode_gates_on_free_space() {
        let mut fx = Fixture::new();
        fx.config.disk.delete_when_low_disk_space = true;
        fx.config.disk.threshold_pct = 10.0;
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::default());

        fx.platform = MockPlatform::with_free_pct("/", 50.0);
        let report = fx.run(&library, &host, &PassOptions::default());
        assert!(matches!(report.skipped, Some(SkipReason::DiskNotLow { .. })));
        assert!(video.exists());

        fx.platform = MockPlatform::with_free_pct("/", 5.0);
        let report = fx.run(&library, &host, &PassOptions::default());
        assert!(report.skipped.is_none());
        assert!(!video.exists());
    }

    #[test]
    fn vanished_and_excluded_are_not_failures() {
        let mut fx = Fixture::new();
        let kept = fx.video("protected/K.mkv");
        fx.config.exclusions.enabled = true;
        fx.config.exclusions.paths = vec![fx.dir.path().join("protected").to_string_lossy().into_owned()];

        let library = StaticLibrary::new()
            .with(movie(&fx.dir.path().join("movies/gone.mkv")))
            .with(movie(&kept));
        let host = Arc::new(RecordingHost::default());
        let report = fx.run(&library, &host, &PassOptions::default());

        assert_eq!(report.movies.vanished, 1);
        assert_eq!(report.movies.excluded, 1);
        assert_eq!(report.failures(), 0);
        assert!(kept.exists());
        assert!(host.notification_messages().is_empty());
        assert_eq!(report.library_clean, LibraryCleanOutcome::NotNeeded);
    }

    #[test]
    fn failed_query_skips_only_that_category() {
        let fx = Fixture::new();
        let episode = fx.video("tv/S/s01e01.mkv");
        let library = StaticLibrary::new()
            .failing(MediaCategory::Movie)
            .with(CandidateVideo::new(
                MediaCategory::Episode,
                episode.to_string_lossy(),
            ));
        let host = Arc::new(RecordingHost::default());
        let report = fx.run(&library, &host, &PassOptions::default());

        assert!(report.movies.query_error.is_some());
        assert_eq!(report.query_failures(), 1);
        assert_eq!(report.episodes.cleaned, 1);
        assert!(!episode.exists());
        let messages = host.notification_messages();
        assert!(messages.iter().any(|m| m.starts_with("Skipped movies cleanup")));
        assert!(messages.contains(&"Cleaned up 1 episode".to_string()));
    }

    #[test]
    fn low_rating_criterion_keeps_music_videos_running() {
        let mut fx = Fixture::new();
        fx.config.expiration.delete_when_low_rated = true;
        fx.config.expiration.minimum_rating = 6.0;
        assert!(fx.config.categories.movies);
        assert!(fx.config.categories.episodes);
        assert!(fx.config.categories.music_videos);
        let clip = fx.video("music/Band/Song.mkv");
        let library = StaticLibrary::new().with(CandidateVideo::new(
            MediaCategory::MusicVideo,
            clip.to_string_lossy(),
        ));
        let host = Arc::new(RecordingHost::default());
        let report = fx.run(&library, &host, &PassOptions::default());

        assert!(report.music_videos.query_error.is_none());
        assert_eq!(report.query_failures(), 0);
        assert_eq!(report.music_videos.cleaned, 1);
        assert!(!clip.exists());
        assert_eq!(library.queried_categories().len(), 3);
        let messages = host.notification_messages();
        assert!(!messages.iter().any(|m| m.starts_with("Skipped")));
    }

    #[test]
    fn relocate_without_holding_folder_mutates_nothing() {
        let mut fx = Fixture::new();
        fx.config.disposition.mode = DispositionMode::Relocate;
        fx.config.disposition.holding_folder = None;
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::default());

        let report = fx.run(&library, &host, &PassOptions::default());
        assert!(matches!(
            report.skipped,
            Some(SkipReason::Configuration { .. })
        ));
        assert!(video.exists());
        assert!(library.queried_categories().is_empty());
        assert_eq!(host.notification_messages().len(), 1);
    }

    #[test]
    fn relocation_updates_path_reference() {
        let mut fx = Fixture::new();
        let holding = fx.dir.path().join("holding");
        fx.config.disposition.mode = DispositionMode::Relocate;
        fx.config.disposition.holding_folder = Some(holding.clone());
        fx.config.disposition.update_path_reference = true;
        let video = fx.video("tv/Show/s01e02.mkv");
        let mut episode = CandidateVideo::new(MediaCategory::Episode, video.to_string_lossy());
        episode.show = Some("Show".to_string());
        episode.season = Some(1);
        episode.file_id = Some(FileId {
            store: "MyVideos131.db".to_string(),
            id: 7,
        });

        let library = StaticLibrary::new().with(episode);
        let host = Arc::new(RecordingHost::default());
        let report = fx.run(&library, &host, &PassOptions::default());

        let dest = holding.join("Show").join("Season 1");
        assert_eq!(report.episodes.cleaned, 1);
        assert!(dest.join("s01e02.mkv").exists());
        let updates = library.path_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0.id, 7);
        assert_eq!(updates[0].1, dest);
        assert_eq!(host.notification_messages(), vec!["Moved 1 episode"]);
    }

    #[test]
    fn dry_run_plans_without_mutation() {
        let fx = Fixture::new();
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::default());

        let options = PassOptions {
            dry_run: true,
            ..PassOptions::default()
        };
        let report = fx.run(&library, &host, &options);
        assert_eq!(report.planned.len(), 1);
        assert!(report.cleaned.is_empty());
        assert!(video.exists());
        assert!(!report.states.contains(&PassState::Summarizing));
        assert!(host.notification_messages().is_empty());
        assert!(!fx.config.paths.cleaner_log.exists());
    }

    #[test]
    fn busy_library_is_polled_then_given_up() {
        let mut fx = Fixture::new();
        fx.config.service.scan_interval_minutes = 30.0;
        fx.config.library.scan_wait_minutes = 10.0;
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::default());
        host.scanning_polls.store(usize::MAX, Ordering::SeqCst);

        let report = fx.run(&library, &host, &PassOptions::default());
        assert_eq!(report.library_clean, LibraryCleanOutcome::StillScanning { polls: 3 });
        assert_eq!(host.clean_requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scan_finishing_within_bound_triggers_clean() {
        let fx = Fixture::new();
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = Arc::new(RecordingHost::default());
        host.scanning_polls.store(2, Ordering::SeqCst);

        let report = fx.run(&library, &host, &PassOptions::default());
        assert_eq!(report.library_clean, LibraryCleanOutcome::Requested { polls: 2 });
        assert_eq!(host.clean_requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn offline_host_skips_library_clean() {
        let fx = Fixture::new();
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let notifier = NotificationManager::disabled();
        let report = CleanupOrchestrator::new(
            &fx.config,
            &library,
            &OfflineHost,
            &fx.platform,
            &notifier,
        )
        .with_waiter(RecordingWaiter::default())
        .run_pass(&PassOptions::default());

        assert_eq!(report.movies.cleaned, 1);
        assert_eq!(report.library_clean, LibraryCleanOutcome::NoHost);
    }

    #[test]
    fn activity_events_bracket_the_pass() {
        let fx = Fixture::new();
        let video = fx.video("movies/X/X.mkv");
        let library = StaticLibrary::new().with(movie(&video));
        let host = RecordingHost::default();
        let notifier = NotificationManager::disabled();
        let (logger, rx) = ActivityLoggerHandle::capture(64);

        CleanupOrchestrator::new(&fx.config, &library, &host, &fx.platform, &notifier)
            .with_logger(Some(logger))
            .with_waiter(RecordingWaiter::default())
            .run_pass(&PassOptions::default());

        let events: Vec<ActivityEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(ActivityEvent::PassStarted { .. })));
        assert!(events.iter().any(|e| matches!(e, ActivityEvent::FileDeleted { .. })));
        assert!(matches!(
            events.last(),
            Some(ActivityEvent::PassCompleted { movies: 1, .. })
        ));
    }

    #[test]
    fn scan_poll_bound() {
        assert_eq!(max_scan_polls(30.0, 5.0), 6);
        assert_eq!(max_scan_polls(30.0, 7.0), 4);
        assert_eq!(max_scan_polls(30.0, 0.0), 0);
        assert_eq!(max_scan_polls(2.0, 5.0), 0);
    }

    #[test]
    fn thread_waiter_returns_early_on_shutdown() {
        let flag = Arc::new(AtomicBool::new(true));
        let waiter = ThreadWaiter::with_shutdown(flag);
        let started = Instant::now();
        assert!(!waiter.wait(Duration::from_secs(60)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
