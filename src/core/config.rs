//! Configuration system: TOML file + env var overrides + smart defaults.
//!
//! A fresh [`Config`] is loaded at the start of every cleanup pass; the
//! derived snapshots ([`Config::expiration_criteria`],
//! [`Config::disposition_policy`], [`Config::exclusion_filter`]) are the only
//! values the pass components ever see.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MfcError, Result};
use crate::daemon::notifications::NotificationConfig;
use crate::disposal::exclusion::ExclusionFilter;
use crate::disposal::{DispositionMode, DispositionPolicy};
use crate::library::MediaCategory;
use crate::library::query::ExpirationCriteria;

/// At most this many exclusion prefixes may be configured.
pub const MAX_EXCLUSION_PATHS: usize = 3;

/// Full MFC configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub categories: CategoriesConfig,
    pub expiration: ExpirationConfig,
    pub disk: DiskConfig,
    pub disposition: DispositionConfig,
    pub exclusions: ExclusionConfig,
    pub library: LibraryConfig,
    pub host: HostConfig,
    pub notifications: NotificationConfig,
    pub paths: PathsConfig,
}

/// Service loop timing and gating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub enabled: bool,
    pub delayed_start_minutes: f64,
    pub scan_interval_minutes: f64,
    pub tick_seconds: u64,
    /// Skip a pass entirely while the host is playing video.
    pub delete_when_idle: bool,
    pub debugging_enabled: bool,
}

/// Which library sections are swept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CategoriesConfig {
    pub movies: bool,
    pub episodes: bool,
    pub music_videos: bool,
}

/// Expiration criteria knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpirationConfig {
    pub enable_expiration: bool,
    pub expire_after_days: f64,
    pub enable_added_threshold: bool,
    pub added_before_days: f64,
    pub delete_when_low_rated: bool,
    pub minimum_rating: f64,
    pub ignore_no_rating: bool,
    pub not_in_progress: bool,
}

/// Disk-pressure gating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiskConfig {
    pub delete_when_low_disk_space: bool,
    pub threshold_pct: f64,
    /// Local path or `protocol://host/share` network path.
    pub check_path: String,
}

/// How expired files are disposed of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispositionConfig {
    pub mode: DispositionMode,
    pub holding_folder: Option<PathBuf>,
    pub create_subdirs: bool,
    pub update_path_reference: bool,
    pub delete_related: bool,
    pub delete_folders: bool,
    /// Comma-separated extensions that do not keep a directory alive.
    pub ignore_extensions: String,
}

/// Paths that must never be touched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ExclusionConfig {
    pub enabled: bool,
    pub paths: Vec<String>,
}

/// Metadata store access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LibraryBackend {
    #[default]
    Sqlite,
    Jsonrpc,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LibraryConfig {
    pub backend: LibraryBackend,
    pub database_dir: PathBuf,
    /// Ask the host to clean its library after files were disposed of.
    pub clean_library: bool,
    pub scan_wait_minutes: f64,
}

/// Media-center JSON-RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    pub rpc_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
}

/// Filesystem paths used by mfc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub cleaner_log: PathBuf,
    pub jsonl_log: PathBuf,
    pub sqlite_db: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delayed_start_minutes: 1.0,
            scan_interval_minutes: 30.0,
            tick_seconds: 10,
            delete_when_idle: true,
            debugging_enabled: false,
        }
    }
}

impl Default for CategoriesConfig {
    fn default() -> Self {
        Self {
            movies: true,
            episodes: true,
            music_videos: true,
        }
    }
}

impl CategoriesConfig {
    /// Enabled categories in sweep order.
    #[must_use]
    pub fn enabled(&self) -> Vec<MediaCategory> {
        let mut out = Vec::with_capacity(3);
        if self.movies {
            out.push(MediaCategory::Movie);
        }
        if self.episodes {
            out.push(MediaCategory::Episode);
        }
        if self.music_videos {
            out.push(MediaCategory::MusicVideo);
        }
        out
    }
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            enable_expiration: true,
            expire_after_days: 21.0,
            enable_added_threshold: false,
            added_before_days: 90.0,
            delete_when_low_rated: false,
            minimum_rating: 5.0,
            ignore_no_rating: true,
            not_in_progress: false,
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            delete_when_low_disk_space: false,
            threshold_pct: 10.0,
            check_path: "/".to_string(),
        }
    }
}

impl Default for DispositionConfig {
    fn default() -> Self {
        Self {
            mode: DispositionMode::Delete,
            holding_folder: None,
            create_subdirs: true,
            update_path_reference: false,
            delete_related: false,
            delete_folders: false,
            ignore_extensions: ".nfo,.jpg,.txt,.srt".to_string(),
        }
    }
}

impl DispositionConfig {
    /// Parsed ignore list: lowercase, without leading dots, empties dropped.
    #[must_use]
    pub fn ignored_extensions(&self) -> Vec<String> {
        self.ignore_extensions
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            backend: LibraryBackend::Sqlite,
            database_dir: home_dir()
                .join(".kodi")
                .join("userdata")
                .join("Database"),
            clean_library: true,
            scan_wait_minutes: 5.0,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            username: None,
            password: None,
            timeout_secs: 10,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = home_dir();
        let data = home.join(".local").join("share").join("mfc");
        Self {
            config_file: home.join(".config").join("mfc").join("config.toml"),
            cleaner_log: data.join("cleaner.log"),
            jsonl_log: data.join("activity.jsonl"),
            sqlite_db: data.join("activity.sqlite3"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[MFC-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| MfcError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(MfcError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON, stable across processes and releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Criteria snapshot for this pass.
    ///
    /// When relocating, the holding folder is excluded from queries so that
    /// relocated files are never picked up again.
    #[must_use]
    pub fn expiration_criteria(&self) -> ExpirationCriteria {
        let exp = &self.expiration;
        let mut excluded_path_prefixes = Vec::new();
        if self.disposition.mode == DispositionMode::Relocate
            && let Some(holding) = &self.disposition.holding_folder
        {
            excluded_path_prefixes.push(holding.to_string_lossy().into_owned());
        }
        ExpirationCriteria {
            require_played: true,
            min_days_since_last_played: exp.enable_expiration.then_some(exp.expire_after_days),
            min_days_since_added: exp.enable_added_threshold.then_some(exp.added_before_days),
            max_rating: exp.delete_when_low_rated.then_some(exp.minimum_rating),
            ignore_unrated: exp.ignore_no_rating,
            require_not_in_progress: exp.not_in_progress,
            excluded_path_prefixes,
        }
    }

    /// Disposition snapshot for this pass.
    ///
    /// Fails with `InvalidConfig` when relocation is selected without a holding
    /// folder; the caller treats that as aborting every category of the pass.
    pub fn disposition_policy(&self) -> Result<DispositionPolicy> {
        let disp = &self.disposition;
        let holding_root = match disp.mode {
            DispositionMode::Delete => None,
            DispositionMode::Relocate => Some(disp.holding_folder.clone().ok_or_else(|| {
                MfcError::InvalidConfig {
                    details: "disposition.mode = \"relocate\" requires disposition.holding_folder"
                        .to_string(),
                }
            })?),
        };
        Ok(DispositionPolicy {
            mode: disp.mode,
            holding_root,
            create_category_subdirs: disp.create_subdirs,
            clean_related_files: disp.delete_related,
            delete_empty_parent_dirs: disp.delete_folders,
            ignored_extensions: disp.ignored_extensions(),
            update_path_reference: disp.update_path_reference,
        })
    }

    /// Exclusion filter snapshot for this pass.
    #[must_use]
    pub fn exclusion_filter(&self) -> ExclusionFilter {
        ExclusionFilter::new(self.exclusions.enabled, self.exclusions.paths.clone())
    }

    #[allow(clippy::too_many_lines)]
    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // service
        set_bool(&mut lookup, "MFC_SERVICE_ENABLED", &mut self.service.enabled)?;
        set_f64(
            &mut lookup,
            "MFC_SERVICE_DELAYED_START_MINUTES",
            &mut self.service.delayed_start_minutes,
        )?;
        set_f64(
            &mut lookup,
            "MFC_SERVICE_SCAN_INTERVAL_MINUTES",
            &mut self.service.scan_interval_minutes,
        )?;
        set_u64(
            &mut lookup,
            "MFC_SERVICE_TICK_SECONDS",
            &mut self.service.tick_seconds,
        )?;
        set_bool(
            &mut lookup,
            "MFC_SERVICE_DELETE_WHEN_IDLE",
            &mut self.service.delete_when_idle,
        )?;
        set_bool(
            &mut lookup,
            "MFC_SERVICE_DEBUGGING_ENABLED",
            &mut self.service.debugging_enabled,
        )?;

        // categories
        set_bool(&mut lookup, "MFC_CATEGORIES_MOVIES", &mut self.categories.movies)?;
        set_bool(
            &mut lookup,
            "MFC_CATEGORIES_EPISODES",
            &mut self.categories.episodes,
        )?;
        set_bool(
            &mut lookup,
            "MFC_CATEGORIES_MUSIC_VIDEOS",
            &mut self.categories.music_videos,
        )?;

        // expiration
        set_bool(
            &mut lookup,
            "MFC_EXPIRATION_ENABLE_EXPIRATION",
            &mut self.expiration.enable_expiration,
        )?;
        set_f64(
            &mut lookup,
            "MFC_EXPIRATION_EXPIRE_AFTER_DAYS",
            &mut self.expiration.expire_after_days,
        )?;
        set_bool(
            &mut lookup,
            "MFC_EXPIRATION_ENABLE_ADDED_THRESHOLD",
            &mut self.expiration.enable_added_threshold,
        )?;
        set_f64(
            &mut lookup,
            "MFC_EXPIRATION_ADDED_BEFORE_DAYS",
            &mut self.expiration.added_before_days,
        )?;
        set_bool(
            &mut lookup,
            "MFC_EXPIRATION_DELETE_WHEN_LOW_RATED",
            &mut self.expiration.delete_when_low_rated,
        )?;
        set_f64(
            &mut lookup,
            "MFC_EXPIRATION_MINIMUM_RATING",
            &mut self.expiration.minimum_rating,
        )?;
        set_bool(
            &mut lookup,
            "MFC_EXPIRATION_IGNORE_NO_RATING",
            &mut self.expiration.ignore_no_rating,
        )?;
        set_bool(
            &mut lookup,
            "MFC_EXPIRATION_NOT_IN_PROGRESS",
            &mut self.expiration.not_in_progress,
        )?;

        // disk
        set_bool(
            &mut lookup,
            "MFC_DISK_DELETE_WHEN_LOW_DISK_SPACE",
            &mut self.disk.delete_when_low_disk_space,
        )?;
        set_f64(
            &mut lookup,
            "MFC_DISK_THRESHOLD_PCT",
            &mut self.disk.threshold_pct,
        )?;
        if let Some(raw) = lookup("MFC_DISK_CHECK_PATH") {
            self.disk.check_path = raw;
        }

        // disposition
        if let Some(raw) = lookup("MFC_DISPOSITION_MODE") {
            self.disposition.mode = match raw.trim().to_ascii_lowercase().as_str() {
                "delete" => DispositionMode::Delete,
                "relocate" => DispositionMode::Relocate,
                other => {
                    return Err(MfcError::ConfigParse {
                        context: "env",
                        details: format!("MFC_DISPOSITION_MODE={other:?}: expected delete|relocate"),
                    });
                }
            };
        }
        if let Some(raw) = lookup("MFC_DISPOSITION_HOLDING_FOLDER") {
            self.disposition.holding_folder = Some(PathBuf::from(raw));
        }
        set_bool(
            &mut lookup,
            "MFC_DISPOSITION_CREATE_SUBDIRS",
            &mut self.disposition.create_subdirs,
        )?;
        set_bool(
            &mut lookup,
            "MFC_DISPOSITION_UPDATE_PATH_REFERENCE",
            &mut self.disposition.update_path_reference,
        )?;
        set_bool(
            &mut lookup,
            "MFC_DISPOSITION_DELETE_RELATED",
            &mut self.disposition.delete_related,
        )?;
        set_bool(
            &mut lookup,
            "MFC_DISPOSITION_DELETE_FOLDERS",
            &mut self.disposition.delete_folders,
        )?;
        if let Some(raw) = lookup("MFC_DISPOSITION_IGNORE_EXTENSIONS") {
            self.disposition.ignore_extensions = raw;
        }

        // exclusions ("smb://" paths contain ':' so the list separator is ';')
        set_bool(
            &mut lookup,
            "MFC_EXCLUSIONS_ENABLED",
            &mut self.exclusions.enabled,
        )?;
        if let Some(raw) = lookup("MFC_EXCLUSIONS_PATHS") {
            self.exclusions.paths = raw
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        // library
        if let Some(raw) = lookup("MFC_LIBRARY_BACKEND") {
            self.library.backend = match raw.trim().to_ascii_lowercase().as_str() {
                "sqlite" => LibraryBackend::Sqlite,
                "jsonrpc" => LibraryBackend::Jsonrpc,
                other => {
                    return Err(MfcError::ConfigParse {
                        context: "env",
                        details: format!("MFC_LIBRARY_BACKEND={other:?}: expected sqlite|jsonrpc"),
                    });
                }
            };
        }
        if let Some(raw) = lookup("MFC_LIBRARY_DATABASE_DIR") {
            self.library.database_dir = PathBuf::from(raw);
        }
        set_bool(
            &mut lookup,
            "MFC_LIBRARY_CLEAN_LIBRARY",
            &mut self.library.clean_library,
        )?;
        set_f64(
            &mut lookup,
            "MFC_LIBRARY_SCAN_WAIT_MINUTES",
            &mut self.library.scan_wait_minutes,
        )?;

        // host
        if let Some(raw) = lookup("MFC_HOST_RPC_URL") {
            self.host.rpc_url = Some(raw);
        }
        if let Some(raw) = lookup("MFC_HOST_USERNAME") {
            self.host.username = Some(raw);
        }
        if let Some(raw) = lookup("MFC_HOST_PASSWORD") {
            self.host.password = Some(raw);
        }
        set_u64(
            &mut lookup,
            "MFC_HOST_TIMEOUT_SECS",
            &mut self.host.timeout_secs,
        )?;

        // notifications
        set_bool(
            &mut lookup,
            "MFC_NOTIFICATIONS_ENABLED",
            &mut self.notifications.enabled,
        )?;
        set_bool(
            &mut lookup,
            "MFC_NOTIFICATIONS_NOTIFY_WHEN_IDLE",
            &mut self.notifications.notify_when_idle,
        )?;

        Ok(())
    }

    /// Strip trailing separators so prefix comparisons behave.
    fn normalize_paths(&mut self) {
        for path in &mut self.exclusions.paths {
            *path = trim_trailing_separator(path).to_string();
        }
        if let Some(holding) = &mut self.disposition.holding_folder {
            let s = holding.to_string_lossy().into_owned();
            *holding = PathBuf::from(trim_trailing_separator(&s));
        }
        self.disk.check_path = trim_trailing_separator(&self.disk.check_path).to_string();
    }

    /// Range and consistency checks.
    ///
    /// Relocation without a holding folder passes; it is reported by
    /// [`Config::disposition_policy`] at pass time.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.disk.threshold_pct) {
            return Err(MfcError::InvalidConfig {
                details: format!(
                    "disk.threshold_pct must be in [0, 100], got {}",
                    self.disk.threshold_pct
                ),
            });
        }

        let rating = self.expiration.minimum_rating;
        if !(rating > 0.0 && rating <= crate::library::query::RATING_SCALE_MAX) {
            return Err(MfcError::InvalidConfig {
                details: format!("expiration.minimum_rating must be in (0, 10], got {rating}"),
            });
        }

        for (name, val) in [
            (
                "service.scan_interval_minutes",
                self.service.scan_interval_minutes,
            ),
            (
                "library.scan_wait_minutes",
                self.library.scan_wait_minutes,
            ),
        ] {
            if !(val > 0.0 && val.is_finite()) {
                return Err(MfcError::InvalidConfig {
                    details: format!("{name} must be > 0, got {val}"),
                });
            }
        }

        for (name, val) in [
            (
                "service.delayed_start_minutes",
                self.service.delayed_start_minutes,
            ),
            (
                "expiration.expire_after_days",
                self.expiration.expire_after_days,
            ),
            (
                "expiration.added_before_days",
                self.expiration.added_before_days,
            ),
        ] {
            if !(val >= 0.0 && val.is_finite()) {
                return Err(MfcError::InvalidConfig {
                    details: format!("{name} must be >= 0, got {val}"),
                });
            }
        }

        if self.service.tick_seconds == 0 {
            return Err(MfcError::InvalidConfig {
                details: "service.tick_seconds must be >= 1".to_string(),
            });
        }
        if self.host.timeout_secs == 0 {
            return Err(MfcError::InvalidConfig {
                details: "host.timeout_secs must be >= 1".to_string(),
            });
        }

        if self.exclusions.paths.len() > MAX_EXCLUSION_PATHS {
            return Err(MfcError::InvalidConfig {
                details: format!(
                    "exclusions.paths accepts at most {MAX_EXCLUSION_PATHS} entries, got {}",
                    self.exclusions.paths.len()
                ),
            });
        }

        if let Some(raw) = &self.host.rpc_url {
            let parsed = url::Url::parse(raw).map_err(|error| MfcError::InvalidConfig {
                details: format!("host.rpc_url {raw:?} is not a valid URL: {error}"),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(MfcError::InvalidConfig {
                    details: format!("host.rpc_url must use http or https, got {}", parsed.scheme()),
                });
            }
        }

        if self.library.backend == LibraryBackend::Jsonrpc && self.host.rpc_url.is_none() {
            return Err(MfcError::InvalidConfig {
                details: "library.backend = \"jsonrpc\" requires host.rpc_url".to_string(),
            });
        }

        Ok(())
    }
}

fn trim_trailing_separator(raw: &str) -> &str {
    let trimmed = raw.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() || trimmed.ends_with(':') {
        // "/" stays "/", "smb://" and "C:\" keep their separator.
        raw
    } else {
        trimmed
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_f64<F>(lookup: &mut F, name: &str, slot: &mut f64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<f64>().map_err(|error| MfcError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_u64<F>(lookup: &mut F, name: &str, slot: &mut u64) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<u64>().map_err(|error| MfcError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}

fn set_bool<F>(lookup: &mut F, name: &str, slot: &mut bool) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<bool>().map_err(|error| MfcError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}
