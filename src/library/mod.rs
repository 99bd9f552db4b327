//! Video library access: candidate model, expiration queries, metadata
//! backends (direct SQLite or host JSON-RPC), and host control.

#![allow(missing_docs)]

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::config::{Config, LibraryBackend};
use crate::core::errors::Result;
use crate::library::host::{MediaHost, OfflineHost};
use crate::library::query::ExpirationCriteria;
use crate::logger::dual::ActivityLoggerHandle;

pub mod host;
#[cfg(feature = "jsonrpc")]
pub mod jsonrpc;
pub mod memory;
pub mod query;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

// ──────────────────── categories ────────────────────

/// Library section a candidate comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Movie,
    Episode,
    #[cfg_attr(feature = "cli", value(name = "musicvideo"))]
    MusicVideo,
}

impl MediaCategory {
    pub const ALL: [Self; 3] = [Self::Movie, Self::Episode, Self::MusicVideo];

    /// Plural label used in summaries ("3 movies").
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Movie => "movies",
            Self::Episode => "episodes",
            Self::MusicVideo => "music videos",
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Episode => write!(f, "episode"),
            Self::MusicVideo => write!(f, "musicvideo"),
        }
    }
}

// ──────────────────── ratings ────────────────────

/// User rating, keeping "never rated" apart from "rated zero".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Rating {
    Unrated,
    Rated(f64),
}

impl Rating {
    /// The host RPC reports unrated items as zero and cannot express a real
    /// zero rating, so zero maps to unrated.
    #[must_use]
    pub fn from_rpc_value(value: f64) -> Self {
        if value == 0.0 || !value.is_finite() {
            Self::Unrated
        } else {
            Self::Rated(value)
        }
    }
}

// ──────────────────── candidates ────────────────────

/// Opaque handle to a file row in a specific metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    pub store: String,
    pub id: i64,
}

/// A video matching the expiration criteria for one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateVideo {
    /// Absolute file path; may be a `stack://` expression or a network path.
    pub path: String,
    pub category: MediaCategory,
    pub title: String,
    pub show: Option<String>,
    pub season: Option<i64>,
    pub year: Option<i32>,
    pub artists: Vec<String>,
    pub file_id: Option<FileId>,
}

impl CandidateVideo {
    /// Minimal candidate with only a path and category.
    #[must_use]
    pub fn new(category: MediaCategory, path: impl Into<String>) -> Self {
        let path = path.into();
        let title = Path::new(&path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            category,
            title,
            show: None,
            season: None,
            year: None,
            artists: Vec::new(),
            file_id: None,
        }
    }
}

/// Source of expired candidates.
pub trait VideoLibrary {
    /// Human-readable description for diagnostics.
    fn describe(&self) -> String;

    /// Watched videos of `category` matching `criteria`. Order is unspecified.
    fn find_expired(
        &self,
        category: MediaCategory,
        criteria: &ExpirationCriteria,
    ) -> Result<Vec<CandidateVideo>>;

    /// Repoint a relocated file's directory reference, atomically.
    fn update_path_reference(&self, file_id: &FileId, new_dir: &Path) -> Result<()>;
}

/// Collaborators for one pass, built from the current config snapshot.
pub struct LibraryConnection {
    pub library: Box<dyn VideoLibrary>,
    pub host: Arc<dyn MediaHost>,
}

/// Build the configured library backend and media host.
pub fn connect(config: &Config, logger: Option<ActivityLoggerHandle>) -> Result<LibraryConnection> {
    let host = build_host(config)?;
    let library: Box<dyn VideoLibrary> = match config.library.backend {
        LibraryBackend::Sqlite => open_sqlite(config, logger)?,
        LibraryBackend::Jsonrpc => open_jsonrpc(config)?,
    };
    Ok(LibraryConnection { library, host })
}

/// Media host from `host.rpc_url`, or an offline stand-in when unset.
pub fn build_host(config: &Config) -> Result<Arc<dyn MediaHost>> {
    match &config.host.rpc_url {
        #[cfg(feature = "jsonrpc")]
        Some(_) => Ok(Arc::new(jsonrpc::JsonRpcClient::from_config(&config.host)?)),
        #[cfg(not(feature = "jsonrpc"))]
        Some(_) => {
            eprintln!("[MFC-HOST] host.rpc_url ignored: built without the jsonrpc feature");
            Ok(Arc::new(OfflineHost))
        }
        None => Ok(Arc::new(OfflineHost)),
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(
    config: &Config,
    logger: Option<ActivityLoggerHandle>,
) -> Result<Box<dyn VideoLibrary>> {
    let mut store = sqlite_store::SqliteLibrary::discover(&config.library.database_dir)?;
    if let Some(logger) = logger {
        store = store.with_logger(logger);
    }
    Ok(Box::new(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(
    _config: &Config,
    _logger: Option<ActivityLoggerHandle>,
) -> Result<Box<dyn VideoLibrary>> {
    Err(crate::core::errors::MfcError::UnsupportedPlatform {
        details: "library.backend = \"sqlite\" requires the sqlite feature".to_string(),
    })
}

#[cfg(feature = "jsonrpc")]
fn open_jsonrpc(config: &Config) -> Result<Box<dyn VideoLibrary>> {
    Ok(Box::new(jsonrpc::JsonRpcClient::from_config(&config.host)?))
}

#[cfg(not(feature = "jsonrpc"))]
fn open_jsonrpc(_config: &Config) -> Result<Box<dyn VideoLibrary>> {
    Err(crate::core::errors::MfcError::UnsupportedPlatform {
        details: "library.backend = \"jsonrpc\" requires the jsonrpc feature".to_string(),
    })
}
