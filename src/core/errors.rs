//! MFC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, MfcError>;

/// Top-level error type for the media file cleaner.
#[derive(Debug, Error)]
pub enum MfcError {
    #[error("[MFC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[MFC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[MFC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[MFC-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[MFC-2001] filesystem stats failure for {path}: {details}")]
    FsStats { path: PathBuf, details: String },

    #[error("[MFC-2002] volume reports zero capacity: {path}")]
    ZeroCapacity { path: PathBuf },

    #[error("[MFC-2003] path is excluded from modification: {path}")]
    Excluded { path: PathBuf },

    #[error("[MFC-2004] malformed path {path}: {details}")]
    InvalidPath { path: String, details: String },

    #[error("[MFC-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[MFC-2102] metadata query failed in {context}: {details}")]
    MetadataQuery {
        context: &'static str,
        details: String,
    },

    #[error("[MFC-2103] metadata update failed in {context}: {details}")]
    MetadataUpdate {
        context: &'static str,
        details: String,
    },

    #[error("[MFC-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[MFC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[MFC-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[MFC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl MfcError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "MFC-1001",
            Self::MissingConfig { .. } => "MFC-1002",
            Self::ConfigParse { .. } => "MFC-1003",
            Self::UnsupportedPlatform { .. } => "MFC-1101",
            Self::FsStats { .. } => "MFC-2001",
            Self::ZeroCapacity { .. } => "MFC-2002",
            Self::Excluded { .. } => "MFC-2003",
            Self::InvalidPath { .. } => "MFC-2004",
            Self::Serialization { .. } => "MFC-2101",
            Self::MetadataQuery { .. } => "MFC-2102",
            Self::MetadataUpdate { .. } => "MFC-2103",
            Self::PermissionDenied { .. } => "MFC-3001",
            Self::Io { .. } => "MFC-3002",
            Self::ChannelClosed { .. } => "MFC-3003",
            Self::Runtime { .. } => "MFC-3900",
        }
    }

    /// Whether retrying on a later pass might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::FsStats { .. }
                | Self::MetadataQuery { .. }
                | Self::MetadataUpdate { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// Permission failures are promoted to [`MfcError::PermissionDenied`] so
    /// callers can tell them apart from transient IO trouble.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied {
                path: path.as_ref().to_path_buf(),
            };
        }
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the underlying cause is a missing file or directory.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for MfcError {
    fn from(value: rusqlite::Error) -> Self {
        Self::MetadataQuery {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

#[cfg(feature = "jsonrpc")]
impl From<reqwest::Error> for MfcError {
    fn from(value: reqwest::Error) -> Self {
        Self::MetadataQuery {
            context: "jsonrpc",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for MfcError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for MfcError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
