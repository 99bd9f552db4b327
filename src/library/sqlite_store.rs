//! Direct access to the media center's `MyVideos*.db` SQLite stores.
//!
//! Every store in the database directory is queried and the results are
//! unioned, newest store first. A store that fails to open or query loses its
//! contribution only; the call fails when no store could answer.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};

use crate::core::errors::{MfcError, Result};
use crate::library::query::{ExpirationCriteria, ExpirationQuery, SqlParam};
use crate::library::{CandidateVideo, FileId, MediaCategory, VideoLibrary};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

const STORE_PREFIX: &str = "MyVideos";
const STORE_SUFFIX: &str = ".db";
/// The host writes to the store concurrently; wait out its locks briefly.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-category projection onto the shared candidate row shape.
struct CategorySchema {
    select: &'static str,
    rating_column: Option<&'static str>,
}

const fn schema(category: MediaCategory) -> CategorySchema {
    match category {
        MediaCategory::Movie => CategorySchema {
            select: "SELECT files.idFile, path.strPath, files.strFilename, movie.c00, \
                     movie.premiered, NULL, NULL, NULL \
                     FROM movie \
                     JOIN files ON movie.idFile = files.idFile \
                     JOIN path ON files.idPath = path.idPath",
            rating_column: Some("movie.c05"),
        },
        MediaCategory::Episode => CategorySchema {
            select: "SELECT files.idFile, path.strPath, files.strFilename, episode.c00, \
                     NULL, tvshow.c00, episode.c12, NULL \
                     FROM episode \
                     JOIN files ON episode.idFile = files.idFile \
                     JOIN path ON files.idPath = path.idPath \
                     JOIN tvshow ON episode.idShow = tvshow.idShow",
            rating_column: Some("episode.c03"),
        },
        MediaCategory::MusicVideo => CategorySchema {
            select: "SELECT files.idFile, path.strPath, files.strFilename, musicvideo.c00, \
                     musicvideo.premiered, NULL, NULL, musicvideo.c10 \
                     FROM musicvideo \
                     JOIN files ON musicvideo.idFile = files.idFile \
                     JOIN path ON files.idPath = path.idPath",
            rating_column: None,
        },
    }
}

/// One store that could not contribute to a query.
#[derive(Debug, Clone)]
pub struct StoreFailure {
    pub store: PathBuf,
    pub details: String,
}

/// Union view over every discovered `MyVideos*.db` store.
pub struct SqliteLibrary {
    database_dir: PathBuf,
    stores: Vec<PathBuf>,
    logger: Option<ActivityLoggerHandle>,
}

impl SqliteLibrary {
    /// List the stores in `database_dir`, newest schema version first.
    pub fn discover(database_dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(database_dir).map_err(|err| MfcError::MetadataQuery {
            context: "discover",
            details: format!("cannot read {}: {err}", database_dir.display()),
        })?;

        let mut stores: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| {
                        name.starts_with(STORE_PREFIX) && name.ends_with(STORE_SUFFIX)
                    })
            })
            .collect();
        stores.sort_by_key(|path| std::cmp::Reverse(store_version(path)));

        Ok(Self {
            database_dir: database_dir.to_path_buf(),
            stores,
            logger: None,
        })
    }

    /// Explicit store list, queried in the given order.
    #[must_use]
    pub fn from_stores(stores: Vec<PathBuf>) -> Self {
        let database_dir = stores
            .first()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            database_dir,
            stores,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn stores(&self) -> &[PathBuf] {
        &self.stores
    }

    /// Query every store, returning the union and the per-store failures.
    pub fn find_expired_detailed(
        &self,
        category: MediaCategory,
        criteria: &ExpirationCriteria,
    ) -> Result<(Vec<CandidateVideo>, Vec<StoreFailure>)> {
        if self.stores.is_empty() {
            return Err(MfcError::MetadataQuery {
                context: "discover",
                details: format!(
                    "no {STORE_PREFIX}*{STORE_SUFFIX} store in {}",
                    self.database_dir.display()
                ),
            });
        }

        let query = ExpirationQuery::build(category, criteria, chrono::Local::now().naive_local())?;
        let shape = schema(category);
        let filter = query.to_sql(shape.rating_column)?;
        let sql = format!("{} WHERE {}", shape.select, filter.clause);
        let params: Vec<SqlValue> = filter.params.iter().map(to_sql_value).collect();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        for store in &self.stores {
            match query_store(store, &sql, &params, category) {
                Ok(rows) => {
                    for candidate in rows {
                        // Older schema versions often mirror the live library.
                        if seen.insert(candidate.path.clone()) {
                            candidates.push(candidate);
                        }
                    }
                }
                Err(err) => failures.push(StoreFailure {
                    store: store.clone(),
                    details: err.to_string(),
                }),
            }
        }

        if failures.len() == self.stores.len() {
            let details = failures
                .iter()
                .map(|f| format!("{}: {}", f.store.display(), f.details))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(MfcError::MetadataQuery {
                context: "rusqlite",
                details,
            });
        }

        Ok((candidates, failures))
    }
}

impl VideoLibrary for SqliteLibrary {
    fn describe(&self) -> String {
        format!(
            "sqlite ({} store(s) in {})",
            self.stores.len(),
            self.database_dir.display()
        )
    }

    fn find_expired(
        &self,
        category: MediaCategory,
        criteria: &ExpirationCriteria,
    ) -> Result<Vec<CandidateVideo>> {
        let (candidates, failures) = self.find_expired_detailed(category, criteria)?;
        for failure in failures {
            eprintln!(
                "[MFC-2102] store {} skipped for {category}: {}",
                failure.store.display(),
                failure.details
            );
            if let Some(logger) = &self.logger {
                logger.send(ActivityEvent::QueryFailed {
                    category: category.to_string(),
                    error_code: "MFC-2102".to_string(),
                    error_message: format!("{}: {}", failure.store.display(), failure.details),
                });
            }
        }
        Ok(candidates)
    }

    fn update_path_reference(&self, file_id: &FileId, new_dir: &Path) -> Result<()> {
        let store = PathBuf::from(&file_id.store);
        let update_err = |details: String| MfcError::MetadataUpdate {
            context: "rusqlite",
            details,
        };

        let mut conn = Connection::open_with_flags(&store, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(|e| update_err(format!("open {}: {e}", store.display())))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| update_err(e.to_string()))?;

        let dir = store_directory(new_dir);
        let tx = conn.transaction().map_err(|e| update_err(e.to_string()))?;
        tx.execute("INSERT OR IGNORE INTO path (strPath) VALUES (?1)", params![dir])
            .map_err(|e| update_err(format!("insert path {dir}: {e}")))?;
        let id_path: i64 = tx
            .query_row(
                "SELECT idPath FROM path WHERE strPath = ?1",
                params![dir],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| update_err(e.to_string()))?
            .ok_or_else(|| update_err(format!("path {dir} missing after insert")))?;
        let changed = tx
            .execute(
                "UPDATE files SET idPath = ?1 WHERE idFile = ?2",
                params![id_path, file_id.id],
            )
            .map_err(|e| update_err(e.to_string()))?;
        if changed != 1 {
            return Err(update_err(format!(
                "file {} not found in {}",
                file_id.id,
                store.display()
            )));
        }
        tx.commit().map_err(|e| update_err(e.to_string()))?;
        Ok(())
    }
}

fn query_store(
    store: &Path,
    sql: &str,
    params: &[SqlValue],
    category: MediaCategory,
) -> Result<Vec<CandidateVideo>> {
    let conn = Connection::open_with_flags(
        store,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mut stmt = conn.prepare(sql)?;
    let store_name = store.to_string_lossy().into_owned();

    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let id: i64 = row.get(0)?;
        let dir: Option<String> = row.get(1)?;
        let file_name: Option<String> = row.get(2)?;
        let title: Option<String> = row.get(3)?;
        let premiered: Option<String> = row.get(4)?;
        let show: Option<String> = row.get(5)?;
        let season: Option<SqlValue> = row.get(6)?;
        let artist: Option<String> = row.get(7)?;
        Ok((id, dir, file_name, title, premiered, show, season, artist))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, dir, file_name, title, premiered, show, season, artist) = row?;
        let file_name = file_name.unwrap_or_default();
        let path = join_store_path(dir.as_deref().unwrap_or_default(), &file_name);
        let mut candidate = CandidateVideo::new(category, path);
        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            candidate.title = title;
        }
        candidate.year = premiered.as_deref().and_then(parse_year);
        candidate.show = show.filter(|s| !s.trim().is_empty());
        candidate.season = season.and_then(|v| match v {
            SqlValue::Integer(n) => Some(n),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        });
        candidate.artists = artist
            .map(|a| {
                a.split(" / ")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        candidate.file_id = Some(FileId {
            store: store_name.clone(),
            id,
        });
        out.push(candidate);
    }
    Ok(out)
}

/// Stacked files carry their full `stack://` expression as the file name.
fn join_store_path(dir: &str, file_name: &str) -> String {
    if file_name.starts_with("stack://") || crate::core::paths::is_network_path(file_name) {
        file_name.to_string()
    } else {
        format!("{dir}{file_name}")
    }
}

/// The store keeps directories with a trailing separator.
fn store_directory(dir: &Path) -> String {
    let raw = dir.to_string_lossy();
    if raw.ends_with('/') || raw.ends_with('\\') {
        raw.into_owned()
    } else {
        format!("{raw}{}", std::path::MAIN_SEPARATOR)
    }
}

fn parse_year(raw: &str) -> Option<i32> {
    raw.trim()
        .get(..4)
        .and_then(|y| y.parse::<i32>().ok())
        .filter(|y| *y > 0)
}

fn store_version(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(STORE_PREFIX))
        .and_then(|n| n.strip_suffix(STORE_SUFFIX))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn to_sql_value(param: &SqlParam) -> SqlValue {
    match param {
        SqlParam::Integer(n) => SqlValue::Integer(*n),
        SqlParam::Real(x) => SqlValue::Real(*x),
        SqlParam::Text(s) => SqlValue::Text(s.clone()),
    }
}
