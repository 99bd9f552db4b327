#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Duration, Local};
use rusqlite::{Connection, params};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_mfc") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "mfc.exe" } else { "mfc" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve mfc binary path for integration test"),
    }
}

/// Run the binary with `HOME` pointed at `home` so nothing leaks into the
/// real user directories.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("mfc-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env_remove("MFC_OUTPUT_FORMAT")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute mfc command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// First stdout line parsed as JSON.
pub fn json_line(result: &CmdResult) -> serde_json::Value {
    let line = result.stdout.lines().next().unwrap_or_else(|| {
        panic!("no stdout; log: {}", result.log_path.display())
    });
    serde_json::from_str(line)
        .unwrap_or_else(|e| panic!("bad json ({e}); log: {}", result.log_path.display()))
}

// ──────────────────── media library fixture ────────────────────

const SCHEMA: &str = "
    CREATE TABLE path (idPath INTEGER PRIMARY KEY, strPath TEXT);
    CREATE UNIQUE INDEX ix_path ON path (strPath);
    CREATE TABLE files (idFile INTEGER PRIMARY KEY, idPath INTEGER, strFilename TEXT,
                        playCount INTEGER, lastPlayed TEXT, dateAdded TEXT);
    CREATE TABLE bookmark (idBookmark INTEGER PRIMARY KEY, idFile INTEGER,
                           timeInSeconds REAL, type INTEGER);
    CREATE TABLE movie (idMovie INTEGER PRIMARY KEY, idFile INTEGER, c00 TEXT, c05 TEXT,
                        premiered TEXT);
    CREATE TABLE tvshow (idShow INTEGER PRIMARY KEY, c00 TEXT);
    CREATE TABLE episode (idEpisode INTEGER PRIMARY KEY, idFile INTEGER, idShow INTEGER,
                          c00 TEXT, c03 TEXT, c12 TEXT);
    CREATE TABLE musicvideo (idMVideo INTEGER PRIMARY KEY, idFile INTEGER, c00 TEXT,
                             c10 TEXT, premiered TEXT);
";

/// A throwaway home: media files, a `MyVideos` store and a config file.
pub struct MediaFixture {
    pub dir: tempfile::TempDir,
}

impl MediaFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create fixture dir");
        fs::create_dir_all(dir.path().join("Database")).expect("create database dir");
        let conn = Connection::open(Self::db_path_in(dir.path())).expect("open store");
        conn.execute_batch(SCHEMA).expect("create schema");
        Self { dir }
    }

    fn db_path_in(root: &Path) -> PathBuf {
        root.join("Database").join("MyVideos131.db")
    }

    pub fn home(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        Self::db_path_in(self.dir.path())
    }

    pub fn media(&self, rel: &str) -> PathBuf {
        self.dir.path().join("media").join(rel)
    }

    pub fn cleaner_log(&self) -> PathBuf {
        self.dir.path().join("data").join("cleaner.log")
    }

    pub fn sqlite_log(&self) -> PathBuf {
        self.dir.path().join("data").join("activity.sqlite3")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    /// Create a file under `media/`.
    pub fn touch(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.media(rel);
        fs::create_dir_all(path.parent().expect("media parent")).expect("create media dir");
        fs::write(&path, bytes).expect("write media file");
        path
    }

    /// Register a movie file that exists under `media/`.
    pub fn add_movie(&self, rel: &str, title: &str, plays: i64, last_played_days: i64) -> i64 {
        let path = self.touch(rel, b"video");
        let dir = format!("{}/", path.parent().expect("movie dir").display());
        let file = path
            .file_name()
            .expect("movie file name")
            .to_string_lossy()
            .into_owned();

        let conn = Connection::open(self.db_path()).expect("open store");
        let id_file = insert_file(&conn, &dir, &file, plays, last_played_days);
        conn.execute(
            "INSERT INTO movie (idFile, c00, c05, premiered) VALUES (?1, ?2, NULL, '2001-05-04')",
            params![id_file, title],
        )
        .expect("insert movie");
        id_file
    }

    /// Directory the store currently records for `id_file`.
    pub fn stored_dir(&self, id_file: i64) -> String {
        let conn = Connection::open(self.db_path()).expect("open store");
        conn.query_row(
            "SELECT path.strPath FROM files JOIN path ON files.idPath = path.idPath \
             WHERE files.idFile = ?1",
            params![id_file],
            |row| row.get(0),
        )
        .expect("stored dir")
    }

    /// Write `config.toml` with fixture paths plus `extra` TOML tables.
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let root = self.dir.path();
        let contents = format!(
            r#"[service]
delete_when_idle = true

[library]
backend = "sqlite"
database_dir = "{database}"
clean_library = false

[notifications]
channels = ["journal"]

[paths]
cleaner_log = "{cleaner_log}"
jsonl_log = "{jsonl}"
sqlite_db = "{sqlite}"

{extra}
"#,
            database = root.join("Database").display(),
            cleaner_log = self.cleaner_log().display(),
            jsonl = root.join("data").join("activity.jsonl").display(),
            sqlite = self.sqlite_log().display(),
        );
        let path = self.config_path();
        fs::write(&path, contents).expect("write config");
        path
    }
}

fn insert_file(conn: &Connection, dir: &str, file: &str, plays: i64, last_played_days: i64) -> i64 {
    conn.execute("INSERT OR IGNORE INTO path (strPath) VALUES (?1)", params![dir])
        .expect("insert path");
    let id_path: i64 = conn
        .query_row("SELECT idPath FROM path WHERE strPath = ?1", params![dir], |r| {
            r.get(0)
        })
        .expect("path id");
    let last_played = (Local::now().naive_local() - Duration::days(last_played_days))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    conn.execute(
        "INSERT INTO files (idPath, strFilename, playCount, lastPlayed, dateAdded) \
         VALUES (?1, ?2, ?3, ?4, '2020-01-01 00:00:00')",
        params![id_path, file, plays, last_played],
    )
    .expect("insert file");
    conn.last_insert_rowid()
}
