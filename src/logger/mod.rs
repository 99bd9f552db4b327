//! Activity logging (JSONL plus SQLite) and the cleaned-files log.

pub mod cleaner_log;
pub mod dual;
pub mod jsonl;
#[cfg(feature = "sqlite")]
pub mod sqlite;
