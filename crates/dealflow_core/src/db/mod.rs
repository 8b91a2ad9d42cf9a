//! SQLite storage bootstrap for the local deal store.
//!
//! # Responsibility
//! - Open connections and bring the `deals` schema up to date.
//! - Report schema mismatches in terms of the deal store's version.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - Deal rows are never read or written before `ensure_current` passes.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Deal store bootstrap and schema errors.
#[derive(Debug)]
pub enum DbError {
    /// Connection or query failure outside a schema step.
    Sqlite(rusqlite::Error),
    /// One schema step failed; the whole upgrade was rolled back.
    SchemaStep {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    /// Written by a newer build; refusing to touch it.
    SchemaTooNew { found: u32, supported: u32 },
    /// Connection handed over without running the schema steps.
    SchemaOutdated { found: u32, expected: u32 },
}

impl DbError {
    /// Stable code used in log records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "db_sqlite_failed",
            Self::SchemaStep { .. } => "db_schema_step_failed",
            Self::SchemaTooNew { .. } => "db_schema_too_new",
            Self::SchemaOutdated { .. } => "db_schema_outdated",
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "deal database error: {err}"),
            Self::SchemaStep {
                version,
                name,
                source,
            } => write!(f, "deal schema step {version} ({name}) failed: {source}"),
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "deal database schema {found} is newer than this build supports ({supported})"
            ),
            Self::SchemaOutdated { found, expected } => write!(
                f,
                "deal database schema {found} is behind {expected}; open it through db::open_db"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::SchemaStep { source: err, .. } => Some(err),
            Self::SchemaTooNew { .. } | Self::SchemaOutdated { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
