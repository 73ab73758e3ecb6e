#![forbid(unsafe_code)]

mod batch;
mod error;
mod ledger;
mod requests;
mod resolve;
mod support;
mod upsert;

pub use error::StoreError;
pub use requests::*;

use rusqlite::{Connection, ErrorCode};
use sr_core::config::{TableConfig, TablesConfig};
use sr_core::gsid::GsidGenerator;
use std::path::{Path, PathBuf};
use std::time::Duration;
use support::{install_schema, now_ms, preflight_gate};

const DB_FILE: &str = "subject_registry.db";
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Store tuning supplied by the caller. `busy_timeout` bounds how long any
/// store call may block on a competing writer before it surfaces a retryable
/// storage error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
    generator: GsidGenerator,
    tables: TablesConfig,
}

impl SqliteStore {
    pub fn open(
        storage_dir: impl AsRef<Path>,
        tables: TablesConfig,
    ) -> Result<Self, StoreError> {
        Self::open_with_options(storage_dir, tables, StoreOptions::default())
    }

    pub fn open_with_options(
        storage_dir: impl AsRef<Path>,
        tables: TablesConfig,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        tables.validate()?;

        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let conn = Connection::open(storage_dir.join(DB_FILE))?;
        conn.busy_timeout(options.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        preflight_gate(&conn)?;
        install_schema(&conn)?;

        // Probing the OS random source is part of opening the store; a dead
        // source is fatal here, never mid-resolution.
        let generator = GsidGenerator::new()
            .map_err(|err| StoreError::GsidSource(err.to_string()))?;

        Ok(Self {
            conn,
            storage_dir,
            generator,
            tables,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn tables(&self) -> &TablesConfig {
        &self.tables
    }

    fn table_config(&self, table: &str) -> Result<&TableConfig, StoreError> {
        self.tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}
