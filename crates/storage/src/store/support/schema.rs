#![forbid(unsafe_code)]

use super::super::StoreError;
use rusqlite::{Connection, OptionalExtension, params};

const SCHEMA_VERSION: &str = "v1";

const PRAGMAS_SQL: &str = r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
"#;

const IDENTITY_SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subjects (
          gsid TEXT PRIMARY KEY,
          created_at_ms INTEGER NOT NULL
        );

        -- The uniqueness constraint on the mapping tuple is what serializes
        -- concurrent resolution of one identity across processes.
        CREATE TABLE IF NOT EXISTS identifier_mappings (
          source TEXT NOT NULL,
          local_id TEXT NOT NULL,
          id_type TEXT NOT NULL,
          gsid TEXT NOT NULL REFERENCES subjects(gsid),
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (source, local_id, id_type)
        );
"#;

const RECORDS_SQL: &str = r#"
        -- Generic natural-key row store. key_json is the canonical JSON array
        -- of normalized key values in natural_key order.
        CREATE TABLE IF NOT EXISTS records (
          table_name TEXT NOT NULL,
          key_json TEXT NOT NULL,
          fields_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (table_name, key_json)
        );
"#;

const LEDGER_SQL: &str = r#"
        CREATE TABLE IF NOT EXISTS resolution_ledger (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          batch_id TEXT,
          source TEXT NOT NULL,
          local_id TEXT NOT NULL,
          id_type TEXT NOT NULL,
          decision TEXT NOT NULL,
          gsid TEXT,
          confidence REAL NOT NULL,
          requires_review INTEGER NOT NULL,
          reason TEXT,
          ts_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS load_ledger (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          batch_id TEXT,
          table_name TEXT NOT NULL,
          key_json TEXT NOT NULL,
          outcome TEXT NOT NULL,
          changed_fields_json TEXT,
          violation_json TEXT,
          ts_ms INTEGER NOT NULL
        );
"#;

const INDEXES_SQL: &str = r#"
        CREATE INDEX IF NOT EXISTS idx_mappings_source_local
          ON identifier_mappings(source, local_id);
        CREATE INDEX IF NOT EXISTS idx_mappings_gsid
          ON identifier_mappings(gsid);
        CREATE INDEX IF NOT EXISTS idx_resolution_batch
          ON resolution_ledger(batch_id, seq);
        CREATE INDEX IF NOT EXISTS idx_resolution_tuple
          ON resolution_ledger(source, local_id, id_type, seq);
        CREATE INDEX IF NOT EXISTS idx_resolution_review
          ON resolution_ledger(requires_review, seq);
        CREATE INDEX IF NOT EXISTS idx_load_batch
          ON load_ledger(batch_id, seq);
        CREATE INDEX IF NOT EXISTS idx_load_table
          ON load_ledger(table_name, seq);
"#;

fn full_schema_sql() -> String {
    let mut sql = String::new();
    sql.push_str(PRAGMAS_SQL);
    sql.push_str(IDENTITY_SQL);
    sql.push_str(RECORDS_SQL);
    sql.push_str(LEDGER_SQL);
    sql.push_str(INDEXES_SQL);
    sql
}

pub(in crate::store) fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&full_schema_sql())?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", SCHEMA_VERSION],
    )?;
    Ok(())
}

/// Refuses to open a database written by an incompatible schema revision.
pub(in crate::store) fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let has_meta = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='meta'",
            [],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !has_meta {
        return Ok(());
    }

    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match stored.as_deref() {
        None | Some(SCHEMA_VERSION) => Ok(()),
        Some(found) => Err(StoreError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: found.to_string(),
        }),
    }
}
