#![forbid(unsafe_code)]

use sr_core::config::TablesConfig;
use sr_core::ids::{IdentifierType, SourceId};
use sr_core::record::CandidateIdentifier;
use sr_storage::{ResolutionDecision, ResolveRequest, SqliteStore, StoreError, StoreOptions};
use std::path::PathBuf;
use std::time::Duration;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("sr_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn candidate(source: &str, local_id: &str, id_type: &str) -> CandidateIdentifier {
    CandidateIdentifier::try_new(
        SourceId::try_new(source).expect("source id"),
        local_id,
        IdentifierType::try_new(id_type).expect("identifier type"),
    )
    .expect("candidate identifier")
}

#[test]
fn reopening_a_database_from_another_schema_revision_fails() {
    let dir = temp_dir("reopening_a_database_from_another_schema_revision_fails");
    {
        let _store = SqliteStore::open(&dir, TablesConfig::empty()).expect("open store");
    }

    // A database written by a later revision carries its own version tag.
    let conn = rusqlite::Connection::open(dir.join("subject_registry.db")).expect("raw open");
    conn.execute(
        "UPDATE meta SET value = 'v999' WHERE key = 'schema_version'",
        [],
    )
    .expect("tamper with schema version");
    drop(conn);

    let err = SqliteStore::open(&dir, TablesConfig::empty())
        .expect_err("foreign schema version must refuse to open");
    match err {
        StoreError::SchemaVersionMismatch { expected, found } => {
            assert_eq!(found, "v999");
            assert_ne!(expected, found);
        }
        other => panic!("expected schema version mismatch, got {other:?}"),
    }
}

#[test]
fn reopening_the_same_revision_keeps_existing_data() {
    let dir = temp_dir("reopening_the_same_revision_keeps_existing_data");
    let gsid = {
        let mut store = SqliteStore::open(&dir, TablesConfig::empty()).expect("open store");
        store
            .resolve(ResolveRequest {
                batch_id: None,
                identifier: candidate("1", "X", "mrn"),
            })
            .expect("resolve")
            .gsid
            .expect("gsid")
    };

    let mut store = SqliteStore::open(&dir, TablesConfig::empty()).expect("reopen store");
    let receipt = store
        .resolve(ResolveRequest {
            batch_id: None,
            identifier: candidate("1", "X", "mrn"),
        })
        .expect("resolve");
    assert_eq!(receipt.decision, ResolutionDecision::AlreadyLinked);
    assert_eq!(receipt.gsid, Some(gsid));
}

#[test]
fn open_with_options_honors_the_caller_busy_timeout() {
    let dir = temp_dir("open_with_options_honors_the_caller_busy_timeout");
    let mut store = SqliteStore::open_with_options(
        &dir,
        TablesConfig::empty(),
        StoreOptions {
            busy_timeout: Duration::from_millis(250),
        },
    )
    .expect("open store");

    let receipt = store
        .resolve(ResolveRequest {
            batch_id: None,
            identifier: candidate("1", "X", "mrn"),
        })
        .expect("resolve");
    assert_eq!(receipt.decision, ResolutionDecision::CreateNew);
    assert_eq!(store.storage_dir(), dir.as_path());
}
