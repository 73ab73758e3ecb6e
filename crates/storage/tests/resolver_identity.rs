#![forbid(unsafe_code)]

use sr_core::config::TablesConfig;
use sr_core::ids::{IdentifierType, SourceId};
use sr_core::record::CandidateIdentifier;
use sr_storage::{
    MappingLookupRequest, PendingReviewRequest, ResolutionDecision, ResolveRequest, SqliteStore,
};
use std::path::PathBuf;

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

fn open_store(test_name: &str) -> SqliteStore {
    SqliteStore::open(temp_dir(test_name), TablesConfig::empty()).expect("open store")
}

fn candidate(source: &str, local_id: &str, id_type: &str) -> CandidateIdentifier {
    CandidateIdentifier::try_new(
        SourceId::try_new(source).expect("source id"),
        local_id,
        IdentifierType::try_new(id_type).expect("identifier type"),
    )
    .expect("candidate identifier")
}

fn resolve_one(
    store: &mut SqliteStore,
    source: &str,
    local_id: &str,
    id_type: &str,
) -> sr_storage::ResolutionReceipt {
    store
        .resolve(ResolveRequest {
            batch_id: None,
            identifier: candidate(source, local_id, id_type),
        })
        .expect("resolve")
}

#[test]
fn resolving_a_new_tuple_creates_then_links() {
    let mut store = open_store("resolving_a_new_tuple_creates_then_links");

    let first = resolve_one(&mut store, "1", "X", "mrn");
    assert_eq!(first.decision, ResolutionDecision::CreateNew);
    assert_eq!(first.confidence, 1.0);
    assert!(!first.requires_review);
    let gsid = first.gsid.expect("created gsid");
    assert!(gsid.as_str().starts_with("GSID-"));

    let second = resolve_one(&mut store, "1", "X", "mrn");
    assert_eq!(second.decision, ResolutionDecision::AlreadyLinked);
    assert_eq!(second.gsid.as_ref(), Some(&gsid));

    let third = resolve_one(&mut store, "1", "X", "mrn");
    assert_eq!(third.gsid.as_ref(), Some(&gsid), "resolution must be idempotent");
}

#[test]
fn sibling_identifier_type_links_to_the_existing_subject() {
    let mut store = open_store("sibling_identifier_type_links_to_the_existing_subject");

    let mrn = resolve_one(&mut store, "1", "X", "mrn");
    let gsid = mrn.gsid.expect("created gsid");

    let ssn = resolve_one(&mut store, "1", "X", "ssn");
    assert_eq!(ssn.decision, ResolutionDecision::LinkExisting);
    assert_eq!(ssn.gsid.as_ref(), Some(&gsid));

    let lookup = store
        .mapping_lookup(MappingLookupRequest {
            source: SourceId::try_new("1").expect("source id"),
            local_id: "X".to_string(),
            id_type: IdentifierType::try_new("ssn").expect("identifier type"),
        })
        .expect("mapping lookup")
        .expect("mapping exists");
    assert_eq!(lookup.gsid, gsid.as_str());
}

#[test]
fn distinct_sources_get_distinct_subjects() {
    let mut store = open_store("distinct_sources_get_distinct_subjects");

    let a = resolve_one(&mut store, "1", "X", "mrn");
    let b = resolve_one(&mut store, "2", "X", "mrn");
    assert_eq!(b.decision, ResolutionDecision::CreateNew);
    assert_ne!(a.gsid, b.gsid, "same local id from another source is another subject");
}

#[test]
fn record_with_two_new_identifiers_creates_exactly_one_subject() {
    let mut store = open_store("record_with_two_new_identifiers_creates_exactly_one_subject");

    let resolution = store
        .resolve_record(
            None,
            &[candidate("1", "X", "mrn"), candidate("1", "ST-9", "study")],
        )
        .expect("resolve record");
    let gsid = resolution.gsid.expect("one subject");

    let decisions: Vec<_> = resolution
        .receipts
        .iter()
        .map(|receipt| receipt.decision)
        .collect();
    assert_eq!(
        decisions,
        vec![ResolutionDecision::CreateNew, ResolutionDecision::LinkExisting]
    );

    let lookup = store
        .subject_by_gsid(&gsid)
        .expect("subject lookup")
        .expect("subject exists");
    assert_eq!(lookup.subject.gsid, gsid.as_str());
    assert_eq!(lookup.mappings.len(), 2);
}

#[test]
fn record_linking_two_subjects_is_a_conflict() {
    let mut store = open_store("record_linking_two_subjects_is_a_conflict");

    let g1 = resolve_one(&mut store, "1", "A", "mrn").gsid.expect("g1");
    let g2 = resolve_one(&mut store, "1", "B", "study").gsid.expect("g2");
    assert_ne!(g1, g2);

    let resolution = store
        .resolve_record(
            None,
            &[candidate("1", "A", "mrn"), candidate("1", "B", "study")],
        )
        .expect("resolve record");
    assert_eq!(resolution.gsid, None, "conflicting identities must not merge");
    assert_eq!(resolution.receipts.len(), 2);
    for receipt in &resolution.receipts {
        assert_eq!(receipt.decision, ResolutionDecision::Conflict);
        assert!(receipt.requires_review);
        assert_eq!(receipt.confidence, 0.0);
        assert!(receipt.reason.as_deref().expect("reason").contains(g1.as_str()));
    }

    // The already-linked tuples stay linked; the conflict wrote nothing.
    let again = resolve_one(&mut store, "1", "A", "mrn");
    assert_eq!(again.decision, ResolutionDecision::AlreadyLinked);
    assert_eq!(again.gsid, Some(g1));
}

#[test]
fn unlinked_tuple_from_a_conflicting_record_stays_halted() {
    let mut store = open_store("unlinked_tuple_from_a_conflicting_record_stays_halted");

    resolve_one(&mut store, "1", "A", "mrn");
    resolve_one(&mut store, "1", "B", "study");

    // "C" arrives only on a record that ties two subjects together, so it is
    // ledgered as a conflict while still unmapped.
    let resolution = store
        .resolve_record(
            None,
            &[
                candidate("1", "A", "mrn"),
                candidate("1", "B", "study"),
                candidate("1", "C", "labid"),
            ],
        )
        .expect("resolve record");
    assert_eq!(resolution.gsid, None);

    let halted = resolve_one(&mut store, "1", "C", "labid");
    assert_eq!(halted.decision, ResolutionDecision::Conflict);
    assert!(halted.requires_review);
    assert_eq!(halted.reason.as_deref(), Some("identifier is pending review"));
    assert_eq!(halted.gsid, None);

    let pending = store
        .pending_review(PendingReviewRequest { limit: 10 })
        .expect("pending review");
    assert!(
        pending
            .iter()
            .any(|row| row.local_id == "C" && row.decision == "conflict"),
        "pending review must list the halted tuple"
    );
}

#[test]
fn every_resolution_attempt_is_ledgered() {
    let mut store = open_store("every_resolution_attempt_is_ledgered");
    let batch_id = sr_core::ids::BatchId::try_new("batch-1").expect("batch id");

    store
        .resolve(ResolveRequest {
            batch_id: Some(batch_id.clone()),
            identifier: candidate("1", "X", "mrn"),
        })
        .expect("resolve");
    store
        .resolve(ResolveRequest {
            batch_id: Some(batch_id.clone()),
            identifier: candidate("1", "X", "mrn"),
        })
        .expect("resolve");

    let rows = store.resolutions_by_batch(&batch_id).expect("ledger rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].decision, "create_new");
    assert_eq!(rows[1].decision, "already_linked");
    assert_eq!(rows[0].gsid, rows[1].gsid);
    assert!(rows[0].seq < rows[1].seq);
}
