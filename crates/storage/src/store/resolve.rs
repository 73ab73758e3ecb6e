#![forbid(unsafe_code)]

use super::ledger::append_resolution_tx;
use super::*;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use sr_core::gsid::Gsid;
use sr_core::ids::BatchId;
use sr_core::record::CandidateIdentifier;
use std::collections::BTreeSet;

/// How one candidate relates to the mapping store before this attempt.
enum CandidateState {
    /// The exact tuple is already mapped.
    Mapped,
    /// Unmapped, but the same (source, local_id) is linked to exactly one
    /// subject under another identifier type.
    Implied,
    /// Unmapped and no sibling link exists.
    New,
}

impl SqliteStore {
    /// Resolves one (source, local_id, identifier_type) tuple to a GSID,
    /// creating a subject when the tuple is new. Every attempt appends
    /// exactly one resolution ledger row.
    pub fn resolve(&mut self, request: ResolveRequest) -> Result<ResolutionReceipt, StoreError> {
        let resolution = self.resolve_record(
            request.batch_id.as_ref(),
            std::slice::from_ref(&request.identifier),
        )?;
        let Some(receipt) = resolution.receipts.into_iter().next() else {
            return Err(StoreError::InvalidInput("resolution produced no receipt"));
        };
        Ok(receipt)
    }

    /// Joint resolution of every candidate identifier carried by one record.
    /// All candidates must agree on a single subject; disagreement is a
    /// conflict and nothing is linked.
    pub fn resolve_record(
        &mut self,
        batch_id: Option<&BatchId>,
        candidates: &[CandidateIdentifier],
    ) -> Result<RecordResolution, StoreError> {
        let now = now_ms();
        // A lost uniqueness race rolls the attempt back; the retry observes
        // the winner's committed mapping and reports already_linked.
        for _ in 0..2 {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;
            match resolve_record_tx(&tx, &mut self.generator, batch_id, candidates, now)? {
                Some(resolution) => {
                    tx.commit()?;
                    return Ok(resolution);
                }
                None => drop(tx),
            }
        }
        Err(StoreError::Contention("identifier race recovery failed"))
    }
}

/// One resolution attempt inside an open transaction. `Ok(None)` means the
/// attempt lost a uniqueness race and must be rerun after rollback.
pub(super) fn resolve_record_tx(
    conn: &Connection,
    generator: &mut GsidGenerator,
    batch_id: Option<&BatchId>,
    candidates: &[CandidateIdentifier],
    now_ms: i64,
) -> Result<Option<RecordResolution>, StoreError> {
    let mut unique: Vec<CandidateIdentifier> = Vec::new();
    for candidate in candidates {
        if !unique.contains(candidate) {
            unique.push(candidate.clone());
        }
    }
    if unique.is_empty() {
        return Ok(Some(RecordResolution {
            gsid: None,
            receipts: Vec::new(),
        }));
    }

    let mut states = Vec::with_capacity(unique.len());
    let mut distinct: BTreeSet<Gsid> = BTreeSet::new();
    let mut pending_review = false;
    let mut ambiguous_sibling = false;

    for candidate in &unique {
        let state = match lookup_mapping_tx(conn, candidate)? {
            Some(gsid) => {
                distinct.insert(gsid);
                CandidateState::Mapped
            }
            None if has_pending_conflict_tx(conn, candidate)? => {
                // A prior conflict halts automatic resolution of this tuple.
                pending_review = true;
                CandidateState::New
            }
            None => {
                let siblings = sibling_gsids_tx(conn, candidate)?;
                match siblings.len() {
                    0 => CandidateState::New,
                    1 => {
                        distinct.insert(siblings[0].clone());
                        CandidateState::Implied
                    }
                    _ => {
                        ambiguous_sibling = true;
                        CandidateState::New
                    }
                }
            }
        };
        states.push(state);
    }

    if pending_review || ambiguous_sibling || distinct.len() > 1 {
        let reason = if pending_review {
            "identifier is pending review".to_string()
        } else if ambiguous_sibling {
            "local id is already linked to multiple subjects under other identifier types"
                .to_string()
        } else {
            let gsids = distinct
                .iter()
                .map(Gsid::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            format!("record links distinct subjects: {gsids}")
        };
        let mut receipts = Vec::with_capacity(unique.len());
        for candidate in &unique {
            receipts.push(append_resolution_tx(
                conn,
                batch_id,
                candidate,
                ResolutionDecision::Conflict,
                None,
                0.0,
                true,
                Some(&reason),
                now_ms,
            )?);
        }
        return Ok(Some(RecordResolution {
            gsid: None,
            receipts,
        }));
    }

    let (gsid, created) = match distinct.iter().next() {
        Some(gsid) => (gsid.clone(), false),
        None => {
            let gsid = generator.generate();
            conn.execute(
                "INSERT INTO subjects(gsid, created_at_ms) VALUES (?1, ?2)",
                params![gsid.as_str(), now_ms],
            )?;
            (gsid, true)
        }
    };

    let mut receipts = Vec::with_capacity(unique.len());
    let mut first_link = true;
    for (candidate, state) in unique.iter().zip(&states) {
        let decision = match state {
            CandidateState::Mapped => ResolutionDecision::AlreadyLinked,
            CandidateState::Implied | CandidateState::New => {
                if let Err(err) = insert_mapping_tx(conn, candidate, &gsid, now_ms) {
                    if is_constraint_violation(&err) {
                        return Ok(None);
                    }
                    return Err(StoreError::Sql(err));
                }
                if created && first_link {
                    first_link = false;
                    ResolutionDecision::CreateNew
                } else {
                    ResolutionDecision::LinkExisting
                }
            }
        };
        receipts.push(append_resolution_tx(
            conn,
            batch_id,
            candidate,
            decision,
            Some(&gsid),
            1.0,
            false,
            None,
            now_ms,
        )?);
    }

    Ok(Some(RecordResolution {
        gsid: Some(gsid),
        receipts,
    }))
}

fn lookup_mapping_tx(
    conn: &Connection,
    candidate: &CandidateIdentifier,
) -> Result<Option<Gsid>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT gsid FROM identifier_mappings \
             WHERE source = ?1 AND local_id = ?2 AND id_type = ?3",
            params![
                candidate.source().as_str(),
                candidate.local_id(),
                candidate.id_type().as_str()
            ],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        None => Ok(None),
        Some(raw) => Gsid::try_new(raw)
            .map(Some)
            .map_err(|_| StoreError::InvalidInput("stored gsid is malformed")),
    }
}

fn sibling_gsids_tx(
    conn: &Connection,
    candidate: &CandidateIdentifier,
) -> Result<Vec<Gsid>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT gsid FROM identifier_mappings \
         WHERE source = ?1 AND local_id = ?2 AND id_type <> ?3 \
         ORDER BY gsid ASC",
    )?;
    let rows = stmt.query_map(
        params![
            candidate.source().as_str(),
            candidate.local_id(),
            candidate.id_type().as_str()
        ],
        |row| row.get::<_, String>(0),
    )?;
    let mut out = Vec::new();
    for raw in rows {
        let gsid = Gsid::try_new(raw?)
            .map_err(|_| StoreError::InvalidInput("stored gsid is malformed"))?;
        out.push(gsid);
    }
    Ok(out)
}

fn has_pending_conflict_tx(
    conn: &Connection,
    candidate: &CandidateIdentifier,
) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM resolution_ledger \
             WHERE source = ?1 AND local_id = ?2 AND id_type = ?3 \
               AND decision = 'conflict' AND requires_review = 1 \
             LIMIT 1",
            params![
                candidate.source().as_str(),
                candidate.local_id(),
                candidate.id_type().as_str()
            ],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn insert_mapping_tx(
    conn: &Connection,
    candidate: &CandidateIdentifier,
    gsid: &Gsid,
    now_ms: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO identifier_mappings(source, local_id, id_type, gsid, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            candidate.source().as_str(),
            candidate.local_id(),
            candidate.id_type().as_str(),
            gsid.as_str(),
            now_ms
        ],
    )?;
    Ok(())
}
