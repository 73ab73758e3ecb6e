#![forbid(unsafe_code)]

use super::*;
use rusqlite::{OptionalExtension, params};
use sr_core::gsid::Gsid;
use sr_core::ids::BatchId;
use sr_core::record::CandidateIdentifier;

pub(super) fn append_resolution_tx(
    conn: &Connection,
    batch_id: Option<&BatchId>,
    identifier: &CandidateIdentifier,
    decision: ResolutionDecision,
    gsid: Option<&Gsid>,
    confidence: f64,
    requires_review: bool,
    reason: Option<&str>,
    ts_ms: i64,
) -> Result<ResolutionReceipt, StoreError> {
    conn.execute(
        "INSERT INTO resolution_ledger(\
           batch_id, source, local_id, id_type, decision, gsid, confidence, \
           requires_review, reason, ts_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            batch_id.map(BatchId::as_str),
            identifier.source().as_str(),
            identifier.local_id(),
            identifier.id_type().as_str(),
            decision.as_str(),
            gsid.map(Gsid::as_str),
            confidence,
            requires_review,
            reason,
            ts_ms
        ],
    )?;
    Ok(ResolutionReceipt {
        record_id: conn.last_insert_rowid(),
        decision,
        gsid: gsid.cloned(),
        confidence,
        requires_review,
        reason: reason.map(str::to_string),
    })
}

pub(super) fn append_load_tx(
    conn: &Connection,
    batch_id: Option<&BatchId>,
    table: &str,
    key_json: &str,
    status: LoadStatus,
    changed_fields: &[String],
    violation: Option<&Violation>,
    ts_ms: i64,
) -> Result<i64, StoreError> {
    let changed_fields_json = if changed_fields.is_empty() {
        None
    } else {
        Some(
            serde_json::to_string(changed_fields)
                .map_err(|_| StoreError::InvalidInput("changed fields are not serializable"))?,
        )
    };
    let violation_json = violation.map(|violation| violation.to_json().to_string());
    conn.execute(
        "INSERT INTO load_ledger(\
           batch_id, table_name, key_json, outcome, changed_fields_json, \
           violation_json, ts_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            batch_id.map(BatchId::as_str),
            table,
            key_json,
            status.as_str(),
            changed_fields_json,
            violation_json,
            ts_ms
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

impl SqliteStore {
    pub fn resolutions_by_batch(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<ResolutionRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, batch_id, source, local_id, id_type, decision, gsid, \
                    confidence, requires_review, reason, ts_ms \
             FROM resolution_ledger \
             WHERE batch_id = ?1 \
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![batch_id.as_str()], map_resolution_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Conflict decisions awaiting human review, oldest first.
    pub fn pending_review(
        &self,
        request: PendingReviewRequest,
    ) -> Result<Vec<ResolutionRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, batch_id, source, local_id, id_type, decision, gsid, \
                    confidence, requires_review, reason, ts_ms \
             FROM resolution_ledger \
             WHERE decision = 'conflict' AND requires_review = 1 \
             ORDER BY seq ASC \
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![request.limit as i64], map_resolution_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn outcomes_by_batch(
        &self,
        batch_id: &BatchId,
    ) -> Result<Vec<LoadOutcomeRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, batch_id, table_name, key_json, outcome, \
                    changed_fields_json, violation_json, ts_ms \
             FROM load_ledger \
             WHERE batch_id = ?1 \
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![batch_id.as_str()], map_load_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn outcomes_by_table(
        &self,
        request: OutcomesByTableRequest,
    ) -> Result<Vec<LoadOutcomeRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, batch_id, table_name, key_json, outcome, \
                    changed_fields_json, violation_json, ts_ms \
             FROM load_ledger \
             WHERE table_name = ?1 \
             ORDER BY seq ASC \
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![request.table, request.limit as i64, request.offset as i64],
            map_load_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// A subject and every local identifier linked to it.
    pub fn subject_by_gsid(&self, gsid: &Gsid) -> Result<Option<SubjectLookup>, StoreError> {
        let subject = self
            .conn
            .query_row(
                "SELECT gsid, created_at_ms FROM subjects WHERE gsid = ?1",
                params![gsid.as_str()],
                |row| {
                    Ok(SubjectRow {
                        gsid: row.get(0)?,
                        created_at_ms: row.get(1)?,
                    })
                },
            )
            .optional()?;
        let Some(subject) = subject else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT source, local_id, id_type, gsid, created_at_ms \
             FROM identifier_mappings \
             WHERE gsid = ?1 \
             ORDER BY source ASC, local_id ASC, id_type ASC",
        )?;
        let rows = stmt.query_map(params![gsid.as_str()], map_mapping_row)?;
        let mappings = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Some(SubjectLookup { subject, mappings }))
    }

    pub fn mapping_lookup(
        &self,
        request: MappingLookupRequest,
    ) -> Result<Option<MappingRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT source, local_id, id_type, gsid, created_at_ms \
                 FROM identifier_mappings \
                 WHERE source = ?1 AND local_id = ?2 AND id_type = ?3",
                params![
                    request.source.as_str(),
                    request.local_id,
                    request.id_type.as_str()
                ],
                map_mapping_row,
            )
            .optional()?)
    }
}

fn map_resolution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResolutionRow> {
    Ok(ResolutionRow {
        seq: row.get(0)?,
        batch_id: row.get(1)?,
        source: row.get(2)?,
        local_id: row.get(3)?,
        id_type: row.get(4)?,
        decision: row.get(5)?,
        gsid: row.get(6)?,
        confidence: row.get(7)?,
        requires_review: row.get::<_, i64>(8)? != 0,
        reason: row.get(9)?,
        ts_ms: row.get(10)?,
    })
}

fn map_load_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LoadOutcomeRow> {
    Ok(LoadOutcomeRow {
        seq: row.get(0)?,
        batch_id: row.get(1)?,
        table: row.get(2)?,
        key_json: row.get(3)?,
        outcome: row.get(4)?,
        changed_fields_json: row.get(5)?,
        violation_json: row.get(6)?,
        ts_ms: row.get(7)?,
    })
}

fn map_mapping_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MappingRow> {
    Ok(MappingRow {
        source: row.get(0)?,
        local_id: row.get(1)?,
        id_type: row.get(2)?,
        gsid: row.get(3)?,
        created_at_ms: row.get(4)?,
    })
}
