#![forbid(unsafe_code)]

use super::resolve::resolve_record_tx;
use super::upsert::{UpsertAttempt, apply_tx};
use super::*;
use rusqlite::TransactionBehavior;
use serde_json::Value;
use sr_core::gsid::GsidGenerator;
use sr_core::ids::BatchId;
use sr_core::record::InputRecord;

enum LoadAttempt {
    Done(BatchEntry),
    LostRace,
}

impl SqliteStore {
    /// Runs one batch through resolution and upsert. Records are independent;
    /// data-level rejections and identity conflicts never abort the rest.
    pub fn apply_batch(&mut self, request: BatchRequest) -> Result<BatchReport, StoreError> {
        match request.mode {
            BatchMode::PerRecord => self.apply_batch_per_record(request),
            BatchMode::AllOrNothing => self.apply_batch_all_or_nothing(request),
        }
    }

    fn apply_batch_per_record(
        &mut self,
        request: BatchRequest,
    ) -> Result<BatchReport, StoreError> {
        let mut entries = Vec::with_capacity(request.records.len());
        for record in &request.records {
            let entry = match self.load_record_once(&request.batch_id, record) {
                Ok(Some(entry)) => entry,
                // Lost a uniqueness race; one rerun observes the winner.
                Ok(None) => match self.load_record_once(&request.batch_id, record) {
                    Ok(Some(entry)) => entry,
                    Ok(None) => {
                        let err = StoreError::Contention("uniqueness race recovery failed");
                        BatchEntry::Failed {
                            retryable: err.is_retryable(),
                            error: err.to_string(),
                        }
                    }
                    Err(err) => BatchEntry::Failed {
                        retryable: err.is_retryable(),
                        error: err.to_string(),
                    },
                },
                Err(err) => BatchEntry::Failed {
                    retryable: err.is_retryable(),
                    error: err.to_string(),
                },
            };
            entries.push(entry);
        }
        Ok(BatchReport {
            batch_id: request.batch_id,
            entries,
        })
    }

    fn load_record_once(
        &mut self,
        batch_id: &BatchId,
        record: &InputRecord,
    ) -> Result<Option<BatchEntry>, StoreError> {
        let now = now_ms();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        match load_record_tx(&tx, &mut self.generator, &self.tables, batch_id, record, now)? {
            LoadAttempt::Done(entry) => {
                tx.commit()?;
                Ok(Some(entry))
            }
            LoadAttempt::LostRace => Ok(None),
        }
    }

    fn apply_batch_all_or_nothing(
        &mut self,
        request: BatchRequest,
    ) -> Result<BatchReport, StoreError> {
        let now = now_ms();
        let mut entries = Vec::with_capacity(request.records.len());
        let mut tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        for record in &request.records {
            let sp = tx.savepoint()?;
            match load_record_tx(&sp, &mut self.generator, &self.tables, &request.batch_id, record, now)? {
                LoadAttempt::Done(entry) => {
                    sp.commit()?;
                    entries.push(entry);
                }
                // The batch holds the write lock for its whole lifetime, so a
                // constraint hit cannot come from a competing writer.
                LoadAttempt::LostRace => {
                    return Err(StoreError::InvalidInput(
                        "constraint conflict inside batch transaction",
                    ));
                }
            }
        }
        tx.commit()?;
        Ok(BatchReport {
            batch_id: request.batch_id,
            entries,
        })
    }
}

fn load_record_tx(
    conn: &Connection,
    generator: &mut GsidGenerator,
    tables: &sr_core::config::TablesConfig,
    batch_id: &BatchId,
    record: &InputRecord,
    now_ms: i64,
) -> Result<LoadAttempt, StoreError> {
    let Some(config) = tables.get(&record.table) else {
        return Err(StoreError::UnknownTable(record.table.clone()));
    };

    let resolution = if record.identifiers.is_empty() {
        None
    } else {
        match resolve_record_tx(conn, generator, Some(batch_id), &record.identifiers, now_ms)? {
            Some(resolution) => Some(resolution),
            None => return Ok(LoadAttempt::LostRace),
        }
    };

    let mut fields = record.fields.clone();
    if let Some(resolution) = &resolution {
        match &resolution.gsid {
            None => {
                // Identity unresolved; the conflict rows are already in the
                // ledger and the upsert is not attempted.
                return Ok(LoadAttempt::Done(BatchEntry::IdentityConflict {
                    resolution: resolution.clone(),
                }));
            }
            Some(gsid) => {
                if let Some(field) = &config.gsid_field {
                    fields.insert(field.clone(), Value::String(gsid.as_str().to_string()));
                }
            }
        }
    }

    match apply_tx(conn, config, Some(batch_id), &fields, now_ms)? {
        UpsertAttempt::Done(upsert) => Ok(LoadAttempt::Done(BatchEntry::Loaded {
            resolution,
            upsert,
        })),
        UpsertAttempt::LostRace => Ok(LoadAttempt::LostRace),
    }
}
