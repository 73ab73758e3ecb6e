#![forbid(unsafe_code)]

use super::ledger::append_load_tx;
use super::*;
use rusqlite::{OptionalExtension, TransactionBehavior, params};
use serde_json::Value;
use sr_core::ids::BatchId;
use sr_core::record::FieldMap;
use sr_core::value::{normalize, values_equal};

pub(super) enum UpsertAttempt {
    Done(UpsertReceipt),
    LostRace,
}

impl SqliteStore {
    /// Merges one record into its target table by natural key. Every attempt
    /// appends exactly one load ledger row; a rejected record leaves the
    /// stored row untouched.
    pub fn apply(&mut self, request: UpsertRequest) -> Result<UpsertReceipt, StoreError> {
        let config = self.table_config(&request.table)?.clone();
        let now = now_ms();
        for _ in 0..2 {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;
            match apply_tx(&tx, &config, request.batch_id.as_ref(), &request.fields, now)? {
                UpsertAttempt::Done(receipt) => {
                    tx.commit()?;
                    return Ok(receipt);
                }
                UpsertAttempt::LostRace => drop(tx),
            }
        }
        Err(StoreError::Contention("upsert race recovery failed"))
    }

    /// Reads a stored record back by its natural key values (given in
    /// `natural_key` order). Values are normalized the same way the engine
    /// normalizes them, so `"5"` and `5` address the same row.
    pub fn record_by_key(
        &self,
        table: &str,
        key: &[Value],
    ) -> Result<Option<FieldMap>, StoreError> {
        let config = self.table_config(table)?;
        if key.len() != config.natural_key.len() {
            return Err(StoreError::InvalidInput(
                "key arity does not match the table's natural_key",
            ));
        }
        let normalized: Vec<Value> = key.iter().map(normalize).collect();
        let key_json = serde_json::to_string(&normalized)
            .map_err(|_| StoreError::InvalidInput("natural key is not serializable"))?;

        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT fields_json FROM records WHERE table_name = ?1 AND key_json = ?2",
                params![table, key_json],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|_| StoreError::InvalidInput("stored record payload is not a JSON object")),
        }
    }
}

/// One upsert attempt inside an open transaction. `LostRace` means a
/// concurrent writer inserted the key first; rerun after rollback to take the
/// update path against the winner's row.
pub(super) fn apply_tx(
    conn: &Connection,
    config: &sr_core::config::TableConfig,
    batch_id: Option<&BatchId>,
    fields: &FieldMap,
    now_ms: i64,
) -> Result<UpsertAttempt, StoreError> {
    let mut key = Vec::with_capacity(config.natural_key.len());
    let mut key_violation = None;
    for field in &config.natural_key {
        match fields.get(field) {
            None => {
                key.push(Value::Null);
                if key_violation.is_none() {
                    key_violation = Some(Violation::MissingKeyField {
                        field: field.clone(),
                    });
                }
            }
            Some(Value::Null) => {
                key.push(Value::Null);
                if key_violation.is_none() {
                    key_violation = Some(Violation::NullKeyField {
                        field: field.clone(),
                    });
                }
            }
            Some(value) => key.push(normalize(value)),
        }
    }
    let key_json = serde_json::to_string(&key)
        .map_err(|_| StoreError::InvalidInput("natural key is not serializable"))?;

    if let Some(violation) = key_violation {
        let record_id = append_load_tx(
            conn,
            batch_id,
            &config.table,
            &key_json,
            LoadStatus::Rejected,
            &[],
            Some(&violation),
            now_ms,
        )?;
        return Ok(UpsertAttempt::Done(UpsertReceipt {
            record_id,
            status: LoadStatus::Rejected,
            key,
            changed_fields: Vec::new(),
            violation: Some(violation),
        }));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT fields_json FROM records WHERE table_name = ?1 AND key_json = ?2",
            params![config.table, key_json],
            |row| row.get(0),
        )
        .optional()?;

    let Some(stored_raw) = existing else {
        let fields_json = serde_json::to_string(fields)
            .map_err(|_| StoreError::InvalidInput("record fields are not serializable"))?;
        let insert = conn.execute(
            "INSERT INTO records(table_name, key_json, fields_json, created_at_ms, updated_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![config.table, key_json, fields_json, now_ms, now_ms],
        );
        if let Err(err) = insert {
            if is_constraint_violation(&err) {
                return Ok(UpsertAttempt::LostRace);
            }
            return Err(StoreError::Sql(err));
        }
        let record_id = append_load_tx(
            conn,
            batch_id,
            &config.table,
            &key_json,
            LoadStatus::Inserted,
            &[],
            None,
            now_ms,
        )?;
        return Ok(UpsertAttempt::Done(UpsertReceipt {
            record_id,
            status: LoadStatus::Inserted,
            key,
            changed_fields: Vec::new(),
            violation: None,
        }));
    };

    let stored: FieldMap = serde_json::from_str(&stored_raw)
        .map_err(|_| StoreError::InvalidInput("stored record payload is not a JSON object"))?;

    // Immutable fields: exact equality, null comparable. Any mismatch rejects
    // the whole record before a single field is written.
    for field in &config.immutable_fields {
        let Some(incoming) = fields.get(field) else {
            continue;
        };
        let stored_value = stored.get(field).cloned().unwrap_or(Value::Null);
        if stored_value != *incoming {
            let violation = Violation::ImmutableFieldChanged {
                field: field.clone(),
                stored: stored_value,
                incoming: incoming.clone(),
            };
            let record_id = append_load_tx(
                conn,
                batch_id,
                &config.table,
                &key_json,
                LoadStatus::Rejected,
                &[],
                Some(&violation),
                now_ms,
            )?;
            return Ok(UpsertAttempt::Done(UpsertReceipt {
                record_id,
                status: LoadStatus::Rejected,
                key,
                changed_fields: Vec::new(),
                violation: Some(violation),
            }));
        }
    }

    let mut changed = Vec::new();
    let mut merged = stored.clone();
    for (name, incoming) in fields {
        if config.immutable_fields.contains(name) {
            continue;
        }
        let current = stored.get(name).cloned().unwrap_or(Value::Null);
        if !values_equal(&current, incoming) {
            changed.push(name.clone());
            merged.insert(name.clone(), incoming.clone());
        }
    }

    if changed.is_empty() {
        let record_id = append_load_tx(
            conn,
            batch_id,
            &config.table,
            &key_json,
            LoadStatus::Skipped,
            &[],
            None,
            now_ms,
        )?;
        return Ok(UpsertAttempt::Done(UpsertReceipt {
            record_id,
            status: LoadStatus::Skipped,
            key,
            changed_fields: Vec::new(),
            violation: None,
        }));
    }

    let fields_json = serde_json::to_string(&merged)
        .map_err(|_| StoreError::InvalidInput("record fields are not serializable"))?;
    conn.execute(
        "UPDATE records SET fields_json = ?3, updated_at_ms = ?4 \
         WHERE table_name = ?1 AND key_json = ?2",
        params![config.table, key_json, fields_json, now_ms],
    )?;
    let record_id = append_load_tx(
        conn,
        batch_id,
        &config.table,
        &key_json,
        LoadStatus::Updated,
        &changed,
        None,
        now_ms,
    )?;
    Ok(UpsertAttempt::Done(UpsertReceipt {
        record_id,
        status: LoadStatus::Updated,
        key,
        changed_fields: changed,
        violation: None,
    }))
}
