#![forbid(unsafe_code)]

use crate::ids::{IdentifierType, SourceId};
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_LOCAL_ID_LEN: usize = 128;
const MAX_TABLE_NAME_LEN: usize = 64;

/// Field values of one record, keyed by field name. `BTreeMap` keeps the
/// serialized form deterministic, which the canonical natural-key JSON
/// depends on.
pub type FieldMap = BTreeMap<String, Value>;

/// One source-local identifier claim carried by an input record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateIdentifier {
    source: SourceId,
    local_id: String,
    id_type: IdentifierType,
}

impl CandidateIdentifier {
    pub fn try_new(
        source: SourceId,
        local_id: impl Into<String>,
        id_type: IdentifierType,
    ) -> Result<Self, CandidateIdentifierError> {
        let local_id = local_id.into();
        let trimmed = local_id.trim();
        if trimmed.is_empty() {
            return Err(CandidateIdentifierError::EmptyLocalId);
        }
        if trimmed.len() > MAX_LOCAL_ID_LEN {
            return Err(CandidateIdentifierError::LocalIdTooLong);
        }
        Ok(Self {
            source,
            local_id: trimmed.to_string(),
            id_type,
        })
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn id_type(&self) -> &IdentifierType {
        &self.id_type
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CandidateIdentifierError {
    EmptyLocalId,
    LocalIdTooLong,
}

impl std::fmt::Display for CandidateIdentifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyLocalId => write!(f, "local id must not be empty"),
            Self::LocalIdTooLong => write!(f, "local id is too long"),
        }
    }
}

impl std::error::Error for CandidateIdentifierError {}

/// A validated input record as handed over by the external validator: target
/// table, field values, and zero or more candidate local identifiers.
#[derive(Clone, Debug, PartialEq)]
pub struct InputRecord {
    pub table: String,
    pub fields: FieldMap,
    pub identifiers: Vec<CandidateIdentifier>,
}

impl InputRecord {
    pub fn new(table: impl Into<String>, fields: FieldMap) -> Result<Self, InputRecordError> {
        let table = table.into();
        let trimmed = table.trim();
        if trimmed.is_empty() {
            return Err(InputRecordError::EmptyTable);
        }
        if trimmed.len() > MAX_TABLE_NAME_LEN {
            return Err(InputRecordError::TableNameTooLong);
        }
        Ok(Self {
            table: trimmed.to_string(),
            fields,
            identifiers: Vec::new(),
        })
    }

    pub fn with_identifiers(mut self, identifiers: Vec<CandidateIdentifier>) -> Self {
        self.identifiers = identifiers;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputRecordError {
    EmptyTable,
    TableNameTooLong,
}

impl std::fmt::Display for InputRecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTable => write!(f, "record table must not be empty"),
            Self::TableNameTooLong => write!(f, "record table name is too long"),
        }
    }
}

impl std::error::Error for InputRecordError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{IdentifierType, SourceId};

    fn mrn(source: &str, local_id: &str) -> CandidateIdentifier {
        CandidateIdentifier::try_new(
            SourceId::try_new(source).expect("source"),
            local_id,
            IdentifierType::try_new("mrn").expect("type"),
        )
        .expect("candidate")
    }

    #[test]
    fn local_id_is_trimmed() {
        assert_eq!(mrn("1", "  X-42  ").local_id(), "X-42");
    }

    #[test]
    fn empty_local_id_is_rejected() {
        let err = CandidateIdentifier::try_new(
            SourceId::try_new("1").expect("source"),
            "   ",
            IdentifierType::try_new("mrn").expect("type"),
        )
        .expect_err("empty local id");
        assert_eq!(err, CandidateIdentifierError::EmptyLocalId);
    }

    #[test]
    fn record_builder_normalizes_table_name() {
        let record = InputRecord::new(" sample ", FieldMap::new()).expect("record");
        assert_eq!(record.table, "sample");
        assert!(record.identifiers.is_empty());
    }
}
