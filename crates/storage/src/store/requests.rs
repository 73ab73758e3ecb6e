#![forbid(unsafe_code)]

use serde_json::Value;
use sr_core::gsid::Gsid;
use sr_core::ids::{BatchId, IdentifierType, SourceId};
use sr_core::record::{CandidateIdentifier, InputRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolutionDecision {
    CreateNew,
    LinkExisting,
    AlreadyLinked,
    Conflict,
}

impl ResolutionDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateNew => "create_new",
            Self::LinkExisting => "link_existing",
            Self::AlreadyLinked => "already_linked",
            Self::Conflict => "conflict",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolveRequest {
    pub batch_id: Option<BatchId>,
    pub identifier: CandidateIdentifier,
}

/// Outcome of one resolution attempt; `record_id` points at the ledger row.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolutionReceipt {
    pub record_id: i64,
    pub decision: ResolutionDecision,
    pub gsid: Option<Gsid>,
    pub confidence: f64,
    pub requires_review: bool,
    pub reason: Option<String>,
}

/// Joint resolution of every candidate identifier carried by one record.
/// `gsid` is present only when all candidates agree on a single subject.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordResolution {
    pub gsid: Option<Gsid>,
    pub receipts: Vec<ResolutionReceipt>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Inserted,
    Updated,
    Skipped,
    Rejected,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Rejected => "rejected",
        }
    }
}

/// Why a record was rejected. Recorded verbatim in the load ledger.
#[derive(Clone, Debug, PartialEq)]
pub enum Violation {
    MissingKeyField { field: String },
    NullKeyField { field: String },
    ImmutableFieldChanged { field: String, stored: Value, incoming: Value },
}

impl Violation {
    pub fn field(&self) -> &str {
        match self {
            Self::MissingKeyField { field }
            | Self::NullKeyField { field }
            | Self::ImmutableFieldChanged { field, .. } => field,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::MissingKeyField { field } => serde_json::json!({
                "kind": "missing_key_field",
                "field": field,
            }),
            Self::NullKeyField { field } => serde_json::json!({
                "kind": "null_key_field",
                "field": field,
            }),
            Self::ImmutableFieldChanged { field, stored, incoming } => serde_json::json!({
                "kind": "immutable_field_changed",
                "field": field,
                "stored": stored,
                "incoming": incoming,
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpsertRequest {
    pub batch_id: Option<BatchId>,
    pub table: String,
    pub fields: sr_core::record::FieldMap,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpsertReceipt {
    pub record_id: i64,
    pub status: LoadStatus,
    pub key: Vec<Value>,
    pub changed_fields: Vec<String>,
    pub violation: Option<Violation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchMode {
    /// Each record commits on its own; a failure is scoped to that record.
    PerRecord,
    /// One transaction for the whole batch; any storage failure or
    /// cancellation before commit discards everything.
    AllOrNothing,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchRequest {
    pub batch_id: BatchId,
    pub mode: BatchMode,
    pub records: Vec<InputRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BatchEntry {
    Loaded {
        resolution: Option<RecordResolution>,
        upsert: UpsertReceipt,
    },
    /// Identity could not be pinned to one subject; the upsert was not
    /// attempted. The conflict is already ledgered.
    IdentityConflict { resolution: RecordResolution },
    Failed { error: String, retryable: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub entries: Vec<BatchEntry>,
}

// Ledger rows are returned raw (string decision/outcome, JSON payloads as
// stored); they are audit records, not live domain objects.

#[derive(Clone, Debug, PartialEq)]
pub struct ResolutionRow {
    pub seq: i64,
    pub batch_id: Option<String>,
    pub source: String,
    pub local_id: String,
    pub id_type: String,
    pub decision: String,
    pub gsid: Option<String>,
    pub confidence: f64,
    pub requires_review: bool,
    pub reason: Option<String>,
    pub ts_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoadOutcomeRow {
    pub seq: i64,
    pub batch_id: Option<String>,
    pub table: String,
    pub key_json: String,
    pub outcome: String,
    pub changed_fields_json: Option<String>,
    pub violation_json: Option<String>,
    pub ts_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubjectRow {
    pub gsid: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MappingRow {
    pub source: String,
    pub local_id: String,
    pub id_type: String,
    pub gsid: String,
    pub created_at_ms: i64,
}

/// A subject together with every local identifier linked to it.
#[derive(Clone, Debug, PartialEq)]
pub struct SubjectLookup {
    pub subject: SubjectRow,
    pub mappings: Vec<MappingRow>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MappingLookupRequest {
    pub source: SourceId,
    pub local_id: String,
    pub id_type: IdentifierType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingReviewRequest {
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutcomesByTableRequest {
    pub table: String,
    pub limit: usize,
    pub offset: usize,
}
