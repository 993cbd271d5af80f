//! Error taxonomy for the triage pipeline.

use crate::types::case::CaseStatus;
use thiserror::Error;

/// Errors surfaced by the triage core.
///
/// Stream and store failures are transient: callers retry on their next tick
/// and leave the offending record unacknowledged. Push failures are logged
/// and swallowed so the pipeline never blocks on a slow dashboard.
#[derive(Error, Debug)]
pub enum TriageError {
    /// Record whose `event_data` is missing or unparseable.
    #[error("poison record {record_id}: {reason}")]
    PoisonRecord { record_id: String, reason: String },

    /// A case already exists for this trigger transaction. Benign: the
    /// pipeline treats it as success and re-acks the record.
    #[error("case already exists for trigger transaction {0}")]
    DuplicateTrigger(String),

    #[error("fraud case not found: {0}")]
    CaseNotFound(String),

    /// Attempted a status move outside the transition table.
    #[error("illegal case transition: {from} -> {to}")]
    IllegalTransition { from: CaseStatus, to: CaseStatus },

    #[error("bad payload: {0}")]
    BadPayload(String),

    #[error("case store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("event stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("push delivery failed: {0}")]
    PushFailure(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TriageError>;
