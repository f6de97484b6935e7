//! Structured error types for the provenance ledger.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! categorical [`ProvenanceError`].  Failures are local and recoverable: a
//! rejected operation never leaves partial writes behind.  The CLI converts
//! errors into stable integer codes via [`ErrorCode`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Record kinds and fields
// ---------------------------------------------------------------------------

/// Which ledger a record id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Batch,
    Certification,
    Shipment,
    /// Approver slots of a single shipment.
    Approval,
    Transfer,
    Escrow,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Batch => "batch",
            Self::Certification => "certification",
            Self::Shipment => "shipment",
            Self::Approval => "approver slot",
            Self::Transfer => "transfer",
            Self::Escrow => "escrow",
        };
        f.write_str(s)
    }
}

/// The input field that failed a length, range, or format check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidField {
    Hash,
    Title,
    Description,
    HarvestDate,
    BatchSize,
    CertBody,
    Geo,
    Quality,
    CertHash,
    Expiry,
    Origin,
    Destination,
    Timestamp,
    Status,
    EscrowAmount,
    NewOwner,
    Fee,
    Capacity,
}

impl fmt::Display for InvalidField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hash => "batch hash",
            Self::Title => "title",
            Self::Description => "description",
            Self::HarvestDate => "harvest date",
            Self::BatchSize => "batch size",
            Self::CertBody => "certifying body",
            Self::Geo => "geo location",
            Self::Quality => "quality metric",
            Self::CertHash => "certification hash",
            Self::Expiry => "certification expiry",
            Self::Origin => "origin principal",
            Self::Destination => "destination principal",
            Self::Timestamp => "timestamp",
            Self::Status => "status",
            Self::EscrowAmount => "escrow amount",
            Self::NewOwner => "new owner",
            Self::Fee => "fee",
            Self::Capacity => "capacity",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ProvenanceError {
    #[error("governing authority has not been set")]
    AuthorityNotSet,

    #[error("governing authority is already set")]
    AuthorityAlreadySet,

    #[error("unauthorized: caller may not {action}")]
    Unauthorized { action: &'static str },

    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: u64 },

    #[error("invalid {0}")]
    InvalidInput(InvalidField),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{kind} capacity of {capacity} exceeded")]
    CapacityExceeded { kind: RecordKind, capacity: u64 },

    #[error("approval already recorded")]
    DuplicateApproval,

    #[error("certification missing or expired")]
    Expired,

    /// The value-transfer sink refused the fee intent.
    #[error("fee transfer: {0}")]
    FeeTransfer(String),

    #[error("config: {0}")]
    Config(String),

    #[error("store: {0}")]
    Store(String),

    #[error("report: {0}")]
    Report(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, ProvenanceError>;

impl ProvenanceError {
    pub(crate) fn not_found(kind: RecordKind, id: u64) -> Self {
        Self::NotFound { kind, id }
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

// ---------------------------------------------------------------------------
// Stable error codes
// ---------------------------------------------------------------------------

/// Integer codes reported by the CLI and in machine-readable output.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Ok = 0,
    AuthorityNotSet = 1,
    AuthorityAlreadySet = 2,
    Unauthorized = 3,
    NotFound = 4,
    InvalidInput = 5,
    InvalidState = 6,
    CapacityExceeded = 7,
    DuplicateApproval = 8,
    Expired = 9,
    FeeTransfer = 10,
    ConfigError = 20,
    StoreError = 21,
    ReportError = 22,
    IoError = 23,
}

impl From<&ProvenanceError> for ErrorCode {
    fn from(e: &ProvenanceError) -> Self {
        match e {
            ProvenanceError::AuthorityNotSet => Self::AuthorityNotSet,
            ProvenanceError::AuthorityAlreadySet => Self::AuthorityAlreadySet,
            ProvenanceError::Unauthorized { .. } => Self::Unauthorized,
            ProvenanceError::NotFound { .. } => Self::NotFound,
            ProvenanceError::InvalidInput(_) => Self::InvalidInput,
            ProvenanceError::InvalidState(_) => Self::InvalidState,
            ProvenanceError::CapacityExceeded { .. } => Self::CapacityExceeded,
            ProvenanceError::DuplicateApproval => Self::DuplicateApproval,
            ProvenanceError::Expired => Self::Expired,
            ProvenanceError::FeeTransfer(_) => Self::FeeTransfer,
            ProvenanceError::Config(_) => Self::ConfigError,
            ProvenanceError::Store(_) => Self::StoreError,
            ProvenanceError::Report(_) => Self::ReportError,
            ProvenanceError::Io(_) => Self::IoError,
        }
    }
}

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Adds subsystem context to any `Result<T, E>` whose error is displayable.
///
/// ```ignore
/// std::fs::read_to_string(path).ctx_store("read snapshot")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_store(self, msg: &str) -> Result<T>;
    fn ctx_report(self, msg: &str) -> Result<T>;
}

impl<T, E: fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| ProvenanceError::Config(format!("{msg}: {e}")))
    }
    fn ctx_store(self, msg: &str) -> Result<T> {
        self.map_err(|e| ProvenanceError::Store(format!("{msg}: {e}")))
    }
    fn ctx_report(self, msg: &str) -> Result<T> {
        self.map_err(|e| ProvenanceError::Report(format!("{msg}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_category() {
        let errs = [
            ProvenanceError::AuthorityNotSet,
            ProvenanceError::AuthorityAlreadySet,
            ProvenanceError::Unauthorized { action: "x" },
            ProvenanceError::not_found(RecordKind::Batch, 1),
            ProvenanceError::InvalidInput(InvalidField::Title),
            ProvenanceError::invalid_state("x"),
            ProvenanceError::CapacityExceeded {
                kind: RecordKind::Shipment,
                capacity: 1,
            },
            ProvenanceError::DuplicateApproval,
            ProvenanceError::Expired,
        ];
        let mut codes: Vec<i32> = errs.iter().map(|e| ErrorCode::from(e) as i32).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
        assert!(!codes.contains(&(ErrorCode::Ok as i32)));
    }

    #[test]
    fn messages_name_the_record() {
        let e = ProvenanceError::not_found(RecordKind::Transfer, 7);
        assert_eq!(e.to_string(), "transfer 7 not found");
        let e = ProvenanceError::InvalidInput(InvalidField::Geo);
        assert_eq!(e.to_string(), "invalid geo location");
    }

    #[test]
    fn ctx_store_wraps_message() {
        let r: std::result::Result<(), &str> = Err("boom");
        let e = r.ctx_store("write snapshot").unwrap_err();
        assert!(matches!(e, ProvenanceError::Store(ref m) if m == "write snapshot: boom"));
    }
}
