//! Engine Error Codes Registry
//!
//! Error code format: RC-{module}-{sequence}
//! - RC-STORE: Storage errors
//! - RC-LEDGER: Ledger consistency errors
//! - RC-CONFIG: Configuration errors
//! - RC-FOREST: Referral forest errors

use rust_decimal::Decimal;
use thiserror::Error;

/// Engine Result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine Error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ============================================================
    // Storage Errors (RC-STORE-*)
    // ============================================================
    /// [RC-STORE-001] Storage backend unreachable or failing
    #[error("[RC-STORE-001] Storage error: {0}")]
    Storage(String),

    /// [RC-STORE-002] Stored value could not be (de)serialized
    #[error("[RC-STORE-002] Serialization error: {0}")]
    Serialization(String),

    /// [RC-STORE-003] Batch precondition failed, nothing was written
    #[error("[RC-STORE-003] Write conflict on {entity} {id}: {reason}")]
    Conflict {
        entity: String,
        id: String,
        reason: String,
    },

    // ============================================================
    // Ledger Errors (RC-LEDGER-*)
    // ============================================================
    /// [RC-LEDGER-001] Amount is not usable for distribution
    #[error("[RC-LEDGER-001] Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: String },

    /// [RC-LEDGER-002] Split does not reconcile with its source amount
    #[error("[RC-LEDGER-002] Split mismatch: expected {expected}, got {actual}")]
    SplitMismatch { expected: Decimal, actual: Decimal },

    // ============================================================
    // Config Errors (RC-CONFIG-*)
    // ============================================================
    /// [RC-CONFIG-001] Invalid configuration value
    #[error("[RC-CONFIG-001] Invalid configuration: {0}")]
    InvalidConfig(String),

    // ============================================================
    // Forest Errors (RC-FOREST-*)
    // ============================================================
    /// [RC-FOREST-001] Upline walk exceeded the iteration cap
    #[error("[RC-FOREST-001] Upline walk from {start} exceeded {cap} hops")]
    UplineCapExceeded { start: String, cap: usize },

    // ============================================================
    // General Errors
    // ============================================================
    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Invalid state
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },
}

impl EngineError {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a conflict error
    pub fn conflict(
        entity: impl Into<String>,
        id: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            entity: entity.into(),
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Whether the error means the storage backend itself is failing.
    ///
    /// Fatal errors abort a whole job run; everything else is
    /// scoped to the candidate being processed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    /// Whether the error came from a failed batch precondition
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_in_messages() {
        let err = EngineError::conflict("badge_token", 7, "already consumed");
        assert!(err.to_string().starts_with("[RC-STORE-003]"));
        assert!(err.is_conflict());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_split_mismatch_is_candidate_scoped() {
        let err = EngineError::SplitMismatch {
            expected: Decimal::new(100, 0),
            actual: Decimal::new(112, 0),
        };
        assert!(err.to_string().starts_with("[RC-LEDGER-002]"));
        assert!(!err.is_fatal());
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_storage_error_is_fatal() {
        let err = EngineError::Storage("disk gone".to_string());
        assert!(err.is_fatal());
    }
}
