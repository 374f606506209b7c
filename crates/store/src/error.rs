use common::Version;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A versioned row changed since it was read.
    #[error("Concurrency conflict on {entity} {id}: expected version {expected}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: Version,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness rule was violated, e.g. a second payment for one order.
    #[error("Duplicate {entity}: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A ledger row was saved without being locked in this transaction.
    #[error("{entity} {id} must be locked before it is saved")]
    NotLocked { entity: &'static str, id: String },

    /// A stored value no longer satisfies the domain invariants.
    #[error("Corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn corrupt(entity: &'static str, id: impl ToString, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            entity,
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }

    /// True when re-running the whole transaction may succeed: optimistic
    /// conflicts, PostgreSQL serialization failures and deadlocks.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::ConcurrencyConflict { .. } => true,
            StoreError::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        let err = StoreError::ConcurrencyConflict {
            entity: "order",
            id: "x".into(),
            expected: Version::first(),
        };
        assert!(err.is_retryable());
        assert!(err.is_concurrency_conflict());
    }

    #[test]
    fn test_other_errors_are_not_retryable() {
        assert!(!StoreError::not_found("order", "x").is_retryable());
        assert!(
            !StoreError::Duplicate {
                entity: "payment",
                id: "x".into()
            }
            .is_retryable()
        );
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_retryable());
    }
}
