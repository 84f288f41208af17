//! Engine error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use catalogerp_core::DomainError;

use crate::blob::BlobError;
use crate::store::StoreError;

/// Machine-readable error category, as reported per failed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InactiveParent,
    Conflict,
    Transaction,
    Storage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InactiveParent => "inactive_parent",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Storage => "storage",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every engine operation.
///
/// Domain failures keep their category; persistence failures are folded in:
/// unique violations surface as [`CatalogError::Conflict`], any other backend problem as
/// [`CatalogError::Transaction`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("inactive parent: {0}")]
    InactiveParent(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Commit, connectivity or deadlock failure. The unit of work was rolled back.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Blob upload failure.
    #[error("storage failed: {0}")]
    Storage(String),
}

impl CatalogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Validation(_) => ErrorKind::Validation,
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::InactiveParent(_) => ErrorKind::InactiveParent,
            CatalogError::Conflict(_) => ErrorKind::Conflict,
            CatalogError::Transaction(_) => ErrorKind::Transaction,
            CatalogError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Conflict(_) | CatalogError::Transaction(_))
    }
}

impl From<DomainError> for CatalogError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
        }
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Backend(msg) => Self::Transaction(msg),
        }
    }
}

impl From<BlobError> for CatalogError {
    fn from(err: BlobError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let conflict: CatalogError = StoreError::UniqueViolation("products_active_sku_key".into()).into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_retryable());

        let tx: CatalogError = StoreError::Backend("deadlock detected".into()).into();
        assert_eq!(tx.kind(), ErrorKind::Transaction);
    }

    #[test]
    fn invalid_ids_are_validation_errors() {
        let err: CatalogError = DomainError::invalid_id("EntityId: bad").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InactiveParent).unwrap();
        assert_eq!(json, "\"inactive_parent\"");
    }
}
