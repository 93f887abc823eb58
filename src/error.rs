//! Error taxonomy for the crossmatch pipeline.
//!
//! Every variant names the catalog it concerns and, where one exists, the
//! partition key and object id. Nothing is auto-corrected: consistency errors
//! mean the index and bulk storage have drifted apart and must be repaired at
//! the source.

use thiserror::Error;

use crate::index::ObjectId;
use crate::storage::StoreError;

pub type Result<T, E = MatchError> = std::result::Result<T, E>;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any I/O: bad parameters or a malformed artifact schema.
    Input,
    /// Index and bulk storage disagree. Always fatal.
    Consistency,
    /// Network or disk failures that survived every retry.
    Transient,
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("tolerance must be positive, got {tolerance_arcsec} arcsec")]
    InvalidTolerance { tolerance_arcsec: f64 },

    #[error("no index artifact for catalog '{catalog}' under '{path}'")]
    IndexNotFound { catalog: String, path: String },

    #[error("schema error in catalog '{catalog}', column '{column}': {reason}")]
    Schema {
        catalog: String,
        column: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("catalog '{catalog}': partition {partition} is in the index but has no bulk files")]
    PartitionNotFound { catalog: String, partition: i64 },

    #[error("catalog '{catalog}': object {object_id} is missing from partition {partition}")]
    ObjectIdMismatch {
        catalog: String,
        partition: i64,
        object_id: ObjectId,
    },

    #[error("catalog '{catalog}': matched object {object_id} has no fetched bulk record")]
    MissingBulkRecord { catalog: String, object_id: ObjectId },

    #[error("catalog '{catalog}': object {object_id} appears more than once")]
    DuplicateObject { catalog: String, object_id: ObjectId },

    #[error(
        "catalog '{catalog}': object {object_id} stored under partition {partition} \
         carries partition key {found}"
    )]
    PartitionMismatch {
        catalog: String,
        partition: i64,
        object_id: ObjectId,
        found: i64,
    },

    #[error("catalog '{catalog}': fetching partition {partition} failed after {attempts} attempts: {reason}")]
    FetchFailed {
        catalog: String,
        partition: i64,
        attempts: u32,
        reason: String,
    },

    #[error("catalog '{catalog}': {source}")]
    Storage {
        catalog: String,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl MatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MatchError::InvalidTolerance { .. }
            | MatchError::IndexNotFound { .. }
            | MatchError::Schema { .. }
            | MatchError::Config(_) => ErrorClass::Input,
            MatchError::PartitionNotFound { .. }
            | MatchError::ObjectIdMismatch { .. }
            | MatchError::MissingBulkRecord { .. }
            | MatchError::DuplicateObject { .. }
            | MatchError::PartitionMismatch { .. } => ErrorClass::Consistency,
            MatchError::FetchFailed { .. } => ErrorClass::Transient,
            MatchError::Storage { source, .. } if source.is_transient() => ErrorClass::Transient,
            MatchError::Storage { .. } | MatchError::Arrow(_) | MatchError::Parquet(_) => {
                ErrorClass::Input
            }
        }
    }

    pub(crate) fn schema(catalog: &str, column: &str, reason: impl Into<String>) -> Self {
        MatchError::Schema {
            catalog: catalog.to_string(),
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(catalog: &str, source: StoreError) -> Self {
        MatchError::Storage {
            catalog: catalog.to_string(),
            source,
        }
    }
}
