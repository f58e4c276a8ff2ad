//! Ingestion error types
//!
//! Three families of failure exist:
//!
//! - **input errors** (`InvalidArgument`, `TenantNotFound`, `BatchNotFound`,
//!   `IllegalTransition`): raised before any batch mutation
//! - **row-level validation errors**: never surfaced as `IngestError`; they are
//!   collected as [`crate::validate::ValidationError`] and attached to the batch
//! - **infrastructure errors** (everything else): recorded on the batch as
//!   FAILED and re-raised to the caller

use thiserror::Error;
use uuid::Uuid;

use crate::batch::BatchStatus;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Illegal batch transition from {from} to {to}")]
    IllegalTransition { from: BatchStatus, to: BatchStatus },

    #[error("Batch {id} is already {status}")]
    BatchClosed { id: Uuid, status: BatchStatus },

    /// A row accepted by the dry pass no longer validates in the load pass
    #[error("Source changed during load: row {row} failed validation ({reason})")]
    SourceChanged { row: u64, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analytical store error (status {status}): {message}")]
    Analytical { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Common(#[from] findata_common::Error),
}

impl IngestError {
    /// True for caller mistakes that are rejected before the batch is touched
    pub fn is_input_error(&self) -> bool {
        match self {
            IngestError::InvalidArgument(_)
            | IngestError::TenantNotFound(_)
            | IngestError::BatchNotFound(_)
            | IngestError::IllegalTransition { .. } => true,
            IngestError::Common(findata_common::Error::InvalidArgument(_)) => true,
            _ => false,
        }
    }
}
