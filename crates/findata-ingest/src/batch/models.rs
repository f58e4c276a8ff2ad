//! Batch and tenant records

use chrono::{DateTime, Utc};
use findata_common::{LoanType, TenantCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Batch status
///
/// `Started -> Processing -> {Success | FailedValidation | Failed}`. A batch
/// that never reached processing may still fail directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Started,
    Processing,
    Success,
    FailedValidation,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Started => "STARTED",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Success => "SUCCESS",
            BatchStatus::FailedValidation => "FAILED_VALIDATION",
            BatchStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Success | BatchStatus::FailedValidation | BatchStatus::Failed
        )
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        match (self, next) {
            (BatchStatus::Started, BatchStatus::Processing | BatchStatus::Failed) => true,
            (BatchStatus::Processing, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(BatchStatus::Started),
            "PROCESSING" => Ok(BatchStatus::Processing),
            "SUCCESS" => Ok(BatchStatus::Success),
            "FAILED_VALIDATION" => Ok(BatchStatus::FailedValidation),
            "FAILED" => Ok(BatchStatus::Failed),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tenant owning batches and destination rows (maps to `tenants`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub code: TenantCode,
}

/// Audit record of one ingestion run (maps to `batches`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub tenant_code: TenantCode,
    pub loan_type: Option<LoanType>,
    pub status: BatchStatus,
    pub total_rows: i64,
    pub valid_rows: i64,
    pub invalid_rows: i64,
    pub record_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Fresh STARTED batch for a tenant
    pub fn new(tenant: &Tenant, loan_type: LoanType) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant.id,
            tenant_code: tenant.code.clone(),
            loan_type: Some(loan_type),
            status: BatchStatus::Started,
            total_rows: 0,
            valid_rows: 0,
            invalid_rows: 0,
            record_count: 0,
            started_at: None,
            completed_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

/// Column of `batches` that can be saved on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchField {
    Status,
    LoanType,
    TotalRows,
    ValidRows,
    InvalidRows,
    RecordCount,
    StartedAt,
    CompletedAt,
    ErrorMessage,
}

impl BatchField {
    pub fn column(&self) -> &'static str {
        match self {
            BatchField::Status => "status",
            BatchField::LoanType => "loan_type",
            BatchField::TotalRows => "total_rows",
            BatchField::ValidRows => "valid_rows",
            BatchField::InvalidRows => "invalid_rows",
            BatchField::RecordCount => "record_count",
            BatchField::StartedAt => "started_at",
            BatchField::CompletedAt => "completed_at",
            BatchField::ErrorMessage => "error_message",
        }
    }
}
