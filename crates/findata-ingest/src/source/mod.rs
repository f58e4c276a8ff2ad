//! Source-of-record access
//!
//! A run reads its dataset twice through [`SourceProvider::rows`], so the
//! stream must be restartable and return rows in the same order every time.

pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use findata_common::{DatasetKind, LoanType, TenantCode};
use futures::stream::BoxStream;

use crate::error::Result;
use crate::raw::RawRow;

pub use postgres::PgSourceProvider;

/// Which slice of the source a run reads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceScope {
    /// Bank code on the source side, the tenant code upper-cased (`BANK001`)
    pub source_id: String,
    pub loan_type: LoanType,
    pub dataset: DatasetKind,
}

impl SourceScope {
    pub fn new(tenant: &TenantCode, loan_type: LoanType, dataset: DatasetKind) -> Self {
        Self {
            source_id: tenant.as_str().to_uppercase(),
            loan_type,
            dataset,
        }
    }
}

/// One source row with its keys
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// Surrogate id defining the read order
    pub id: i64,
    /// External loan id
    pub external_id: String,
    /// Set for payment-plan rows
    pub installment_number: Option<i64>,
    pub payload: RawRow,
}

#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn count(&self, scope: &SourceScope) -> Result<u64>;

    /// Lazily fetched rows ordered by surrogate id
    fn rows<'a>(&'a self, scope: &'a SourceScope) -> BoxStream<'a, Result<SourceRow>>;

    /// External ids of every credit row for the source and loan type
    async fn credit_ids(&self, source_id: &str, loan_type: LoanType) -> Result<HashSet<String>>;

    /// Version marker of the current source snapshot, if tracked
    async fn dataset_version(&self, scope: &SourceScope) -> Result<Option<String>>;
}
