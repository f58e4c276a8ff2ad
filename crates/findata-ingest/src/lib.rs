//! Financial data ingestion pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves loan master data (CREDIT) and installment schedules (PAYMENT_PLAN)
//! from a source-of-record into a relational system of record and a
//! column-oriented analytical store, all or nothing per run.
//!
//! # Modules
//!
//! - [`schema`]: field specifications per dataset kind
//! - [`normalize`] and [`validate`]: typed coercion and row validation
//! - [`batch`]: the audit record of a run and its state machine
//! - [`source`]: streaming access to the source-of-record
//! - [`destination`]: the relational and analytical stores
//! - [`staging`]: staging table publish on the analytical store
//! - [`orchestrator`]: the two-pass run
//! - [`memory`]: in-memory backends for tests and local runs
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use findata_common::LoanType;
//! use findata_ingest::memory::{MemoryAnalytical, MemoryBatchStore, MemoryRelational, MemorySource};
//! use findata_ingest::raw::RawRow;
//! use findata_ingest::IngestionOrchestrator;
//!
//! # #[tokio::main]
//! # async fn main() -> findata_ingest::Result<()> {
//! let source = Arc::new(MemorySource::new());
//! source
//!     .add_credit(
//!         "BANK001",
//!         LoanType::Retail,
//!         RawRow::new()
//!             .with("loan_account_number", "L1")
//!             .with("loan_status_code", "A")
//!             .with("loan_start_date", "2025-01-15")
//!             .with("original_loan_amount", "1000,50"),
//!     )
//!     .await;
//!
//! let batches = Arc::new(MemoryBatchStore::new());
//! batches.add_tenant("BANK001", "First Bank").await?;
//!
//! let orchestrator = IngestionOrchestrator::new(
//!     source,
//!     Arc::new(MemoryRelational::new()),
//!     Arc::new(MemoryAnalytical::new()),
//!     batches,
//! );
//! assert!(orchestrator.run("bank001", "RETAIL", None, None).await?);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod destination;
pub mod error;
pub mod memory;
pub mod normalize;
pub mod orchestrator;
pub mod raw;
pub mod schema;
pub mod source;
pub mod staging;
pub mod validate;

pub use batch::{Batch, BatchStatus, BatchStore, BatchTracker, PgBatchStore};
pub use config::IngestConfig;
pub use destination::{AnalyticalStore, ClickHouseStore, PgRelationalStore, RelationalStore};
pub use error::{IngestError, Result};
pub use orchestrator::IngestionOrchestrator;
pub use schema::SchemaRegistry;
pub use source::{PgSourceProvider, SourceProvider};
pub use validate::{ErrorKind, ValidationError};
