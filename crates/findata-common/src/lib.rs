//! Financial Data Adapter Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the adapter workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error and result types
//! - **Types**: Loan type and dataset kind discriminators, tenant codes
//! - **Logging**: Centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```
//! use findata_common::types::{DatasetKind, LoanType};
//!
//! fn main() -> findata_common::Result<()> {
//!     let loan_type: LoanType = " retail ".parse()?;
//!     let kind = DatasetKind::parse_or_default(None)?;
//!     assert_eq!(loan_type, LoanType::Retail);
//!     assert_eq!(kind, DatasetKind::Credit);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{DatasetKind, LoanType, TenantCode};
