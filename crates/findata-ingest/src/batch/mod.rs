//! Batch audit records and their lifecycle

pub mod lifecycle;
pub mod models;
pub mod store;

pub use lifecycle::BatchTracker;
pub use models::{Batch, BatchField, BatchStatus, Tenant};
pub use store::{BatchStore, PgBatchStore};
