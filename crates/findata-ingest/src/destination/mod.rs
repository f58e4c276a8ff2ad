//! Destination stores written by the load pass

pub mod analytical;
pub mod relational;

pub use analytical::{AnalyticalStore, ClickHouseStore, ColumnDef, TableDefinition};
pub use relational::{
    Ownership, PgRelationalStore, RelationalRecord, RelationalStore, RelationalTransaction,
};
