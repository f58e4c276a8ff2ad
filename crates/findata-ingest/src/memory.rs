//! In-memory implementations of every storage boundary
//!
//! They behave like the real backends where a run can observe the
//! difference: the relational transaction only applies on commit, the
//! analytical store rejects renames onto missing tables, and the source
//! returns rows in insertion order on every scan. Each one can be told to
//! fail so error paths can be driven from tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use findata_common::{DatasetKind, LoanType, TenantCode};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::batch::{Batch, BatchField, BatchStore, Tenant};
use crate::destination::analytical::AnalyticalStore;
use crate::destination::relational::{RelationalRecord, RelationalStore, RelationalTransaction};
use crate::error::{IngestError, Result};
use crate::normalize;
use crate::raw::RawRow;
use crate::schema::LOAN_REFERENCE_FIELD;
use crate::source::{SourceProvider, SourceRow, SourceScope};
use crate::validate::ValidationError;

fn injected(what: &str) -> IngestError {
    IngestError::Analytical {
        status: 500,
        message: format!("injected failure: {what}"),
    }
}

// ----------------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------------

#[derive(Default)]
struct SourceState {
    next_id: i64,
    rows: HashMap<SourceScope, Vec<SourceRow>>,
    rescan_rows: HashMap<SourceScope, Vec<SourceRow>>,
    scans: HashMap<SourceScope, usize>,
    versions: HashMap<SourceScope, String>,
}

/// Source system holding rows per (bank, loan type, dataset)
#[derive(Default)]
pub struct MemorySource {
    state: Mutex<SourceState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn source_row(state: &mut SourceState, payload: RawRow) -> SourceRow {
        state.next_id += 1;
        SourceRow {
            id: state.next_id,
            external_id: payload
                .get(LOAN_REFERENCE_FIELD)
                .to_text()
                .unwrap_or_default(),
            installment_number: normalize::integer(payload.get("installment_number")),
            payload,
        }
    }

    pub async fn push(&self, scope: &SourceScope, payload: RawRow) {
        let mut state = self.state.lock().await;
        let row = Self::source_row(&mut state, payload);
        state.rows.entry(scope.clone()).or_default().push(row);
    }

    pub async fn add_credit(&self, source_id: &str, loan_type: LoanType, payload: RawRow) {
        self.push(&scope(source_id, loan_type, DatasetKind::Credit), payload)
            .await;
    }

    pub async fn add_payment_plan(&self, source_id: &str, loan_type: LoanType, payload: RawRow) {
        self.push(&scope(source_id, loan_type, DatasetKind::PaymentPlan), payload)
            .await;
    }

    /// Rows served by every scan after the first, as if the source changed
    /// between the dry pass and the load pass
    pub async fn change_after_first_scan(&self, scope: &SourceScope, payloads: Vec<RawRow>) {
        let mut state = self.state.lock().await;
        let rows = payloads
            .into_iter()
            .map(|p| Self::source_row(&mut state, p))
            .collect();
        state.rescan_rows.insert(scope.clone(), rows);
    }

    pub async fn set_version(&self, scope: &SourceScope, version: impl Into<String>) {
        self.state
            .lock()
            .await
            .versions
            .insert(scope.clone(), version.into());
    }

    /// Number of times `rows` was consumed for the scope
    pub async fn scans(&self, scope: &SourceScope) -> usize {
        self.state
            .lock()
            .await
            .scans
            .get(scope)
            .copied()
            .unwrap_or(0)
    }

    async fn snapshot(&self, scope: &SourceScope) -> Vec<SourceRow> {
        let mut state = self.state.lock().await;
        let scan = {
            let scans = state.scans.entry(scope.clone()).or_insert(0);
            *scans += 1;
            *scans
        };
        if scan > 1 {
            if let Some(rows) = state.rescan_rows.get(scope) {
                return rows.clone();
            }
        }
        state.rows.get(scope).cloned().unwrap_or_default()
    }
}

/// Scope helper for tests and local runs
pub fn scope(source_id: &str, loan_type: LoanType, dataset: DatasetKind) -> SourceScope {
    SourceScope {
        source_id: source_id.to_string(),
        loan_type,
        dataset,
    }
}

#[async_trait]
impl SourceProvider for MemorySource {
    async fn count(&self, scope: &SourceScope) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.rows.get(scope).map_or(0, |rows| rows.len() as u64))
    }

    fn rows<'a>(&'a self, scope: &'a SourceScope) -> BoxStream<'a, Result<SourceRow>> {
        stream::once(self.snapshot(scope))
            .flat_map(|rows| stream::iter(rows.into_iter().map(Ok)))
            .boxed()
    }

    async fn credit_ids(&self, source_id: &str, loan_type: LoanType) -> Result<HashSet<String>> {
        let state = self.state.lock().await;
        let ids = state
            .rows
            .get(&scope(source_id, loan_type, DatasetKind::Credit))
            .map(|rows| {
                rows.iter()
                    .filter(|r| !r.external_id.is_empty())
                    .map(|r| r.external_id.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn dataset_version(&self, scope: &SourceScope) -> Result<Option<String>> {
        Ok(self.state.lock().await.versions.get(scope).cloned())
    }
}

// ----------------------------------------------------------------------------
// Relational
// ----------------------------------------------------------------------------

#[derive(Default)]
struct RelationalState {
    rows: Vec<RelationalRecord>,
    commits: usize,
    insert_calls: usize,
    fail_insert: bool,
    fail_commit: bool,
}

/// Relational store whose transactions buffer until commit
#[derive(Clone, Default)]
pub struct MemoryRelational {
    state: Arc<Mutex<RelationalState>>,
}

impl MemoryRelational {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows, outside any transaction
    pub async fn seed(&self, rows: Vec<RelationalRecord>) {
        self.state.lock().await.rows.extend(rows);
    }

    pub async fn rows(&self) -> Vec<RelationalRecord> {
        self.state.lock().await.rows.clone()
    }

    pub async fn commits(&self) -> usize {
        self.state.lock().await.commits
    }

    /// Number of `insert` calls, one per flushed chunk
    pub async fn insert_calls(&self) -> usize {
        self.state.lock().await.insert_calls
    }

    pub async fn fail_inserts(&self, fail: bool) {
        self.state.lock().await.fail_insert = fail;
    }

    pub async fn fail_commits(&self, fail: bool) {
        self.state.lock().await.fail_commit = fail;
    }
}

#[async_trait]
impl RelationalStore for MemoryRelational {
    async fn begin(&self) -> Result<Box<dyn RelationalTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            deletes: Vec::new(),
            inserts: Vec::new(),
        }))
    }
}

fn in_partition(
    record: &RelationalRecord,
    tenant_id: Uuid,
    loan_type: LoanType,
    dataset: DatasetKind,
) -> bool {
    match (record, dataset) {
        (RelationalRecord::Loan(r), DatasetKind::Credit) => {
            r.tenant_id == tenant_id && r.loan_type == loan_type
        }
        (RelationalRecord::PaymentPlan(r), DatasetKind::PaymentPlan) => {
            r.tenant_id == tenant_id && r.loan_type == loan_type
        }
        _ => false,
    }
}

/// Dropped without commit means rolled back
pub struct MemoryTransaction {
    state: Arc<Mutex<RelationalState>>,
    deletes: Vec<(Uuid, LoanType, DatasetKind)>,
    inserts: Vec<RelationalRecord>,
}

#[async_trait]
impl RelationalTransaction for MemoryTransaction {
    async fn delete_partition(
        &mut self,
        tenant_id: Uuid,
        loan_type: LoanType,
        dataset: DatasetKind,
    ) -> Result<u64> {
        let state = self.state.lock().await;
        let visible = state
            .rows
            .iter()
            .filter(|r| in_partition(r, tenant_id, loan_type, dataset))
            .count();
        self.deletes.push((tenant_id, loan_type, dataset));
        Ok(visible as u64)
    }

    async fn insert(&mut self, records: &[RelationalRecord]) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.insert_calls += 1;
        if state.fail_insert {
            return Err(IngestError::Database(sqlx::Error::Protocol(
                "injected failure: relational insert".into(),
            )));
        }
        self.inserts.extend_from_slice(records);
        Ok(records.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            state,
            deletes,
            inserts,
        } = *self;
        let mut state = state.lock().await;
        if state.fail_commit {
            return Err(IngestError::Database(sqlx::Error::Protocol(
                "injected failure: relational commit".into(),
            )));
        }
        for (tenant_id, loan_type, dataset) in deletes {
            state
                .rows
                .retain(|r| !in_partition(r, tenant_id, loan_type, dataset));
        }
        state.rows.extend(inserts);
        state.commits += 1;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Analytical
// ----------------------------------------------------------------------------

#[derive(Default)]
struct AnalyticalState {
    databases: HashSet<String>,
    tables: BTreeMap<String, Vec<Vec<Value>>>,
    statements: Vec<String>,
    fail_prefixes: Vec<String>,
}

impl AnalyticalState {
    fn require(&self, table: &str) -> Result<()> {
        if self.tables.contains_key(table) {
            Ok(())
        } else {
            Err(IngestError::Analytical {
                status: 404,
                message: format!("Table {table} does not exist"),
            })
        }
    }
}

/// Analytical store keeping tables as row lists keyed by `db.table`
#[derive(Clone, Default)]
pub struct MemoryAnalytical {
    state: Arc<Mutex<AnalyticalState>>,
}

impl MemoryAnalytical {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement starting with `prefix` (e.g. `"EXCHANGE"`)
    pub async fn fail_on(&self, prefix: impl Into<String>) {
        self.state.lock().await.fail_prefixes.push(prefix.into());
    }

    /// Statements in execution order; inserts appear as `INSERT INTO db.table`
    pub async fn statements(&self) -> Vec<String> {
        self.state.lock().await.statements.clone()
    }

    pub async fn has_table(&self, database: &str, table: &str) -> bool {
        self.state
            .lock()
            .await
            .tables
            .contains_key(&format!("{database}.{table}"))
    }

    pub async fn table_rows(&self, database: &str, table: &str) -> Option<Vec<Vec<Value>>> {
        self.state
            .lock()
            .await
            .tables
            .get(&format!("{database}.{table}"))
            .cloned()
    }

    /// Tables of a database, sorted
    pub async fn table_names(&self, database: &str) -> Vec<String> {
        let prefix = format!("{database}.");
        self.state
            .lock()
            .await
            .tables
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Put a table in place as if an earlier run had published it
    pub async fn seed_table(&self, database: &str, table: &str, rows: Vec<Vec<Value>>) {
        let mut state = self.state.lock().await;
        state.databases.insert(database.to_string());
        state.tables.insert(format!("{database}.{table}"), rows);
    }
}

#[async_trait]
impl AnalyticalStore for MemoryAnalytical {
    async fn execute(&self, sql: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        let statement = sql.lines().next().unwrap_or_default().trim().to_string();
        state.statements.push(statement.clone());
        if state.fail_prefixes.iter().any(|p| statement.starts_with(p.as_str())) {
            return Err(injected(&statement));
        }

        let words: Vec<&str> = statement.split_whitespace().collect();
        match words.as_slice() {
            ["CREATE", "DATABASE", "IF", "NOT", "EXISTS", db] => {
                state.databases.insert((*db).to_string());
            }
            ["CREATE", "TABLE", name, ..] => {
                if state.tables.contains_key(*name) {
                    return Err(IngestError::Analytical {
                        status: 500,
                        message: format!("Table {name} already exists"),
                    });
                }
                state.tables.insert((*name).to_string(), Vec::new());
            }
            ["DROP", "TABLE", "IF", "EXISTS", name] => {
                state.tables.remove(*name);
            }
            ["EXISTS", "TABLE", name] => {
                let exists = state.tables.contains_key(*name);
                return Ok(if exists { "1\n" } else { "0\n" }.to_string());
            }
            ["RENAME", "TABLE", from, "TO", to] => {
                state.require(from)?;
                if state.tables.contains_key(*to) {
                    return Err(IngestError::Analytical {
                        status: 500,
                        message: format!("Table {to} already exists"),
                    });
                }
                if let Some(rows) = state.tables.remove(*from) {
                    state.tables.insert((*to).to_string(), rows);
                }
            }
            ["EXCHANGE", "TABLES", left, "AND", right] => {
                state.require(left)?;
                state.require(right)?;
                let left_rows = state.tables.remove(*left).unwrap_or_default();
                let right_rows = state.tables.remove(*right).unwrap_or_default();
                state.tables.insert((*left).to_string(), right_rows);
                state.tables.insert((*right).to_string(), left_rows);
            }
            _ => {}
        }
        Ok(String::new())
    }

    async fn insert_rows(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let name = format!("{database}.{table}");
        let statement = format!("INSERT INTO {name}");
        state.statements.push(statement.clone());
        if state.fail_prefixes.iter().any(|p| statement.starts_with(p.as_str())) {
            return Err(injected(&statement));
        }
        if rows.iter().any(|row| row.len() != columns.len()) {
            return Err(IngestError::Analytical {
                status: 400,
                message: format!("column count mismatch inserting into {name}"),
            });
        }

        state.require(&name)?;
        if let Some(existing) = state.tables.get_mut(&name) {
            existing.extend_from_slice(rows);
        }
        Ok(rows.len() as u64)
    }
}

// ----------------------------------------------------------------------------
// Batches
// ----------------------------------------------------------------------------

#[derive(Default)]
struct BatchState {
    tenants: Vec<Tenant>,
    batches: HashMap<Uuid, Batch>,
    errors: HashMap<Uuid, Vec<ValidationError>>,
    saves: Vec<(Uuid, Vec<BatchField>)>,
}

#[derive(Default)]
pub struct MemoryBatchStore {
    state: Mutex<BatchState>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant and return it
    pub async fn add_tenant(&self, code: &str, name: &str) -> Result<Tenant> {
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            code: TenantCode::parse(code)?,
        };
        self.state.lock().await.tenants.push(tenant.clone());
        Ok(tenant)
    }

    /// Every `save_fields` call as (batch id, fields)
    pub async fn saves(&self) -> Vec<(Uuid, Vec<BatchField>)> {
        self.state.lock().await.saves.clone()
    }

    pub async fn batch_count(&self) -> usize {
        self.state.lock().await.batches.len()
    }
}

#[async_trait]
impl BatchStore for MemoryBatchStore {
    async fn find_tenant(&self, code: &TenantCode) -> Result<Option<Tenant>> {
        let state = self.state.lock().await;
        Ok(state.tenants.iter().find(|t| &t.code == code).cloned())
    }

    async fn create(&self, tenant: &Tenant, loan_type: LoanType) -> Result<Batch> {
        let batch = Batch::new(tenant, loan_type);
        self.state
            .lock()
            .await
            .batches
            .insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn load(&self, id: Uuid) -> Result<Option<Batch>> {
        Ok(self.state.lock().await.batches.get(&id).cloned())
    }

    async fn save_fields(&self, batch: &Batch, fields: &[BatchField]) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .batches
            .get_mut(&batch.id)
            .ok_or(IngestError::BatchNotFound(batch.id))?;
        for field in fields {
            match field {
                BatchField::Status => stored.status = batch.status,
                BatchField::LoanType => stored.loan_type = batch.loan_type,
                BatchField::TotalRows => stored.total_rows = batch.total_rows,
                BatchField::ValidRows => stored.valid_rows = batch.valid_rows,
                BatchField::InvalidRows => stored.invalid_rows = batch.invalid_rows,
                BatchField::RecordCount => stored.record_count = batch.record_count,
                BatchField::StartedAt => stored.started_at = batch.started_at,
                BatchField::CompletedAt => stored.completed_at = batch.completed_at,
                BatchField::ErrorMessage => stored.error_message = batch.error_message.clone(),
            }
        }
        state.saves.push((batch.id, fields.to_vec()));
        Ok(())
    }

    async fn insert_errors(&self, batch_id: Uuid, errors: &[ValidationError]) -> Result<u64> {
        self.state
            .lock()
            .await
            .errors
            .entry(batch_id)
            .or_default()
            .extend_from_slice(errors);
        Ok(errors.len() as u64)
    }

    async fn list_errors(&self, batch_id: Uuid, limit: Option<i64>) -> Result<Vec<ValidationError>> {
        let state = self.state.lock().await;
        let mut errors = state.errors.get(&batch_id).cloned().unwrap_or_default();
        errors.sort_by_key(|e| e.row_number);
        if let Some(limit) = limit {
            errors.truncate(limit.max(0) as usize);
        }
        Ok(errors)
    }
}
