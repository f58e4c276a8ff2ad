//! Relational system of record
//!
//! The load pass replaces a whole `(tenant, loan type, dataset)` partition
//! inside one transaction. Dropping a [`RelationalTransaction`] without
//! committing rolls everything back.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use findata_common::{DatasetKind, LoanType};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::normalize::Category;
use crate::raw::RawRow;
use crate::schema::LOAN_REFERENCE_FIELD;
use crate::validate::NormalizedRecord;

/// PostgreSQL caps bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Row of `loans`
#[derive(Debug, Clone, PartialEq)]
pub struct LoanRow {
    pub tenant_id: Uuid,
    pub external_id: String,
    pub loan_type: LoanType,
    pub amount: BigDecimal,
    pub interest_rate: BigDecimal,
    pub customer_name: String,
    pub is_active: bool,
    pub batch_id: Uuid,
}

/// Row of `loan_payment_plans`
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentPlanRow {
    pub tenant_id: Uuid,
    pub loan_type: LoanType,
    pub loan_external_id: String,
    pub installment_number: i64,
    pub scheduled_payment_date: NaiveDate,
    pub installment_amount: BigDecimal,
    /// Source row as received
    pub payload: serde_json::Value,
    pub batch_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationalRecord {
    Loan(LoanRow),
    PaymentPlan(PaymentPlanRow),
}

/// Who and what a relational row belongs to
#[derive(Debug, Clone, Copy)]
pub struct Ownership {
    pub tenant_id: Uuid,
    pub batch_id: Uuid,
    pub loan_type: LoanType,
}

impl RelationalRecord {
    /// Map a validated record onto its relational row
    ///
    /// Returns `None` when a column the table requires is null, which cannot
    /// happen for records that passed validation.
    pub fn from_record(
        dataset: DatasetKind,
        owner: Ownership,
        record: &NormalizedRecord,
        raw: &RawRow,
    ) -> Option<Self> {
        let external_id = record.text(LOAN_REFERENCE_FIELD)?.to_string();

        match dataset {
            DatasetKind::Credit => Some(RelationalRecord::Loan(LoanRow {
                tenant_id: owner.tenant_id,
                external_id,
                loan_type: owner.loan_type,
                amount: record
                    .decimal("original_loan_amount")
                    .cloned()
                    .unwrap_or_default(),
                interest_rate: record
                    .decimal("nominal_interest_rate")
                    .cloned()
                    .unwrap_or_default(),
                customer_name: record
                    .text("customer_id")
                    .unwrap_or("Customer")
                    .to_string(),
                is_active: record.category("loan_status_code") == Some(Category::Active),
                batch_id: owner.batch_id,
            })),
            DatasetKind::PaymentPlan => Some(RelationalRecord::PaymentPlan(PaymentPlanRow {
                tenant_id: owner.tenant_id,
                loan_type: owner.loan_type,
                loan_external_id: external_id,
                installment_number: record.int("installment_number")?,
                scheduled_payment_date: record.date("scheduled_payment_date")?,
                installment_amount: record.decimal("installment_amount")?.clone(),
                payload: raw.to_json(),
                batch_id: owner.batch_id,
            })),
        }
    }
}

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RelationalTransaction>>;
}

/// One all-or-nothing unit of work against the relational store
#[async_trait]
pub trait RelationalTransaction: Send {
    /// Delete every row of the partition, returning the number removed
    async fn delete_partition(
        &mut self,
        tenant_id: Uuid,
        loan_type: LoanType,
        dataset: DatasetKind,
    ) -> Result<u64>;

    async fn insert(&mut self, records: &[RelationalRecord]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[derive(Clone)]
pub struct PgRelationalStore {
    pool: PgPool,
}

impl PgRelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelationalStore for PgRelationalStore {
    async fn begin(&self) -> Result<Box<dyn RelationalTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRelationalTransaction { tx }))
    }
}

pub struct PgRelationalTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgRelationalTransaction {
    async fn insert_loans(&mut self, loans: &[&LoanRow]) -> Result<u64> {
        let mut written = 0;
        for chunk in loans.chunks(MAX_BIND_PARAMS / 8) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO loans (
                    tenant_id, external_id, loan_type, amount,
                    interest_rate, customer_name, is_active, batch_id
                )
                "#,
            );
            query_builder.push_values(chunk, |mut b, loan| {
                b.push_bind(loan.tenant_id)
                    .push_bind(loan.external_id.clone())
                    .push_bind(loan.loan_type.as_str())
                    .push_bind(loan.amount.clone())
                    .push_bind(loan.interest_rate.clone())
                    .push_bind(loan.customer_name.clone())
                    .push_bind(loan.is_active)
                    .push_bind(loan.batch_id);
            });
            written += query_builder
                .build()
                .execute(&mut *self.tx)
                .await?
                .rows_affected();
        }
        Ok(written)
    }

    async fn insert_plans(&mut self, plans: &[&PaymentPlanRow]) -> Result<u64> {
        let mut written = 0;
        for chunk in plans.chunks(MAX_BIND_PARAMS / 8) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"
                INSERT INTO loan_payment_plans (
                    tenant_id, loan_type, loan_external_id, installment_number,
                    scheduled_payment_date, installment_amount, payload, batch_id
                )
                "#,
            );
            query_builder.push_values(chunk, |mut b, plan| {
                b.push_bind(plan.tenant_id)
                    .push_bind(plan.loan_type.as_str())
                    .push_bind(plan.loan_external_id.clone())
                    .push_bind(plan.installment_number)
                    .push_bind(plan.scheduled_payment_date)
                    .push_bind(plan.installment_amount.clone())
                    .push_bind(plan.payload.clone())
                    .push_bind(plan.batch_id);
            });
            written += query_builder
                .build()
                .execute(&mut *self.tx)
                .await?
                .rows_affected();
        }
        Ok(written)
    }
}

#[async_trait]
impl RelationalTransaction for PgRelationalTransaction {
    async fn delete_partition(
        &mut self,
        tenant_id: Uuid,
        loan_type: LoanType,
        dataset: DatasetKind,
    ) -> Result<u64> {
        let sql = match dataset {
            DatasetKind::Credit => "DELETE FROM loans WHERE tenant_id = $1 AND loan_type = $2",
            DatasetKind::PaymentPlan => {
                "DELETE FROM loan_payment_plans WHERE tenant_id = $1 AND loan_type = $2"
            }
        };
        let deleted = sqlx::query(sql)
            .bind(tenant_id)
            .bind(loan_type.as_str())
            .execute(&mut *self.tx)
            .await?
            .rows_affected();
        debug!(%tenant_id, %loan_type, %dataset, deleted, "Cleared relational partition");
        Ok(deleted)
    }

    async fn insert(&mut self, records: &[RelationalRecord]) -> Result<u64> {
        let mut loans = Vec::new();
        let mut plans = Vec::new();
        for record in records {
            match record {
                RelationalRecord::Loan(loan) => loans.push(loan),
                RelationalRecord::PaymentPlan(plan) => plans.push(plan),
            }
        }

        let mut written = 0;
        if !loans.is_empty() {
            written += self.insert_loans(&loans).await?;
        }
        if !plans.is_empty() {
            written += self.insert_plans(&plans).await?;
        }
        Ok(written)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
