//! Field specifications for the two dataset kinds
//!
//! The registry is a plain lookup table built once at startup and shared
//! (usually behind an `Arc`) by everything that validates or lays out rows.
//! Derived views are computed on demand from the static field lists.

use std::collections::HashMap;

use findata_common::DatasetKind;

use crate::destination::analytical::ColumnDef;
use crate::error::{IngestError, Result};

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Integer,
    Decimal,
    /// Fraction in `[0, 1]` after normalization (12.5% -> 0.125)
    Rate,
    Date,
    Category,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Decimal | FieldType::Rate)
    }

    pub fn is_categorical(self) -> bool {
        matches!(self, FieldType::String | FieldType::Category)
    }

    /// Column type on the analytical store, before nullability
    pub fn analytical_type(self) -> &'static str {
        match self {
            FieldType::String | FieldType::Category => "String",
            FieldType::Integer => "Int64",
            FieldType::Decimal => "Decimal(18,2)",
            FieldType::Rate => "Decimal(9,6)",
            FieldType::Date => "Date",
        }
    }

    /// Fractional digits kept by the analytical column
    pub fn scale(self) -> Option<i64> {
        match self {
            FieldType::Decimal => Some(2),
            FieldType::Rate => Some(6),
            _ => None,
        }
    }
}

/// One declared field of a dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl FieldSpec {
    const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            min: None,
            max: None,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn non_negative(mut self) -> Self {
        self.min = Some(0);
        self
    }

    const fn at_most(mut self, max: i64) -> Self {
        self.max = Some(max);
        self
    }
}

use FieldType::{Category, Date, Decimal, Integer, Rate, String as Str};

/// Loan master data
pub const CREDIT_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("loan_account_number", Str).required(),
    FieldSpec::new("customer_type", Category),
    FieldSpec::new("customer_id", Str),
    FieldSpec::new("loan_product_type", Str),
    FieldSpec::new("loan_status_code", Category).required(),
    FieldSpec::new("loan_status_flag", Category),
    FieldSpec::new("days_past_due", Integer).non_negative(),
    FieldSpec::new("final_maturity_date", Date),
    FieldSpec::new("total_installment_count", Integer).non_negative(),
    FieldSpec::new("outstanding_installment_count", Integer).non_negative(),
    FieldSpec::new("paid_installment_count", Integer).non_negative(),
    FieldSpec::new("first_payment_date", Date),
    FieldSpec::new("original_loan_amount", Decimal).required().non_negative(),
    FieldSpec::new("outstanding_principal_balance", Decimal).non_negative(),
    FieldSpec::new("nominal_interest_rate", Rate).non_negative(),
    FieldSpec::new("total_interest_amount", Decimal).non_negative(),
    FieldSpec::new("kkdf_rate", Rate).non_negative(),
    FieldSpec::new("kkdf_amount", Decimal).non_negative(),
    FieldSpec::new("bsmv_rate", Rate).non_negative(),
    FieldSpec::new("bsmv_amount", Decimal).non_negative(),
    FieldSpec::new("grace_period_months", Integer).non_negative(),
    FieldSpec::new("installment_frequency", Integer).non_negative(),
    FieldSpec::new("loan_start_date", Date).required(),
    FieldSpec::new("loan_closing_date", Date),
    FieldSpec::new("customer_region_code", Str),
    FieldSpec::new("sector_code", Str),
    FieldSpec::new("internal_credit_rating", Str),
    FieldSpec::new("default_probability", Rate).non_negative().at_most(1),
    FieldSpec::new("risk_class", Str),
    FieldSpec::new("customer_segment", Str),
    FieldSpec::new("internal_rating", Str),
    FieldSpec::new("external_rating", Str),
    FieldSpec::new("insurance_included", Category),
];

/// Installment schedule rows
pub const PAYMENT_PLAN_FIELDS: &[FieldSpec] = &[
    FieldSpec::new("loan_account_number", Str).required(),
    FieldSpec::new("installment_number", Integer).required().non_negative(),
    FieldSpec::new("actual_payment_date", Date),
    FieldSpec::new("scheduled_payment_date", Date).required(),
    FieldSpec::new("installment_amount", Decimal).required().non_negative(),
    FieldSpec::new("principal_component", Decimal).non_negative(),
    FieldSpec::new("interest_component", Decimal).non_negative(),
    FieldSpec::new("kkdf_component", Decimal).non_negative(),
    FieldSpec::new("bsmv_component", Decimal).non_negative(),
    FieldSpec::new("installment_status", Category),
    FieldSpec::new("remaining_principal", Decimal).non_negative(),
    FieldSpec::new("remaining_interest", Decimal).non_negative(),
    FieldSpec::new("remaining_kkdf", Decimal).non_negative(),
    FieldSpec::new("remaining_bsmv", Decimal).non_negative(),
];

/// Field carrying the external loan id in both datasets
pub const LOAN_REFERENCE_FIELD: &str = "loan_account_number";

/// Columns appended to every analytical table after the declared fields
pub const INJECTED_COLUMNS: [&str; 2] = ["batch_id", "loan_type"];

/// Lookup table of field specifications keyed by dataset kind
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<DatasetKind, &'static [FieldSpec]>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let schemas = HashMap::from([
            (DatasetKind::Credit, CREDIT_FIELDS),
            (DatasetKind::PaymentPlan, PAYMENT_PLAN_FIELDS),
        ]);
        Self { schemas }
    }

    /// Ordered field list for a dataset kind
    pub fn schema_for(&self, kind: DatasetKind) -> Result<&'static [FieldSpec]> {
        self.schemas.get(&kind).copied().ok_or_else(|| {
            IngestError::InvalidArgument("dataset_type must be CREDIT or PAYMENT_PLAN".into())
        })
    }

    /// Same as [`schema_for`](Self::schema_for) with a textual kind
    pub fn schema_for_name(&self, kind: &str) -> Result<&'static [FieldSpec]> {
        let kind: DatasetKind = kind.parse()?;
        self.schema_for(kind)
    }

    pub fn field_names(&self, kind: DatasetKind) -> Result<Vec<&'static str>> {
        Ok(self.schema_for(kind)?.iter().map(|f| f.name).collect())
    }

    /// Integer, decimal and rate fields
    pub fn numeric_fields(&self, kind: DatasetKind) -> Result<Vec<&'static str>> {
        Ok(self
            .schema_for(kind)?
            .iter()
            .filter(|f| f.field_type.is_numeric())
            .map(|f| f.name)
            .collect())
    }

    /// String and category fields
    pub fn categorical_fields(&self, kind: DatasetKind) -> Result<Vec<&'static str>> {
        Ok(self
            .schema_for(kind)?
            .iter()
            .filter(|f| f.field_type.is_categorical())
            .map(|f| f.name)
            .collect())
    }

    /// Declared fields laid out as analytical columns, followed by the
    /// injected `batch_id` and `loan_type` columns
    pub fn analytical_columns(&self, kind: DatasetKind) -> Result<Vec<ColumnDef>> {
        let mut columns: Vec<ColumnDef> = self
            .schema_for(kind)?
            .iter()
            .map(|f| {
                let base = f.field_type.analytical_type();
                let column_type = if f.required {
                    base.to_string()
                } else {
                    format!("Nullable({base})")
                };
                ColumnDef {
                    name: f.name.to_string(),
                    column_type,
                    scale: f.field_type.scale(),
                }
            })
            .collect();

        columns.extend(INJECTED_COLUMNS.iter().map(|name| ColumnDef {
            name: (*name).to_string(),
            column_type: "String".to_string(),
            scale: None,
        }));

        Ok(columns)
    }

    /// Fields identifying a row within one `(tenant, loan type)` partition
    pub fn natural_key(&self, kind: DatasetKind) -> &'static [&'static str] {
        match kind {
            DatasetKind::Credit => &["loan_account_number"],
            DatasetKind::PaymentPlan => &["loan_account_number", "installment_number"],
        }
    }

    /// Natural ordering key of the analytical table
    pub fn order_by(&self, kind: DatasetKind) -> &'static [&'static str] {
        match kind {
            DatasetKind::Credit => &["loan_type", "loan_account_number"],
            DatasetKind::PaymentPlan => &["loan_type", "loan_account_number", "installment_number"],
        }
    }
}
