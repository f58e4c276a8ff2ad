//! Row validation and normalization
//!
//! [`validate_row`] applies a field list to one raw row and returns the typed
//! record together with every problem found. Problems never abort the row:
//! each declared field is always present in the record, holding either its
//! normalized value or [`NormalizedValue::Null`].
//!
//! [`RowValidator`] adds the payment-plan loan reference check on top, using
//! the set of known credit ids for the run. [`KeyTracker`] flags rows that
//! repeat the natural key of an earlier row in the same pass.

use std::collections::{BTreeMap, HashMap, HashSet};

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use findata_common::LoanType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::normalize::{self, Category};
use crate::raw::{RawRow, RawValue};
use crate::schema::{FieldSpec, FieldType, LOAN_REFERENCE_FIELD};

/// Row-level error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    MissingField,
    InvalidIntFormat,
    InvalidDecimalFormat,
    InvalidRateFormat,
    InvalidDateFormat,
    InvalidCategory,
    OutOfRange,
    UnknownLoanId,
    DuplicateKey,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingField => "MISSING_FIELD",
            ErrorKind::InvalidIntFormat => "INVALID_INT_FORMAT",
            ErrorKind::InvalidDecimalFormat => "INVALID_DECIMAL_FORMAT",
            ErrorKind::InvalidRateFormat => "INVALID_RATE_FORMAT",
            ErrorKind::InvalidDateFormat => "INVALID_DATE_FORMAT",
            ErrorKind::InvalidCategory => "INVALID_CATEGORY",
            ErrorKind::OutOfRange => "OUT_OF_RANGE",
            ErrorKind::UnknownLoanId => "UNKNOWN_LOAN_ID",
            ErrorKind::DuplicateKey => "DUPLICATE_KEY",
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "MISSING_FIELD" => Ok(ErrorKind::MissingField),
            "INVALID_INT_FORMAT" => Ok(ErrorKind::InvalidIntFormat),
            "INVALID_DECIMAL_FORMAT" => Ok(ErrorKind::InvalidDecimalFormat),
            "INVALID_RATE_FORMAT" => Ok(ErrorKind::InvalidRateFormat),
            "INVALID_DATE_FORMAT" => Ok(ErrorKind::InvalidDateFormat),
            "INVALID_CATEGORY" => Ok(ErrorKind::InvalidCategory),
            "OUT_OF_RANGE" => Ok(ErrorKind::OutOfRange),
            "UNKNOWN_LOAN_ID" => Ok(ErrorKind::UnknownLoanId),
            "DUPLICATE_KEY" => Ok(ErrorKind::DuplicateKey),
            other => Err(format!("unknown error code: {other}")),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem with one field of one row, before it is attributed to a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ErrorKind,
    pub field: Option<&'static str>,
    pub message: String,
}

impl Violation {
    fn new(kind: ErrorKind, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: Some(field),
            message: message.into(),
        }
    }
}

/// Row-level error persisted on the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// 1-based position in the source ordering
    pub row_number: u64,
    pub kind: ErrorKind,
    pub field: Option<String>,
    pub message: String,
    /// Snapshot of the offending source row
    pub raw: serde_json::Value,
}

/// Typed value of one field after normalization
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Null,
    Text(String),
    Int(i64),
    Decimal(BigDecimal),
    Date(NaiveDate),
    Category(Category),
}

impl NormalizedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, NormalizedValue::Null)
    }

    fn as_decimal(&self) -> Option<BigDecimal> {
        match self {
            NormalizedValue::Int(i) => Some(BigDecimal::from(*i)),
            NormalizedValue::Decimal(d) => Some(d.clone()),
            _ => None,
        }
    }
}

static NULL: NormalizedValue = NormalizedValue::Null;

/// Every declared field of a row mapped to its typed value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    values: BTreeMap<&'static str, NormalizedValue>,
    pub batch_id: Option<Uuid>,
    pub loan_type: Option<LoanType>,
}

impl NormalizedRecord {
    /// Undeclared fields read as null
    pub fn get(&self, field: &str) -> &NormalizedValue {
        self.values.get(field).unwrap_or(&NULL)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.get(field) {
            NormalizedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, field: &str) -> Option<i64> {
        match self.get(field) {
            NormalizedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn decimal(&self, field: &str) -> Option<&BigDecimal> {
        match self.get(field) {
            NormalizedValue::Decimal(d) => Some(d),
            _ => None,
        }
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        match self.get(field) {
            NormalizedValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn category(&self, field: &str) -> Option<Category> {
        match self.get(field) {
            NormalizedValue::Category(c) => Some(*c),
            _ => None,
        }
    }

    /// Attach the run's batch id and loan type
    pub fn stamp(&mut self, batch_id: Uuid, loan_type: LoanType) {
        self.batch_id = Some(batch_id);
        self.loan_type = Some(loan_type);
    }

    fn set(&mut self, field: &'static str, value: NormalizedValue) {
        self.values.insert(field, value);
    }
}

/// Validate and normalize one row against a field list
pub fn validate_row(raw: &RawRow, fields: &[FieldSpec]) -> (NormalizedRecord, Vec<Violation>) {
    let mut record = NormalizedRecord::default();
    let mut violations = Vec::new();

    for spec in fields {
        let value = raw.get(spec.name);

        if value.is_empty() {
            if spec.required {
                violations.push(Violation::new(ErrorKind::MissingField, spec.name, "Field is required."));
            }
            record.set(spec.name, NormalizedValue::Null);
            continue;
        }

        let normalized = normalize_field(spec, value, &mut violations);
        if let Some(number) = normalized.as_decimal() {
            check_bounds(spec, &number, value, &mut violations);
        }
        record.set(spec.name, normalized);
    }

    (record, violations)
}

fn normalize_field(
    spec: &FieldSpec,
    value: &RawValue,
    violations: &mut Vec<Violation>,
) -> NormalizedValue {
    let shown = value.to_text().unwrap_or_default();
    let name = spec.name;

    match spec.field_type {
        FieldType::String => match normalize::string(value) {
            Some(s) => NormalizedValue::Text(s),
            None => {
                if spec.required {
                    violations.push(Violation::new(ErrorKind::MissingField, name, "Field is required."));
                }
                NormalizedValue::Null
            }
        },
        FieldType::Integer => match normalize::integer(value) {
            Some(i) => NormalizedValue::Int(i),
            None => {
                violations.push(Violation::new(
                    ErrorKind::InvalidIntFormat,
                    name,
                    format!("Invalid integer: {shown}"),
                ));
                NormalizedValue::Null
            }
        },
        FieldType::Decimal => match normalize::decimal(value) {
            Some(d) => NormalizedValue::Decimal(d),
            None => {
                violations.push(Violation::new(
                    ErrorKind::InvalidDecimalFormat,
                    name,
                    format!("Invalid decimal: {shown}"),
                ));
                NormalizedValue::Null
            }
        },
        FieldType::Rate => match normalize::rate(value) {
            Some(d) => NormalizedValue::Decimal(d),
            None => {
                violations.push(Violation::new(
                    ErrorKind::InvalidRateFormat,
                    name,
                    format!("Invalid rate: {shown}"),
                ));
                NormalizedValue::Null
            }
        },
        FieldType::Date => match normalize::date(value) {
            Some(d) => NormalizedValue::Date(d),
            None => {
                violations.push(Violation::new(
                    ErrorKind::InvalidDateFormat,
                    name,
                    format!("Invalid date: {shown}"),
                ));
                NormalizedValue::Null
            }
        },
        FieldType::Category => {
            let category = normalize::category(value);
            if spec.required && category == Category::Unknown {
                violations.push(Violation::new(
                    ErrorKind::InvalidCategory,
                    name,
                    format!("Unknown category: {shown}"),
                ));
            }
            NormalizedValue::Category(category)
        }
    }
}

fn check_bounds(spec: &FieldSpec, number: &BigDecimal, raw: &RawValue, violations: &mut Vec<Violation>) {
    let shown = raw.to_text().unwrap_or_default();

    if let Some(min) = spec.min {
        if *number < BigDecimal::from(min) {
            violations.push(Violation::new(
                ErrorKind::OutOfRange,
                spec.name,
                format!("Value below minimum: {shown}"),
            ));
        }
    }
    if let Some(max) = spec.max {
        if *number > BigDecimal::from(max) {
            violations.push(Violation::new(
                ErrorKind::OutOfRange,
                spec.name,
                format!("Value above maximum: {shown}"),
            ));
        }
    }
}

/// Payment-plan rows must reference a loan id present in the credit dataset
pub fn check_loan_reference(record: &NormalizedRecord, known_ids: &HashSet<String>) -> Option<Violation> {
    match record.text(LOAN_REFERENCE_FIELD) {
        Some(id) if known_ids.contains(id) => None,
        _ => Some(Violation::new(
            ErrorKind::UnknownLoanId,
            LOAN_REFERENCE_FIELD,
            "Payment plan references unknown loan_account_number.",
        )),
    }
}

/// Natural keys seen so far in one pass over the source
#[derive(Debug)]
pub struct KeyTracker {
    fields: &'static [&'static str],
    seen: HashMap<Vec<String>, u64>,
}

impl KeyTracker {
    pub fn new(fields: &'static [&'static str]) -> Self {
        Self {
            fields,
            seen: HashMap::new(),
        }
    }

    /// Record the key of a row; a repeat of an earlier row's key is a
    /// violation. Rows with a null key part are skipped, they already carry
    /// a MISSING_FIELD or format error.
    pub fn observe(&mut self, record: &NormalizedRecord, row_number: u64) -> Option<Violation> {
        let key = self
            .fields
            .iter()
            .map(|field| match record.get(field) {
                NormalizedValue::Text(s) => Some(s.clone()),
                NormalizedValue::Int(i) => Some(i.to_string()),
                _ => None,
            })
            .collect::<Option<Vec<String>>>()?;

        match self.seen.get(&key) {
            Some(first) => Some(Violation::new(
                ErrorKind::DuplicateKey,
                self.fields.first().copied().unwrap_or(LOAN_REFERENCE_FIELD),
                format!("Duplicate of row {first}: {}", key.join(" / ")),
            )),
            None => {
                self.seen.insert(key, row_number);
                None
            }
        }
    }
}

/// Outcome of validating one row
#[derive(Debug, Clone)]
pub struct RowCheck {
    pub record: NormalizedRecord,
    pub violations: Vec<Violation>,
}

impl RowCheck {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Attribute the violations to a row
    pub fn to_errors(&self, row_number: u64, raw: &RawRow) -> Vec<ValidationError> {
        let snapshot = raw.to_json();
        self.violations
            .iter()
            .map(|v| ValidationError {
                row_number,
                kind: v.kind,
                field: v.field.map(str::to_string),
                message: v.message.clone(),
                raw: snapshot.clone(),
            })
            .collect()
    }
}

/// Field list plus, for payment plans, the known credit ids of the run
#[derive(Debug, Clone, Copy)]
pub struct RowValidator<'a> {
    fields: &'a [FieldSpec],
    known_loan_ids: Option<&'a HashSet<String>>,
}

impl<'a> RowValidator<'a> {
    pub fn new(fields: &'a [FieldSpec], known_loan_ids: Option<&'a HashSet<String>>) -> Self {
        Self {
            fields,
            known_loan_ids,
        }
    }

    /// The reference check runs whether or not the row has other errors
    pub fn check(&self, raw: &RawRow) -> RowCheck {
        let (record, mut violations) = validate_row(raw, self.fields);
        if let Some(known) = self.known_loan_ids {
            violations.extend(check_loan_reference(&record, known));
        }
        RowCheck { record, violations }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::{CREDIT_FIELDS, PAYMENT_PLAN_FIELDS};
    use std::str::FromStr;

    fn credit_row() -> RawRow {
        RawRow::new()
            .with("loan_account_number", "L1")
            .with("loan_status_code", "A")
            .with("loan_start_date", "2025-01-01")
            .with("original_loan_amount", "1000")
    }

    fn plan_row(loan: &str) -> RawRow {
        RawRow::new()
            .with("loan_account_number", loan)
            .with("installment_number", "1")
            .with("scheduled_payment_date", "20250201")
            .with("installment_amount", "125,50")
    }

    fn kinds(violations: &[Violation]) -> Vec<ErrorKind> {
        violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_minimal_credit_row() {
        let (record, violations) = validate_row(&credit_row(), CREDIT_FIELDS);

        assert!(violations.is_empty(), "{violations:?}");
        assert_eq!(record.category("loan_status_code"), Some(Category::Active));
        assert_eq!(record.date("loan_start_date"), NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(
            record.decimal("original_loan_amount"),
            Some(&BigDecimal::from_str("1000.00").unwrap())
        );
        assert_eq!(record.len(), CREDIT_FIELDS.len());
        assert!(record.get("days_past_due").is_null());
        assert!(record.contains("insurance_included"));
    }

    #[test]
    fn test_missing_required_field() {
        let mut row = credit_row();
        row.insert("loan_start_date", "");
        let (record, violations) = validate_row(&row, CREDIT_FIELDS);

        assert_eq!(kinds(&violations), vec![ErrorKind::MissingField]);
        assert_eq!(violations[0].field, Some("loan_start_date"));
        assert!(record.get("loan_start_date").is_null());
    }

    #[test]
    fn test_blank_required_string_is_missing() {
        let row = credit_row().with("loan_account_number", "   ");
        let (_, violations) = validate_row(&row, CREDIT_FIELDS);
        assert_eq!(kinds(&violations), vec![ErrorKind::MissingField]);
    }

    #[test]
    fn test_format_errors() {
        let row = credit_row()
            .with("days_past_due", "soon")
            .with("outstanding_principal_balance", "lots")
            .with("kkdf_rate", "n/a")
            .with("final_maturity_date", "31-31-2031");
        let (record, violations) = validate_row(&row, CREDIT_FIELDS);

        assert_eq!(
            kinds(&violations),
            vec![
                ErrorKind::InvalidIntFormat,
                ErrorKind::InvalidDateFormat,
                ErrorKind::InvalidDecimalFormat,
                ErrorKind::InvalidRateFormat,
            ]
        );
        assert_eq!(violations[0].message, "Invalid integer: soon");
        assert!(record.get("days_past_due").is_null());
    }

    #[test]
    fn test_exponent_values_are_format_errors() {
        let row = credit_row()
            .with("days_past_due", "1e200000000")
            .with("outstanding_principal_balance", "5E3");
        let (record, violations) = validate_row(&row, CREDIT_FIELDS);

        assert_eq!(
            kinds(&violations),
            vec![ErrorKind::InvalidIntFormat, ErrorKind::InvalidDecimalFormat]
        );
        assert!(record.get("days_past_due").is_null());
        assert!(record.get("outstanding_principal_balance").is_null());
    }

    #[test]
    fn test_unknown_category() {
        let row = credit_row()
            .with("loan_status_code", "frozen")
            .with("customer_type", "frozen");
        let (record, violations) = validate_row(&row, CREDIT_FIELDS);

        // only the required category is an error
        assert_eq!(kinds(&violations), vec![ErrorKind::InvalidCategory]);
        assert_eq!(violations[0].field, Some("loan_status_code"));
        assert_eq!(record.category("customer_type"), Some(Category::Unknown));
    }

    #[test]
    fn test_out_of_range_keeps_value() {
        let row = credit_row()
            .with("days_past_due", "-5")
            .with("default_probability", "1.5");
        let (record, violations) = validate_row(&row, CREDIT_FIELDS);

        // 1.5 reads as 1.5% and stays in range
        assert_eq!(kinds(&violations), vec![ErrorKind::OutOfRange]);
        assert_eq!(violations[0].message, "Value below minimum: -5");
        assert_eq!(record.int("days_past_due"), Some(-5));
        assert_eq!(
            record.decimal("default_probability"),
            Some(&BigDecimal::from_str("0.015").unwrap())
        );
    }

    #[test]
    fn test_probability_above_one() {
        let row = credit_row().with("default_probability", "150%");
        let (_, violations) = validate_row(&row, CREDIT_FIELDS);
        assert_eq!(kinds(&violations), vec![ErrorKind::OutOfRange]);
        assert_eq!(violations[0].message, "Value above maximum: 150%");
    }

    #[test]
    fn test_unknown_loan_reference() {
        let known: HashSet<String> = ["L1".to_string()].into();
        let validator = RowValidator::new(PAYMENT_PLAN_FIELDS, Some(&known));

        assert!(validator.check(&plan_row("L1")).is_valid());

        let check = validator.check(&plan_row("L404"));
        assert_eq!(kinds(&check.violations), vec![ErrorKind::UnknownLoanId]);
    }

    #[test]
    fn test_reference_checked_alongside_other_errors() {
        let known: HashSet<String> = HashSet::new();
        let validator = RowValidator::new(PAYMENT_PLAN_FIELDS, Some(&known));
        let row = RawRow::new().with("installment_number", "x");

        let check = validator.check(&row);
        let kinds = kinds(&check.violations);
        assert!(kinds.contains(&ErrorKind::MissingField));
        assert!(kinds.contains(&ErrorKind::InvalidIntFormat));
        assert_eq!(kinds.last(), Some(&ErrorKind::UnknownLoanId));
    }

    #[test]
    fn test_repeated_natural_key() {
        let mut keys = KeyTracker::new(&["loan_account_number", "installment_number"]);
        let record = |loan: &str, installment: &str| {
            let row = plan_row(loan).with("installment_number", installment);
            validate_row(&row, PAYMENT_PLAN_FIELDS).0
        };

        assert!(keys.observe(&record("L1", "1"), 1).is_none());
        assert!(keys.observe(&record("L1", "2"), 2).is_none());
        assert!(keys.observe(&record("L2", "1"), 3).is_none());

        let duplicate = keys.observe(&record("L1", "2"), 4).unwrap();
        assert_eq!(duplicate.kind, ErrorKind::DuplicateKey);
        assert_eq!(duplicate.field, Some("loan_account_number"));
        assert_eq!(duplicate.message, "Duplicate of row 2: L1 / 2");

        // Null key parts are left to the field checks
        assert!(keys.observe(&record("L1", ""), 5).is_none());
        assert!(keys.observe(&record("L1", ""), 6).is_none());
    }

    #[test]
    fn test_errors_carry_row_and_snapshot() {
        let validator = RowValidator::new(CREDIT_FIELDS, None);
        let row = credit_row().with("original_loan_amount", "-1");
        let check = validator.check(&row);
        let errors = check.to_errors(7, &row);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 7);
        assert_eq!(errors[0].field.as_deref(), Some("original_loan_amount"));
        assert_eq!(errors[0].raw["loan_account_number"], "L1");
    }

    #[test]
    fn test_error_kind_round_trips_through_text() {
        for kind in [
            ErrorKind::MissingField,
            ErrorKind::UnknownLoanId,
            ErrorKind::OutOfRange,
            ErrorKind::DuplicateKey,
        ] {
            assert_eq!(ErrorKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }
}
