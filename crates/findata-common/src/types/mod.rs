//! Common types used across the adapter
//!
//! These discriminators partition every dataset and destination table. They are
//! parsed from caller input exactly once; malformed input is an
//! [`Error::InvalidArgument`] and never reaches the pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Loan portfolio a dataset belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanType {
    Retail,
    Commercial,
}

impl LoanType {
    pub const ALL: [LoanType; 2] = [LoanType::Retail, LoanType::Commercial];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanType::Retail => "RETAIL",
            LoanType::Commercial => "COMMERCIAL",
        }
    }

    /// Lowercase suffix used in analytical table names
    pub fn table_suffix(&self) -> &'static str {
        match self {
            LoanType::Retail => "retail",
            LoanType::Commercial => "commercial",
        }
    }
}

impl std::str::FromStr for LoanType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "RETAIL" => Ok(LoanType::Retail),
            "COMMERCIAL" => Ok(LoanType::Commercial),
            _ => Err(Error::InvalidArgument(
                "loan_type must be RETAIL or COMMERCIAL".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for LoanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of an ingested dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetKind {
    /// Loan master data
    #[default]
    Credit,
    /// Installment schedule rows referencing a credit by loan id
    PaymentPlan,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Credit, DatasetKind::PaymentPlan];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Credit => "CREDIT",
            DatasetKind::PaymentPlan => "PAYMENT_PLAN",
        }
    }

    /// Parse an optional textual kind, falling back to CREDIT when absent or blank
    pub fn parse_or_default(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(DatasetKind::default()),
            Some(s) => s.parse(),
        }
    }
}

impl std::str::FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "CREDIT" => Ok(DatasetKind::Credit),
            "PAYMENT_PLAN" => Ok(DatasetKind::PaymentPlan),
            _ => Err(Error::InvalidArgument(
                "dataset_type must be CREDIT or PAYMENT_PLAN".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized tenant code (trimmed, upper-cased, non-empty), e.g. `BANK001`
///
/// Only ASCII letters, digits and `_` are accepted: the code becomes part of
/// analytical database names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct TenantCode(String);

impl TenantCode {
    pub fn parse(value: &str) -> Result<Self> {
        let code = value.trim().to_uppercase();
        if code.is_empty() {
            return Err(Error::InvalidArgument("tenant_id is required".to_string()));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::InvalidArgument(format!(
                "tenant_id may only contain letters, digits and '_': {}",
                value.trim()
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used for per-tenant analytical databases
    pub fn schema_key(&self) -> String {
        self.0.to_lowercase()
    }
}

impl TryFrom<String> for TenantCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl std::fmt::Display for TenantCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
