use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{SiftError, SiftResult};
use crate::parse::{parse_bool, try_parse_amount, try_parse_date, ParseWarning};
use crate::router::RecordKind;
use crate::table::{CanonicalField, NormalizedRow};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapitalCallRecord {
    pub fund_id: i64,
    pub call_date: Option<NaiveDate>,
    pub call_type: String,
    pub amount: f64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionRecord {
    pub fund_id: i64,
    pub distribution_date: Option<NaiveDate>,
    pub distribution_type: String,
    pub is_recallable: bool,
    /// Always non-negative
    pub amount: f64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentRecord {
    pub fund_id: i64,
    pub adjustment_date: Option<NaiveDate>,
    pub adjustment_type: String,
    pub category: Option<String>,
    pub amount: f64,
    pub is_contribution_adjustment: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionRecord {
    CapitalCall(CapitalCallRecord),
    Distribution(DistributionRecord),
    Adjustment(AdjustmentRecord),
}

impl TransactionRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            TransactionRecord::CapitalCall(_) => RecordKind::CapitalCall,
            TransactionRecord::Distribution(_) => RecordKind::Distribution,
            TransactionRecord::Adjustment(_) => RecordKind::Adjustment,
        }
    }

    pub fn fund_id(&self) -> i64 {
        match self {
            TransactionRecord::CapitalCall(r) => r.fund_id,
            TransactionRecord::Distribution(r) => r.fund_id,
            TransactionRecord::Adjustment(r) => r.fund_id,
        }
    }

    pub fn amount(&self) -> f64 {
        match self {
            TransactionRecord::CapitalCall(r) => r.amount,
            TransactionRecord::Distribution(r) => r.amount,
            TransactionRecord::Adjustment(r) => r.amount,
        }
    }
}

/// A record plus the fields that fell back to neutral values.
#[derive(Debug, Clone)]
pub struct BuiltRecord {
    pub record: TransactionRecord,
    pub warnings: Vec<ParseWarning>,
}

/// Builds typed records for one fund from routed rows.
#[derive(Debug, Clone, Copy)]
pub struct RecordBuilder {
    fund_id: i64,
}

impl RecordBuilder {
    pub fn new(fund_id: i64) -> Self {
        Self { fund_id }
    }

    /// Unparsable dates and amounts never block a record; a non-finite
    /// amount ("inf", "nan") cannot be stored and fails the row.
    pub fn build(&self, kind: RecordKind, row: &NormalizedRow) -> SiftResult<BuiltRecord> {
        let mut warnings = Vec::new();

        let amount = match try_parse_amount(row.field(CanonicalField::Amount)) {
            Ok(value) => value.unwrap_or(0.0),
            Err(warning) => {
                tracing::warn!(raw = %warning.raw, "Error parsing amount: {}", warning.reason);
                warnings.push(warning);
                0.0
            }
        };
        if !amount.is_finite() {
            return Err(SiftError::row_build(format!("amount {} is not a finite number", amount)));
        }

        let date = match try_parse_date(row.field(CanonicalField::Date)) {
            Ok(value) => value,
            Err(warning) => {
                tracing::warn!(raw = %warning.raw, "Error parsing date: {}", warning.reason);
                warnings.push(warning);
                None
            }
        };

        let description = row.field(CanonicalField::Description).map(str::to_string);
        let created_at = Utc::now();
        let type_value = || {
            row.type_value()
                .map(str::to_string)
                .ok_or_else(|| SiftError::row_build(format!("{} row has no type value", kind.as_str())))
        };

        let record = match kind {
            RecordKind::CapitalCall => {
                let call_type = row
                    .field(CanonicalField::CallType)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| SiftError::row_build("capital call row has no call number"))?;
                TransactionRecord::CapitalCall(CapitalCallRecord {
                    fund_id: self.fund_id,
                    call_date: date,
                    call_type: call_type.to_string(),
                    amount,
                    description,
                    created_at,
                })
            }
            RecordKind::Distribution => TransactionRecord::Distribution(DistributionRecord {
                fund_id: self.fund_id,
                distribution_date: date,
                distribution_type: type_value()?,
                is_recallable: parse_bool(row.field(CanonicalField::Recallable)),
                amount: amount.abs(),
                description,
                created_at,
            }),
            RecordKind::Adjustment => TransactionRecord::Adjustment(AdjustmentRecord {
                fund_id: self.fund_id,
                adjustment_date: date,
                adjustment_type: type_value()?,
                category: row.field(CanonicalField::Category).map(str::to_string),
                amount,
                is_contribution_adjustment: parse_bool(
                    row.field(CanonicalField::IsContributionAdjustment),
                ),
                description,
                created_at,
            }),
        };

        Ok(BuiltRecord { record, warnings })
    }
}
