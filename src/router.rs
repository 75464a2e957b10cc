use serde::Serialize;

use crate::table::{CanonicalField, NormalizedRow, TableType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    CapitalCall,
    Distribution,
    Adjustment,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::CapitalCall => "capital_call",
            RecordKind::Distribution => "distribution",
            RecordKind::Adjustment => "adjustment",
        }
    }
}

/// Decide what record a row becomes. The table type is only a hint: a row
/// whose type mentions "return" or "income" is a distribution wherever it
/// appears. Rows matching nothing yield `None` and are skipped.
pub fn route(row: &NormalizedRow, table_type: TableType) -> Option<RecordKind> {
    let call_type = row.field(CanonicalField::CallType).filter(|v| !v.is_empty());
    let type_value = row.type_value().map(str::to_lowercase);
    let type_has = |needles: &[&str]| {
        type_value
            .as_deref()
            .map_or(false, |t| needles.iter().any(|n| t.contains(n)))
    };
    let adjustment_like = type_has(&["adjust", "recallable"]);

    if table_type == TableType::CapitalCalls && call_type.is_some() {
        return Some(RecordKind::CapitalCall);
    }

    let listed_distribution = table_type == TableType::Distributions
        && type_value.is_some()
        && call_type.is_none()
        && !adjustment_like;
    if listed_distribution || type_has(&["return", "income"]) {
        return Some(RecordKind::Distribution);
    }

    if adjustment_like {
        return Some(RecordKind::Adjustment);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> NormalizedRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    #[test]
    fn call_rows_in_call_tables() {
        let r = row(&[("call_type", "CALL-1"), ("amount", "100")]);
        assert_eq!(route(&r, TableType::CapitalCalls), Some(RecordKind::CapitalCall));
        // outside a capital-call table the call number alone routes nowhere
        assert_eq!(route(&r, TableType::Distributions), None);
    }

    #[test]
    fn empty_call_type_falls_through() {
        let r = row(&[("call_type", ""), ("type", "Income")]);
        assert_eq!(route(&r, TableType::CapitalCalls), Some(RecordKind::Distribution));
    }

    #[test]
    fn distribution_table_rows() {
        let r = row(&[("distribution_type", "Dividend")]);
        assert_eq!(route(&r, TableType::Distributions), Some(RecordKind::Distribution));

        let with_call = row(&[("distribution_type", "Dividend"), ("call_type", "C-2")]);
        assert_eq!(route(&with_call, TableType::Distributions), None);
    }

    #[test]
    fn return_overrides_adjustment_table() {
        let r = row(&[("adjustment_type", "Return of Capital")]);
        assert_eq!(route(&r, TableType::Adjustments), Some(RecordKind::Distribution));

        let income = row(&[("type", "Net INCOME")]);
        assert_eq!(route(&income, TableType::Unknown), Some(RecordKind::Distribution));
    }

    #[test]
    fn adjustments_from_type_keywords() {
        let r = row(&[("distribution_type", "Fee Adjustment")]);
        assert_eq!(route(&r, TableType::Distributions), Some(RecordKind::Adjustment));

        let recallable = row(&[("adjustment_type", "Recallable Distribution")]);
        assert_eq!(route(&recallable, TableType::Adjustments), Some(RecordKind::Adjustment));
    }

    #[test]
    fn return_wins_over_adjust_keyword() {
        let r = row(&[("adjustment_type", "Return adjustment")]);
        assert_eq!(route(&r, TableType::Adjustments), Some(RecordKind::Distribution));
    }

    #[test]
    fn rows_without_signals_are_skipped() {
        let r = row(&[("amount", "100"), ("date", "2023-01-01")]);
        assert_eq!(route(&r, TableType::Distributions), None);
        assert_eq!(route(&NormalizedRow::default(), TableType::Unknown), None);
    }
}
