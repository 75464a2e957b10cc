pub mod classifier;
pub mod normalizer;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use classifier::TableClassifier;
pub use normalizer::{CanonicalField, NormalizedRow, RowNormalizer};

/// A grid of string cells as produced by an extractor. Row 0 is the header;
/// rows may be ragged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawTable {
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn header(&self) -> Option<&[String]> {
        self.rows.first().map(Vec::as_slice)
    }

    pub fn data_rows(&self) -> &[Vec<String>] {
        self.rows.get(1..).unwrap_or(&[])
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A header with no data rows carries nothing to classify
    pub fn has_data(&self) -> bool {
        self.rows.len() >= 2
    }
}

impl<S: Into<String>> From<Vec<Vec<S>>> for RawTable {
    fn from(rows: Vec<Vec<S>>) -> Self {
        Self::new(
            rows.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    CapitalCalls,
    Distributions,
    Adjustments,
    Unknown,
}

impl TableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableType::CapitalCalls => "capital_calls",
            TableType::Distributions => "distributions",
            TableType::Adjustments => "adjustments",
            TableType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_data_rows_split() {
        let table = RawTable::from(vec![vec!["date", "amount"], vec!["2023-01-01", "5"]]);
        assert_eq!(table.header().unwrap(), &["date".to_string(), "amount".to_string()]);
        assert_eq!(table.data_rows().len(), 1);
        assert!(table.has_data());
    }

    #[test]
    fn empty_table_has_no_header() {
        let table = RawTable::default();
        assert!(table.header().is_none());
        assert!(table.data_rows().is_empty());
        assert!(!table.has_data());
    }

    #[test]
    fn deserializes_from_bare_grid() {
        let table: RawTable = serde_json::from_str(r#"[["type","amount"],["Income","10"]]"#).unwrap();
        assert_eq!(table.len(), 2);
    }
}
