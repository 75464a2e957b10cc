use std::collections::HashMap;

use serde::Serialize;

use super::{RawTable, TableType};

/// The fixed field vocabulary rows are normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    CallType,
    DistributionType,
    AdjustmentType,
    Amount,
    Date,
    Recallable,
    Description,
    Category,
    IsContributionAdjustment,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::CallType,
        CanonicalField::DistributionType,
        CanonicalField::AdjustmentType,
        CanonicalField::Amount,
        CanonicalField::Date,
        CanonicalField::Recallable,
        CanonicalField::Description,
        CanonicalField::Category,
        CanonicalField::IsContributionAdjustment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::CallType => "call_type",
            CanonicalField::DistributionType => "distribution_type",
            CanonicalField::AdjustmentType => "adjustment_type",
            CanonicalField::Amount => "amount",
            CanonicalField::Date => "date",
            CanonicalField::Recallable => "recallable",
            CanonicalField::Description => "description",
            CanonicalField::Category => "category",
            CanonicalField::IsContributionAdjustment => "is_contribution_adjustment",
        }
    }

    /// Map a normalized header to a canonical field, if it names one.
    pub fn from_header(header: &str, table_type: TableType) -> Option<Self> {
        match header {
            "call_number" | "call" => Some(CanonicalField::CallType),
            "type" => match table_type {
                TableType::Distributions => Some(CanonicalField::DistributionType),
                TableType::Adjustments => Some(CanonicalField::AdjustmentType),
                _ => None,
            },
            "amount" => Some(CanonicalField::Amount),
            "date" => Some(CanonicalField::Date),
            "recallable" => Some(CanonicalField::Recallable),
            "description" => Some(CanonicalField::Description),
            "category" => Some(CanonicalField::Category),
            "contribution_adjustment" => Some(CanonicalField::IsContributionAdjustment),
            _ => None,
        }
    }
}

/// One data row keyed by canonical field name. Headers outside the
/// vocabulary pass through under their normalized text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedRow {
    fields: HashMap<String, Option<String>>,
}

impl NormalizedRow {
    pub fn field(&self, field: CanonicalField) -> Option<&str> {
        self.get(field.as_str())
    }

    /// Raw lookup by column name; `None` for missing keys and null cells alike.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// First non-empty of `distribution_type`, `type`, `adjustment_type`.
    pub fn type_value(&self) -> Option<&str> {
        [
            self.field(CanonicalField::DistributionType),
            self.get("type"),
            self.field(CanonicalField::AdjustmentType),
        ]
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Option<String>)> for NormalizedRow {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RowNormalizer;

impl RowNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Column index -> field name for a header row.
    pub fn column_names(&self, header: &[String], table_type: TableType) -> Vec<String> {
        header
            .iter()
            .map(|h| {
                let normalized = normalize_header(h);
                match CanonicalField::from_header(&normalized, table_type) {
                    Some(field) => field.as_str().to_string(),
                    None => normalized,
                }
            })
            .collect()
    }

    pub fn normalize(&self, table: &RawTable, table_type: TableType) -> Vec<NormalizedRow> {
        if !table.has_data() {
            return Vec::new();
        }
        let columns = match table.header() {
            Some(header) => self.column_names(header, table_type),
            None => return Vec::new(),
        };

        table
            .data_rows()
            .iter()
            .map(|row| {
                // A later duplicate column overwrites an earlier one
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (name.clone(), row.get(i).map(|cell| cell.trim().to_string())))
                    .collect()
            })
            .collect()
    }
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace([' ', '-'], "_")
}
