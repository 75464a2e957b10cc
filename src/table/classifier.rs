use super::{RawTable, TableType};

/// Assigns a [`TableType`] from a table's header row.
///
/// Header cells are lowercased with spaces, dashes and underscores removed,
/// then checked in a fixed priority order. The first matching rule wins, so a
/// header that looks like both a capital-call and a distribution table is a
/// capital-call table.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableClassifier;

impl TableClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, table: &RawTable) -> TableType {
        let header: Vec<String> = match table.header() {
            Some(cells) if !cells.is_empty() => cells.iter().map(|h| squash(h)).collect(),
            _ => return TableType::Unknown,
        };
        let any = |needle: &str| header.iter().any(|h| h.contains(needle));

        if (any("call") || header.iter().any(|h| h == "callnumber")) && any("amount") {
            TableType::CapitalCalls
        } else if any("distribution") || any("recallable") || any("type") {
            TableType::Distributions
        } else if any("adjustment") || any("contribution") || any("category") {
            TableType::Adjustments
        } else {
            TableType::Unknown
        }
    }
}

fn squash(cell: &str) -> String {
    cell.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .collect()
}
