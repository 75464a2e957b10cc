use std::path::{Path, PathBuf};
use std::process::Command;

use lopdf::Document;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ExtractionConfig;
use crate::error::{SiftError, SiftResult};
use crate::table::RawTable;

/// What the primary extractor found: page count and tables in page order.
#[derive(Debug, Clone, Default)]
pub struct PrimaryExtraction {
    pub pages: usize,
    pub tables: Vec<RawTable>,
}

/// Source of raw tables for a document.
///
/// The primary pass must open the document; failing to do so fails the
/// whole job. The secondary pass is best effort.
pub trait TableExtractor {
    fn extract_primary(&self, path: &Path) -> SiftResult<PrimaryExtraction>;

    fn extract_secondary(&self, path: &Path) -> SiftResult<Vec<RawTable>>;

    fn has_secondary(&self) -> bool {
        true
    }
}

impl<T: TableExtractor + ?Sized> TableExtractor for &T {
    fn extract_primary(&self, path: &Path) -> SiftResult<PrimaryExtraction> {
        (**self).extract_primary(path)
    }

    fn extract_secondary(&self, path: &Path) -> SiftResult<Vec<RawTable>> {
        (**self).extract_secondary(path)
    }

    fn has_secondary(&self) -> bool {
        (**self).has_secondary()
    }
}

/// Splits page text into table grids: consecutive lines that break into at
/// least `min_columns` cells form one table.
#[derive(Debug, Clone)]
pub struct TextGridExtractor {
    min_columns: usize,
    gap: Regex,
}

impl TextGridExtractor {
    pub fn new(config: &ExtractionConfig) -> SiftResult<Self> {
        let gap = Regex::new(&format!(r"\s{{{},}}|\t", config.column_gap.max(1)))
            .map_err(|e| SiftError::configuration(format!("invalid column gap: {}", e)))?;
        Ok(Self {
            min_columns: config.min_columns,
            gap,
        })
    }

    pub fn split_cells(&self, line: &str) -> Vec<String> {
        let trimmed = line.trim();
        if trimmed.matches('|').count() >= 2 {
            trimmed
                .trim_matches('|')
                .split('|')
                .map(|c| c.trim().to_string())
                .collect()
        } else {
            self.gap
                .split(trimmed)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        }
    }

    fn is_separator_line(line: &str) -> bool {
        let trimmed = line.trim();
        !trimmed.is_empty()
            && trimmed.chars().all(|c| matches!(c, '-' | '=' | '|' | ':' | '+' | ' '))
            && trimmed.chars().any(|c| c == '-' || c == '=')
    }

    pub fn tables_from_text(&self, text: &str) -> Vec<RawTable> {
        let mut tables = Vec::new();
        let mut current: Vec<Vec<String>> = Vec::new();

        for line in text.lines() {
            if Self::is_separator_line(line) {
                continue;
            }
            let cells = self.split_cells(line);
            if cells.len() >= self.min_columns {
                current.push(cells);
            } else if !current.is_empty() {
                tables.push(RawTable::new(std::mem::take(&mut current)));
            }
        }
        if !current.is_empty() {
            tables.push(RawTable::new(current));
        }

        tables
    }

    pub fn extract(&self, path: &Path) -> SiftResult<PrimaryExtraction> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(SiftError::document_open(display, "file not found"));
        }
        let document = Document::load(path)
            .map_err(|e| SiftError::document_open_with_source(display.clone(), e))?;

        let pages = document.get_pages();
        let mut tables = Vec::new();
        for (&page_number, _) in pages.iter() {
            let text = document
                .extract_text(&[page_number])
                .map_err(|e| SiftError::page_extraction(page_number, pages.len(), e.to_string()))?;
            let found = self.tables_from_text(&text);
            debug!(page = page_number, tables = found.len(), "Page tables (text grid)");
            tables.extend(found);
        }

        Ok(PrimaryExtraction {
            pages: pages.len(),
            tables,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeOutput {
    Bare(Vec<Vec<Vec<Option<String>>>>),
    Wrapped {
        #[serde(default)]
        tables: Vec<Vec<Vec<Option<String>>>>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Runs an external table extractor that prints JSON tables on stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
        })
    }

    pub fn parse_output(stdout: &str) -> SiftResult<Vec<RawTable>> {
        let output: BridgeOutput = serde_json::from_str(stdout).map_err(|e| {
            SiftError::extraction("command", format!("failed to parse extraction result: {}", e))
        })?;
        let grids = match output {
            BridgeOutput::Wrapped { error: Some(message), .. } => {
                return Err(SiftError::extraction("command", message));
            }
            BridgeOutput::Wrapped { tables, .. } => tables,
            BridgeOutput::Bare(tables) => tables,
        };

        Ok(grids
            .into_iter()
            .map(|rows| {
                RawTable::new(
                    rows.into_iter()
                        .map(|row| row.into_iter().map(Option::unwrap_or_default).collect())
                        .collect(),
                )
            })
            .collect())
    }

    pub fn extract(&self, path: &Path) -> SiftResult<Vec<RawTable>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|e| {
                SiftError::extraction(
                    "command",
                    format!("failed to run {}: {}", self.program.display(), e),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SiftError::extraction(
                "command",
                format!("{} exited with {}: {}", self.program.display(), output.status, stderr.trim()),
            ));
        }

        Self::parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Text-grid primary extraction plus an optional external secondary pass.
#[derive(Debug, Clone)]
pub struct PdfTableExtractor {
    primary: TextGridExtractor,
    secondary: Option<CommandExtractor>,
}

impl PdfTableExtractor {
    pub fn new(config: &ExtractionConfig) -> SiftResult<Self> {
        let secondary = if config.enable_secondary {
            config
                .secondary_command
                .as_deref()
                .and_then(CommandExtractor::from_argv)
        } else {
            None
        };
        if let Some(command) = &secondary {
            info!("Secondary extractor: {}", command.program.display());
        }
        Ok(Self {
            primary: TextGridExtractor::new(config)?,
            secondary,
        })
    }
}

impl TableExtractor for PdfTableExtractor {
    fn extract_primary(&self, path: &Path) -> SiftResult<PrimaryExtraction> {
        self.primary.extract(path)
    }

    fn extract_secondary(&self, path: &Path) -> SiftResult<Vec<RawTable>> {
        match &self.secondary {
            Some(command) => command.extract(path),
            None => Err(SiftError::extraction("command", "no secondary extractor configured")),
        }
    }

    fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }
}
