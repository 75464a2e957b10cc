use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::error::{SiftError, SiftResult};
use crate::extractor::TableExtractor;
use crate::logging::PerformanceTimer;
use crate::records::{RecordBuilder, TransactionRecord};
use crate::router::{route, RecordKind};
use crate::table::{RawTable, RowNormalizer, TableClassifier, TableType};

/// Where a job's records go. Inserts are staged until `commit`.
pub trait RecordSink {
    fn insert(&mut self, record: &TransactionRecord) -> SiftResult<()>;
    fn commit(&mut self) -> SiftResult<()>;
    fn rollback(&mut self) -> SiftResult<()>;
}

/// In-memory sink for dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    staged: Vec<TransactionRecord>,
    committed: Vec<TransactionRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committed(&self) -> &[TransactionRecord] {
        &self.committed
    }

    pub fn staged(&self) -> &[TransactionRecord] {
        &self.staged
    }
}

impl RecordSink for MemorySink {
    fn insert(&mut self, record: &TransactionRecord) -> SiftResult<()> {
        self.staged.push(record.clone());
        Ok(())
    }

    fn commit(&mut self) -> SiftResult<()> {
        self.committed.append(&mut self.staged);
        Ok(())
    }

    fn rollback(&mut self) -> SiftResult<()> {
        self.staged.clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Started,
    Extracting,
    ClassifyingAndBuilding,
    Committing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one job. `Completed` does not mean every row was
/// captured; skipped rows only lower the counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub status: JobStatus,
    pub capital_calls: usize,
    pub distributions: usize,
    pub adjustments: usize,
    pub pages: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn total_records(&self) -> usize {
        self.capital_calls + self.distributions + self.adjustments
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            capital_calls: 0,
            distributions: 0,
            adjustments: 0,
            pages: 0,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSource {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SecondaryExtraction,
    FieldParse,
    RowBuild,
}

/// A non-fatal problem recorded while the job kept going.
#[derive(Debug, Clone, Serialize)]
pub struct RowIssue {
    pub table: Option<usize>,
    pub row: Option<usize>,
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSummary {
    pub index: usize,
    pub source: TableSource,
    pub table_type: TableType,
    pub rows: usize,
    pub records: usize,
    pub skipped: usize,
    pub kinds: Vec<Option<RecordKind>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub run_id: Uuid,
    pub result: ProcessingResult,
    pub tables: Vec<TableSummary>,
    pub issues: Vec<RowIssue>,
    pub transitions: Vec<JobState>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    capital_calls: usize,
    distributions: usize,
    adjustments: usize,
    pages: usize,
}

impl Counts {
    fn bump(&mut self, kind: RecordKind) {
        match kind {
            RecordKind::CapitalCall => self.capital_calls += 1,
            RecordKind::Distribution => self.distributions += 1,
            RecordKind::Adjustment => self.adjustments += 1,
        }
    }

    fn into_result(self, status: JobStatus, error: Option<String>) -> ProcessingResult {
        ProcessingResult {
            status,
            capital_calls: self.capital_calls,
            distributions: self.distributions,
            adjustments: self.adjustments,
            pages: self.pages,
            error,
        }
    }
}

/// Runs extraction, classification, routing and record building for one
/// document, sequentially, and stages records into a [`RecordSink`].
pub struct ProcessingJob<E> {
    extractor: E,
    classifier: TableClassifier,
    normalizer: RowNormalizer,
    state: JobState,
    transitions: Vec<JobState>,
    counts: Counts,
    tables: Vec<TableSummary>,
    issues: Vec<RowIssue>,
}

impl<E: TableExtractor> ProcessingJob<E> {
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            classifier: TableClassifier::new(),
            normalizer: RowNormalizer::new(),
            state: JobState::Started,
            transitions: vec![JobState::Started],
            counts: Counts::default(),
            tables: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        debug!(from = ?self.state, to = ?next, "Job state");
        self.state = next;
        self.transitions.push(next);
    }

    pub fn run<S: RecordSink + ?Sized>(
        mut self,
        sink: &mut S,
        file_path: &Path,
        document_id: i64,
        fund_id: i64,
    ) -> JobOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("job", %run_id, document_id);
        let _entered = span.enter();
        let timer = PerformanceTimer::start(format!("document {}", document_id));
        crate::log_job_start!(file_path.display(), document_id, fund_id);

        let executed = self.execute(sink, file_path, fund_id);
        timer.checkpoint("tables processed");
        let result = match executed {
            Ok(()) => {
                self.transition(JobState::Completed);
                info!(
                    document_id,
                    capital_calls = self.counts.capital_calls,
                    distributions = self.counts.distributions,
                    adjustments = self.counts.adjustments,
                    skipped = self.issues.len(),
                    "Document processed"
                );
                self.counts.into_result(JobStatus::Completed, None)
            }
            Err(e) => {
                if let Err(rollback_err) = sink.rollback() {
                    warn!("Rollback after failure also failed: {}", rollback_err);
                }
                self.transition(JobState::Failed);
                crate::log_error!(e, "processing job");
                let counts = match &e {
                    SiftError::DocumentOpen { .. } => Counts::default(),
                    SiftError::PageExtraction { pages, .. } => Counts {
                        pages: *pages,
                        ..Counts::default()
                    },
                    _ => self.counts,
                };
                counts.into_result(JobStatus::Failed, Some(e.to_string()))
            }
        };

        JobOutcome {
            run_id,
            result,
            tables: self.tables,
            issues: self.issues,
            transitions: self.transitions,
        }
    }

    fn execute<S: RecordSink + ?Sized>(
        &mut self,
        sink: &mut S,
        file_path: &Path,
        fund_id: i64,
    ) -> SiftResult<()> {
        self.transition(JobState::Extracting);
        let primary = self.extractor.extract_primary(file_path)?;
        self.counts.pages = primary.pages;

        let mut tables: Vec<(TableSource, RawTable)> = primary
            .tables
            .into_iter()
            .map(|t| (TableSource::Primary, t))
            .collect();

        if self.extractor.has_secondary() {
            match self.extractor.extract_secondary(file_path) {
                Ok(found) => tables.extend(found.into_iter().map(|t| (TableSource::Secondary, t))),
                Err(e) => {
                    warn!("Secondary extraction failed, using primary tables only: {}", e);
                    self.issues.push(RowIssue {
                        table: None,
                        row: None,
                        kind: IssueKind::SecondaryExtraction,
                        message: e.to_string(),
                    });
                }
            }
        }
        tables.retain(|(_, t)| t.has_data());
        info!(pages = self.counts.pages, tables = tables.len(), "Total tables found");

        self.transition(JobState::ClassifyingAndBuilding);
        let builder = RecordBuilder::new(fund_id);
        for (index, (source, table)) in tables.iter().enumerate() {
            self.process_table(sink, &builder, index, *source, table)?;
        }

        self.transition(JobState::Committing);
        sink.commit()
    }

    fn process_table<S: RecordSink + ?Sized>(
        &mut self,
        sink: &mut S,
        builder: &RecordBuilder,
        index: usize,
        source: TableSource,
        table: &RawTable,
    ) -> SiftResult<()> {
        let table_type = self.classifier.classify(table);
        let rows = self.normalizer.normalize(table, table_type);
        debug!(table = index, ?source, %table_type, rows = rows.len(), "Classified table");

        let mut summary = TableSummary {
            index,
            source,
            table_type,
            rows: rows.len(),
            records: 0,
            skipped: 0,
            kinds: Vec::with_capacity(rows.len()),
        };

        for (row_index, row) in rows.iter().enumerate() {
            let kind = route(row, table_type);
            summary.kinds.push(kind);
            let Some(kind) = kind else {
                continue;
            };

            let built = match builder.build(kind, row) {
                Ok(built) => built,
                Err(e) => {
                    self.skip_row(&mut summary, row_index, e)?;
                    continue;
                }
            };
            for warning in &built.warnings {
                self.issues.push(RowIssue {
                    table: Some(index),
                    row: Some(row_index),
                    kind: IssueKind::FieldParse,
                    message: format!("{} {:?}: {}", warning.field, warning.raw, warning.reason),
                });
            }

            match sink.insert(&built.record) {
                Ok(()) => {
                    self.counts.bump(kind);
                    summary.records += 1;
                }
                Err(e) => self.skip_row(&mut summary, row_index, e)?,
            }
        }

        self.tables.push(summary);
        Ok(())
    }

    /// Records a rejected row. Errors other than `RowBuild` concern the whole
    /// job and are handed back.
    fn skip_row(&mut self, summary: &mut TableSummary, row: usize, e: SiftError) -> SiftResult<()> {
        if !matches!(e, SiftError::RowBuild { .. }) {
            return Err(e);
        }
        warn!(table = summary.index, row, "Error inserting row: {}", e);
        summary.skipped += 1;
        self.issues.push(RowIssue {
            table: Some(summary.index),
            row: Some(row),
            kind: IssueKind::RowBuild,
            message: e.to_string(),
        });
        Ok(())
    }
}

impl JobOutcome {
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &RowIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }
}
