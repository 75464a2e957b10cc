use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::{Connection, SqliteConnection};
use tempfile::{tempdir, NamedTempFile, TempDir};
use tokio::runtime::Runtime;

use fundsift::config::DatabaseConfig;
use fundsift::database::{Database, ParsingStatus, SqliteRecordSink};
use fundsift::extractor::{PrimaryExtraction, TableExtractor};
use fundsift::processing::{IssueKind, MemorySink};
use fundsift::records::TransactionRecord;
use fundsift::table::{RawTable, TableClassifier, TableType};
use fundsift::worker::process_document_task;
use fundsift::{JobStatus, ProcessingJob, SiftError, SiftResult};

struct FixtureExtractor {
    tables: Vec<RawTable>,
    unreadable: bool,
}

impl FixtureExtractor {
    fn with(tables: Vec<RawTable>) -> Self {
        Self {
            tables,
            unreadable: false,
        }
    }
}

impl TableExtractor for FixtureExtractor {
    fn extract_primary(&self, path: &Path) -> SiftResult<PrimaryExtraction> {
        if self.unreadable {
            return Err(SiftError::document_open(
                path.display().to_string(),
                "file is not a PDF",
            ));
        }
        Ok(PrimaryExtraction {
            pages: 3,
            tables: self.tables.clone(),
        })
    }

    fn extract_secondary(&self, _path: &Path) -> SiftResult<Vec<RawTable>> {
        Err(SiftError::extraction("fixture", "secondary extractor unavailable"))
    }
}

fn capital_call_table() -> RawTable {
    RawTable::from(vec![
        vec!["call_number", "date", "amount", "description"],
        vec!["CALL-1", "2023-01-15", "$100,000", "Q1 call"],
    ])
}

fn distribution_table() -> RawTable {
    RawTable::from(vec![
        vec!["type", "date", "amount", "recallable"],
        vec!["Return of Capital", "2023-02-01", "$50,000", "No"],
    ])
}

fn database(rt: &Runtime) -> (TempDir, Database) {
    let dir = tempdir().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("pipeline.db").display()),
        ..DatabaseConfig::default()
    };
    let db = rt.block_on(async {
        let db = Database::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        db
    });
    (dir, db)
}

fn statement_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"%PDF-1.4 statement").unwrap();
    file
}

#[test]
fn capital_call_statement_row() {
    let table = capital_call_table();
    assert_eq!(TableClassifier::new().classify(&table), TableType::CapitalCalls);

    let mut sink = MemorySink::new();
    let outcome = ProcessingJob::new(FixtureExtractor::with(vec![table])).run(
        &mut sink,
        Path::new("q1.pdf"),
        1,
        10,
    );

    assert_eq!(outcome.result.status, JobStatus::Completed);
    assert_eq!(outcome.result.capital_calls, 1);
    match &sink.committed()[0] {
        TransactionRecord::CapitalCall(call) => {
            assert_eq!(call.call_type, "CALL-1");
            assert_eq!(call.call_date, NaiveDate::from_ymd_opt(2023, 1, 15));
            assert_eq!(call.amount, 100000.0);
            assert_eq!(call.description.as_deref(), Some("Q1 call"));
            assert_eq!(call.fund_id, 10);
        }
        other => panic!("expected a capital call, got {:?}", other),
    }
    // secondary failure is tolerated and noted
    assert_eq!(outcome.issues_of(IssueKind::SecondaryExtraction).count(), 1);
}

#[test]
fn return_of_capital_row_is_a_distribution() {
    let mut sink = MemorySink::new();
    let outcome = ProcessingJob::new(FixtureExtractor::with(vec![distribution_table()])).run(
        &mut sink,
        Path::new("q1.pdf"),
        1,
        10,
    );

    assert_eq!(outcome.result.distributions, 1);
    match &sink.committed()[0] {
        TransactionRecord::Distribution(dist) => {
            assert_eq!(dist.amount, 50000.0);
            assert!(!dist.is_recallable);
            assert_eq!(dist.distribution_type, "Return of Capital");
            assert_eq!(dist.distribution_date, NaiveDate::from_ymd_opt(2023, 2, 1));
        }
        other => panic!("expected a distribution, got {:?}", other),
    }
}

#[test]
fn records_persist_through_sqlite_sink() {
    let rt = Runtime::new().unwrap();
    let (_dir, db) = database(&rt);

    let extractor = FixtureExtractor::with(vec![capital_call_table(), distribution_table()]);
    let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
    let outcome = ProcessingJob::new(extractor).run(&mut sink, Path::new("q1.pdf"), 1, 10);
    drop(sink);

    assert!(outcome.result.is_completed());
    assert_eq!(outcome.result.pages, 3);
    let totals = rt.block_on(db.fund_totals(10)).unwrap();
    assert_eq!(totals.capital_calls.count, 1);
    assert_eq!(totals.capital_calls.amount, 100000.0);
    assert_eq!(totals.distributions.count, 1);
    assert_eq!(totals.distributions.amount, 50000.0);
    assert_eq!(totals.adjustments.count, 0);
}

#[test]
fn failing_row_does_not_stop_the_document() {
    let rt = Runtime::new().unwrap();
    let (_dir, db) = database(&rt);

    let calls = RawTable::from(vec![
        vec!["call_number", "date", "amount"],
        vec!["CALL-1", "2023-01-15", "1,000"],
        vec!["CALL-2", "2023-04-15", "inf"],
        vec!["CALL-3", "2023-07-15", "2,000"],
    ]);
    let adjustments = RawTable::from(vec![
        vec!["adjustment_type", "category", "amount"],
        vec!["Fee Adjustment", "Fees", "-250"],
    ]);

    let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
    let outcome = ProcessingJob::new(FixtureExtractor::with(vec![calls, adjustments]))
        .run(&mut sink, Path::new("q2.pdf"), 2, 11);
    drop(sink);

    assert_eq!(outcome.result.status, JobStatus::Completed);
    assert_eq!(outcome.result.capital_calls, 2);
    assert_eq!(outcome.result.adjustments, 1);

    let skipped: Vec<_> = outcome.issues_of(IssueKind::RowBuild).collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!((skipped[0].table, skipped[0].row), (Some(0), Some(1)));

    let totals = rt.block_on(db.fund_totals(11)).unwrap();
    assert_eq!(totals.capital_calls.count, 2);
    assert_eq!(totals.capital_calls.amount, 3000.0);
    assert_eq!(totals.adjustments.amount, -250.0);
}

#[test]
fn locked_store_fails_the_document_without_skipping_rows() {
    let rt = Runtime::new().unwrap();
    let dir = tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("locked.db").display());
    let db = rt.block_on(async {
        let db = Database::connect(&DatabaseConfig {
            url: url.clone(),
            busy_timeout_ms: 50,
            ..DatabaseConfig::default()
        })
        .await
        .unwrap();
        db.init_schema().await.unwrap();
        db
    });
    let mut holder = rt.block_on(async {
        let mut conn = SqliteConnection::connect(&url).await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await.unwrap();
        conn
    });

    let extractor = FixtureExtractor::with(vec![capital_call_table(), distribution_table()]);
    let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
    let outcome = ProcessingJob::new(extractor).run(&mut sink, Path::new("q3.pdf"), 3, 13);
    drop(sink);

    assert_eq!(outcome.result.status, JobStatus::Failed);
    assert_eq!(outcome.result.total_records(), 0);
    assert!(outcome.result.error.as_deref().unwrap().contains("insert record"));
    assert_eq!(outcome.issues_of(IssueKind::RowBuild).count(), 0);

    rt.block_on(async {
        sqlx::query("ROLLBACK").execute(&mut holder).await.unwrap();
    });
    let totals = rt.block_on(db.fund_totals(13)).unwrap();
    assert_eq!(totals.capital_calls.count, 0);
    assert_eq!(totals.distributions.count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_document_fails_and_is_recorded() {
    let dir = tempdir().unwrap();
    let db = Database::connect(&DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("failed.db").display()),
        ..DatabaseConfig::default()
    })
    .await
    .unwrap();
    db.init_schema().await.unwrap();

    let file = statement_file();
    let document_id = db.register_document(file.path(), 12).await.unwrap();
    let extractor = Arc::new(FixtureExtractor {
        tables: vec![capital_call_table()],
        unreadable: true,
    });

    let result = process_document_task(&db, extractor, file.path().to_path_buf(), document_id, 12)
        .await
        .unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["capital_calls"], 0);
    assert_eq!(json["distributions"], 0);
    assert_eq!(json["adjustments"], 0);
    assert_eq!(json["pages"], 0);
    assert!(json["error"].as_str().unwrap().contains("file is not a PDF"));

    let document = db.get_document(document_id).await.unwrap().unwrap();
    assert_eq!(document.parsing_status, ParsingStatus::Failed);
    assert!(document.error_message.unwrap().contains("file is not a PDF"));
    assert_eq!(db.fund_totals(12).await.unwrap().capital_calls.count, 0);
}
