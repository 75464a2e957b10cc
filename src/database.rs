pub mod sink;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{ErrorContext, SiftError, SiftResult};
use crate::router::RecordKind;

pub use sink::SqliteRecordSink;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fund_id INTEGER NOT NULL,
        file_path TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        parsing_status TEXT NOT NULL DEFAULT 'pending',
        error_message TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS capital_calls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fund_id INTEGER NOT NULL,
        call_date TEXT,
        call_type TEXT NOT NULL,
        amount REAL NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS distributions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fund_id INTEGER NOT NULL,
        distribution_date TEXT,
        distribution_type TEXT NOT NULL,
        is_recallable INTEGER NOT NULL DEFAULT 0,
        amount REAL NOT NULL CHECK (amount >= 0),
        description TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS adjustments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fund_id INTEGER NOT NULL,
        adjustment_date TEXT,
        adjustment_type TEXT NOT NULL,
        category TEXT,
        amount REAL NOT NULL,
        is_contribution_adjustment INTEGER NOT NULL DEFAULT 0,
        description TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_capital_calls_fund ON capital_calls(fund_id)",
    "CREATE INDEX IF NOT EXISTS idx_distributions_fund ON distributions(fund_id)",
    "CREATE INDEX IF NOT EXISTS idx_adjustments_fund ON adjustments(fund_id)",
    "CREATE INDEX IF NOT EXISTS idx_documents_fund ON documents(fund_id)",
];

pub(crate) fn table_for(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::CapitalCall => "capital_calls",
        RecordKind::Distribution => "distributions",
        RecordKind::Adjustment => "adjustments",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ParsingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParsingStatus::Pending => "pending",
            ParsingStatus::Processing => "processing",
            ParsingStatus::Completed => "completed",
            ParsingStatus::Failed => "failed",
        }
    }
}

impl FromStr for ParsingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ParsingStatus::Pending),
            "processing" => Ok(ParsingStatus::Processing),
            "completed" => Ok(ParsingStatus::Completed),
            "failed" => Ok(ParsingStatus::Failed),
            other => Err(format!("unknown parsing status '{}'", other)),
        }
    }
}

impl fmt::Display for ParsingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl From<crate::processing::JobStatus> for ParsingStatus {
    fn from(status: crate::processing::JobStatus) -> Self {
        match status {
            crate::processing::JobStatus::Completed => ParsingStatus::Completed,
            crate::processing::JobStatus::Failed => ParsingStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRow {
    pub id: i64,
    pub fund_id: i64,
    pub file_path: String,
    pub file_hash: String,
    pub file_size: i64,
    pub parsing_status: ParsingStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct KindTotal {
    pub count: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundTotals {
    pub fund_id: i64,
    pub capital_calls: KindTotal,
    pub distributions: KindTotal,
    pub adjustments: KindTotal,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRow, sqlx::Error> {
    let status: String = row.try_get("parsing_status")?;
    Ok(DocumentRow {
        id: row.try_get("id")?,
        fund_id: row.try_get("fund_id")?,
        file_path: row.try_get("file_path")?,
        file_hash: row.try_get("file_hash")?,
        file_size: row.try_get("file_size")?,
        parsing_status: status.parse().map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        error_message: row.try_get("error_message")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
    })
}

/// SQLite store for documents and their extracted transaction records.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> SiftResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_db_context("parse database url")?
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_db_context("connect")?;

        info!("Connected to {}", config.url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> SiftResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_db_context("create schema")?;
        }
        debug!("Schema ready");
        Ok(())
    }

    /// Insert a pending document for `file_path`, hashing its contents.
    pub async fn register_document(&self, file_path: &Path, fund_id: i64) -> SiftResult<i64> {
        let path_text = file_path.display().to_string();
        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|e| SiftError::file_io(path_text.clone(), e))?;
        let hash = blake3::hash(&bytes).to_hex().to_string();
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO documents (fund_id, file_path, file_hash, file_size, parsing_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fund_id)
        .bind(&path_text)
        .bind(&hash)
        .bind(bytes.len() as i64)
        .bind(ParsingStatus::Pending.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_db_context("register document")?;

        let id = result.last_insert_rowid();
        info!(document_id = id, fund_id, path = %path_text, "Registered document");
        Ok(id)
    }

    pub async fn get_document(&self, id: i64) -> SiftResult<Option<DocumentRow>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_db_context("load document")?;

        row.as_ref()
            .map(document_from_row)
            .transpose()
            .with_db_context("decode document")
    }

    pub async fn list_documents(&self, limit: i64) -> SiftResult<Vec<DocumentRow>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .with_db_context("list documents")?;

        rows.iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()
            .with_db_context("decode document")
    }

    /// Returns the number of documents updated (0 when the id is unknown).
    pub async fn set_parsing_status(
        &self,
        id: i64,
        status: ParsingStatus,
        error_message: Option<&str>,
    ) -> SiftResult<u64> {
        let result = sqlx::query(
            "UPDATE documents SET parsing_status = ?, error_message = COALESCE(?, error_message), updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_db_context("update parsing status")?;

        Ok(result.rows_affected())
    }

    pub async fn fund_totals(&self, fund_id: i64) -> SiftResult<FundTotals> {
        let mut totals = FundTotals {
            fund_id,
            capital_calls: KindTotal::default(),
            distributions: KindTotal::default(),
            adjustments: KindTotal::default(),
        };

        for kind in [RecordKind::CapitalCall, RecordKind::Distribution, RecordKind::Adjustment] {
            let query = format!(
                "SELECT COUNT(*) AS n, COALESCE(SUM(amount), 0.0) AS total FROM {} WHERE fund_id = ?",
                table_for(kind)
            );
            let row = sqlx::query(&query)
                .bind(fund_id)
                .fetch_one(&self.pool)
                .await
                .with_db_context("fund totals")?;
            let total = KindTotal {
                count: row.try_get("n").with_db_context("fund totals")?,
                amount: row.try_get("total").with_db_context("fund totals")?,
            };
            match kind {
                RecordKind::CapitalCall => totals.capital_calls = total,
                RecordKind::Distribution => totals.distributions = total,
                RecordKind::Adjustment => totals.adjustments = total,
            }
        }

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile, TempDir};

    async fn test_db() -> (TempDir, Database) {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("test.db").display()),
            ..DatabaseConfig::default()
        };
        let db = Database::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        (dir, db)
    }

    fn statement() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.4 fake statement").unwrap();
        file
    }

    #[tokio::test]
    async fn register_and_load_document() {
        let (_dir, db) = test_db().await;
        let file = statement();
        let id = db.register_document(file.path(), 9).await.unwrap();

        let doc = db.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.fund_id, 9);
        assert_eq!(doc.parsing_status, ParsingStatus::Pending);
        assert_eq!(doc.file_size, 23);
        assert_eq!(doc.file_hash, blake3::hash(b"%PDF-1.4 fake statement").to_hex().to_string());
        assert!(doc.error_message.is_none());
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let (_dir, db) = test_db().await;
        db.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_not_registered() {
        let (_dir, db) = test_db().await;
        let err = db
            .register_document(Path::new("/nonexistent/x.pdf"), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SiftError::FileIO { .. }));
        assert!(db.list_documents(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_updates() {
        let (_dir, db) = test_db().await;
        let file = statement();
        let id = db.register_document(file.path(), 1).await.unwrap();

        let n = db
            .set_parsing_status(id, ParsingStatus::Failed, Some("bad xref"))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let doc = db.get_document(id).await.unwrap().unwrap();
        assert_eq!(doc.parsing_status, ParsingStatus::Failed);
        assert_eq!(doc.error_message.as_deref(), Some("bad xref"));

        assert_eq!(
            db.set_parsing_status(999, ParsingStatus::Completed, None).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let (_dir, db) = test_db().await;
        let file = statement();
        let first = db.register_document(file.path(), 1).await.unwrap();
        let second = db.register_document(file.path(), 1).await.unwrap();

        let docs = db.list_documents(10).await.unwrap();
        assert_eq!(docs.iter().map(|d| d.id).collect::<Vec<_>>(), vec![second, first]);
        assert_eq!(db.list_documents(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn totals_for_empty_fund() {
        let (_dir, db) = test_db().await;
        let totals = db.fund_totals(5).await.unwrap();
        assert_eq!(totals.capital_calls, KindTotal::default());
        assert_eq!(totals.distributions.count, 0);
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ParsingStatus::Pending,
            ParsingStatus::Processing,
            ParsingStatus::Completed,
            ParsingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ParsingStatus>().unwrap(), status);
        }
        assert!("done".parse::<ParsingStatus>().is_err());
    }
}
