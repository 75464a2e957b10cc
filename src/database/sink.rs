use sqlx::error::ErrorKind;
use sqlx::{Sqlite, Transaction};
use tokio::runtime::Handle;
use tracing::debug;

use super::Database;
use crate::error::{ErrorContext, SiftError, SiftResult};
use crate::processing::RecordSink;
use crate::records::TransactionRecord;

/// Stages records in one SQLite transaction.
///
/// The job is synchronous, so every call blocks on `handle`; use it from a
/// blocking thread, never from inside an async task. Dropping the sink
/// before `commit` rolls the transaction back.
pub struct SqliteRecordSink {
    tx: Option<Transaction<'static, Sqlite>>,
    handle: Handle,
    inserted: usize,
}

impl SqliteRecordSink {
    pub fn begin(db: &Database, handle: Handle) -> SiftResult<Self> {
        let tx = handle
            .block_on(db.pool().begin())
            .with_db_context("begin transaction")?;
        Ok(Self {
            tx: Some(tx),
            handle,
            inserted: 0,
        })
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    fn open_tx(&mut self) -> SiftResult<&mut Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| SiftError::job("transaction already finished"))
    }
}

/// Constraint violations belong to the row; anything else (locks, I/O, a
/// lost connection) belongs to the whole job.
fn insert_error(e: sqlx::Error) -> SiftError {
    if let sqlx::Error::Database(db_err) = &e {
        if matches!(
            db_err.kind(),
            ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation
        ) {
            return SiftError::row_build(format!("rejected by database: {}", db_err.message()));
        }
    }
    SiftError::database("insert record", e)
}

impl RecordSink for SqliteRecordSink {
    fn insert(&mut self, record: &TransactionRecord) -> SiftResult<()> {
        let handle = self.handle.clone();
        let tx = self.open_tx()?;

        let query = match record {
            TransactionRecord::CapitalCall(call) => sqlx::query(
                "INSERT INTO capital_calls (fund_id, call_date, call_type, amount, description, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(call.fund_id)
            .bind(call.call_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .bind(&call.call_type)
            .bind(call.amount)
            .bind(&call.description)
            .bind(call.created_at.to_rfc3339()),
            TransactionRecord::Distribution(dist) => sqlx::query(
                "INSERT INTO distributions (fund_id, distribution_date, distribution_type, is_recallable, amount, description, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dist.fund_id)
            .bind(dist.distribution_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .bind(&dist.distribution_type)
            .bind(dist.is_recallable)
            .bind(dist.amount)
            .bind(&dist.description)
            .bind(dist.created_at.to_rfc3339()),
            TransactionRecord::Adjustment(adj) => sqlx::query(
                "INSERT INTO adjustments (fund_id, adjustment_date, adjustment_type, category, amount, is_contribution_adjustment, description, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(adj.fund_id)
            .bind(adj.adjustment_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .bind(&adj.adjustment_type)
            .bind(&adj.category)
            .bind(adj.amount)
            .bind(adj.is_contribution_adjustment)
            .bind(&adj.description)
            .bind(adj.created_at.to_rfc3339()),
        };

        handle
            .block_on(query.execute(&mut **tx))
            .map_err(insert_error)?;
        self.inserted += 1;
        Ok(())
    }

    fn commit(&mut self) -> SiftResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| SiftError::job("transaction already finished"))?;
        self.handle.block_on(tx.commit()).with_db_context("commit")?;
        debug!(records = self.inserted, "Committed records");
        Ok(())
    }

    fn rollback(&mut self) -> SiftResult<()> {
        match self.tx.take() {
            Some(tx) => self.handle.block_on(tx.rollback()).with_db_context("rollback"),
            None => Ok(()),
        }
    }
}

impl Drop for SqliteRecordSink {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            // the pooled connection is returned by a spawned task
            let _guard = self.handle.enter();
            drop(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::records::{CapitalCallRecord, DistributionRecord};
    use chrono::{NaiveDate, Utc};
    use sqlx::{Connection, SqliteConnection};
    use tempfile::{tempdir, TempDir};
    use tokio::runtime::Runtime;

    fn setup() -> (TempDir, Runtime, Database) {
        let (dir, rt, db, _) = setup_with(DatabaseConfig::default());
        (dir, rt, db)
    }

    fn setup_with(config: DatabaseConfig) -> (TempDir, Runtime, Database, String) {
        let dir = tempdir().unwrap();
        let rt = Runtime::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("sink.db").display()),
            ..config
        };
        let db = rt.block_on(async {
            let db = Database::connect(&config).await.unwrap();
            db.init_schema().await.unwrap();
            db
        });
        (dir, rt, db, config.url)
    }

    fn call(amount: f64) -> TransactionRecord {
        TransactionRecord::CapitalCall(CapitalCallRecord {
            fund_id: 4,
            call_date: NaiveDate::from_ymd_opt(2023, 1, 15),
            call_type: "CALL-1".into(),
            amount,
            description: None,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn committed_records_are_visible() {
        let (_dir, rt, db) = setup();
        let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
        sink.insert(&call(100.0)).unwrap();
        sink.insert(&call(50.0)).unwrap();
        sink.commit().unwrap();

        let totals = rt.block_on(db.fund_totals(4)).unwrap();
        assert_eq!(totals.capital_calls.count, 2);
        assert_eq!(totals.capital_calls.amount, 150.0);
        assert!(sink.insert(&call(1.0)).is_err());
    }

    #[test]
    fn dropped_sink_leaves_nothing_behind() {
        let (_dir, rt, db) = setup();
        {
            let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
            sink.insert(&call(100.0)).unwrap();
        }
        let totals = rt.block_on(db.fund_totals(4)).unwrap();
        assert_eq!(totals.capital_calls.count, 0);
    }

    #[test]
    fn explicit_rollback_discards_inserts() {
        let (_dir, rt, db) = setup();
        let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
        sink.insert(&call(100.0)).unwrap();
        sink.rollback().unwrap();
        sink.rollback().unwrap();

        let totals = rt.block_on(db.fund_totals(4)).unwrap();
        assert_eq!(totals.capital_calls.count, 0);
    }

    #[test]
    fn constraint_violation_is_a_row_error() {
        let (_dir, rt, db) = setup();
        let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
        let negative = TransactionRecord::Distribution(DistributionRecord {
            fund_id: 4,
            distribution_date: None,
            distribution_type: "Income".into(),
            is_recallable: false,
            amount: -5.0,
            description: None,
            created_at: Utc::now(),
        });

        let err = sink.insert(&negative).unwrap_err();
        assert!(matches!(err, SiftError::RowBuild { .. }), "got {:?}", err);
        // the transaction is still usable
        sink.insert(&call(10.0)).unwrap();
        sink.commit().unwrap();
        assert_eq!(rt.block_on(db.fund_totals(4)).unwrap().capital_calls.count, 1);
    }

    #[test]
    fn locked_database_is_a_database_error() {
        let (_dir, rt, db, url) = setup_with(DatabaseConfig {
            busy_timeout_ms: 50,
            ..DatabaseConfig::default()
        });
        let mut holder = rt.block_on(async {
            let mut conn = SqliteConnection::connect(&url).await.unwrap();
            sqlx::query("BEGIN IMMEDIATE").execute(&mut conn).await.unwrap();
            conn
        });

        let mut sink = SqliteRecordSink::begin(&db, rt.handle().clone()).unwrap();
        let err = sink.insert(&call(10.0)).unwrap_err();
        assert!(matches!(err, SiftError::Database { .. }), "got {:?}", err);
        assert!(err.is_recoverable());
        drop(sink);

        rt.block_on(async {
            sqlx::query("ROLLBACK").execute(&mut holder).await.unwrap();
            holder.close().await.unwrap();
        });
    }
}
