use tracing::{info, warn};

use crate::database::{Database, ParsingStatus};
use crate::error::SiftResult;
use crate::processing::{JobStatus, ProcessingResult};

/// Writes a finished job's terminal status onto its document.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    db: Database,
}

impl StatusReporter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn mark_processing(&self, document_id: i64) -> SiftResult<()> {
        self.update(document_id, ParsingStatus::Processing, None).await
    }

    pub async fn report(&self, document_id: i64, result: &ProcessingResult) -> SiftResult<()> {
        let message = match result.status {
            JobStatus::Failed => result.error.as_deref(),
            JobStatus::Completed => None,
        };
        self.update(document_id, result.status.into(), message).await
    }

    /// For failures that escaped the job itself (panics, lost sessions).
    pub async fn report_unexpected(&self, document_id: i64, message: &str) -> SiftResult<()> {
        self.update(document_id, ParsingStatus::Failed, Some(message)).await
    }

    async fn update(
        &self,
        document_id: i64,
        status: ParsingStatus,
        message: Option<&str>,
    ) -> SiftResult<()> {
        let updated = self.db.set_parsing_status(document_id, status, message).await?;
        if updated == 0 {
            warn!(document_id, "Document not found; status {} not recorded", status);
        } else {
            info!(document_id, %status, "Document status updated");
        }
        Ok(())
    }
}
