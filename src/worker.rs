use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::config::ProcessingConfig;
use crate::database::{Database, SqliteRecordSink};
use crate::error::{SiftError, SiftResult};
use crate::extractor::TableExtractor;
use crate::processing::{JobOutcome, ProcessingJob, ProcessingResult};
use crate::status::StatusReporter;

pub type TaskReply = oneshot::Receiver<SiftResult<ProcessingResult>>;

/// Run one document end to end: mark it processing, run the job on a
/// blocking thread inside its own transaction, then record the terminal
/// status.
///
/// A job that fails normally still returns `Ok` with a failed result. `Err`
/// means the job never produced a result (panic, no database session) or the
/// final status could not be written; the document is marked failed first
/// whenever the database allows it.
pub async fn process_document_task<E>(
    db: &Database,
    extractor: Arc<E>,
    file_path: PathBuf,
    document_id: i64,
    fund_id: i64,
) -> SiftResult<ProcessingResult>
where
    E: TableExtractor + Send + Sync + 'static,
{
    let reporter = StatusReporter::new(db.clone());
    reporter.mark_processing(document_id).await?;

    let handle = Handle::current();
    let job_db = db.clone();
    let joined = tokio::task::spawn_blocking(move || -> SiftResult<JobOutcome> {
        let mut sink = SqliteRecordSink::begin(&job_db, handle)?;
        let job = ProcessingJob::new(&*extractor);
        Ok(job.run(&mut sink, &file_path, document_id, fund_id))
    })
    .await;

    let outcome = match joined {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => return Err(fail_unexpected(&reporter, document_id, e).await),
        Err(join_err) => {
            let e = SiftError::job(format!("job aborted: {}", join_err));
            return Err(fail_unexpected(&reporter, document_id, e).await);
        }
    };

    if let Err(e) = reporter.report(document_id, &outcome.result).await {
        crate::log_error!(e, "status report");
        let message = match &outcome.result.error {
            Some(job_error) => format!("{}; status not recorded: {}", job_error, e),
            None => format!("status {} not recorded: {}", outcome.result.status, e),
        };
        return Err(fail_unexpected(&reporter, document_id, SiftError::job(message)).await);
    }

    Ok(outcome.result)
}

async fn fail_unexpected(reporter: &StatusReporter, document_id: i64, e: SiftError) -> SiftError {
    crate::log_error!(e, "document task");
    if let Err(report_err) = reporter.report_unexpected(document_id, &e.to_string()).await {
        error!(document_id, "Could not mark document failed: {}", report_err);
    }
    e
}

struct Task {
    file_path: PathBuf,
    document_id: i64,
    fund_id: i64,
    reply: oneshot::Sender<SiftResult<ProcessingResult>>,
}

struct TaskContext<E> {
    db: Database,
    extractor: Arc<E>,
    max_retries: u32,
    retry_delay: Duration,
}

impl<E> TaskContext<E>
where
    E: TableExtractor + Send + Sync + 'static,
{
    async fn run_with_retries(&self, task: &Task) -> SiftResult<ProcessingResult> {
        let mut attempt = 0;
        loop {
            let result = process_document_task(
                &self.db,
                Arc::clone(&self.extractor),
                task.file_path.clone(),
                task.document_id,
                task.fund_id,
            )
            .await;

            match result {
                Err(e) if e.is_recoverable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        document_id = task.document_id,
                        attempt,
                        "Retrying after recoverable error: {}",
                        e
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                other => return other,
            }
        }
    }
}

/// Queue of documents processed by at most `parallel_workers` jobs at once.
pub struct Worker {
    tx: mpsc::Sender<Task>,
    dispatcher: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<E>(db: Database, extractor: Arc<E>, config: &ProcessingConfig) -> Self
    where
        E: TableExtractor + Send + Sync + 'static,
    {
        let workers = config.parallel_workers.max(1);
        let (tx, rx) = mpsc::channel(workers * 4);
        let ctx = Arc::new(TaskContext {
            db,
            extractor,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        });
        let dispatcher = tokio::spawn(dispatch(ctx, rx, Arc::new(Semaphore::new(workers))));
        info!("Worker started with {} parallel jobs", workers);
        Self { tx, dispatcher }
    }

    pub async fn submit(
        &self,
        file_path: impl Into<PathBuf>,
        document_id: i64,
        fund_id: i64,
    ) -> SiftResult<TaskReply> {
        let (reply, rx) = oneshot::channel();
        let task = Task {
            file_path: file_path.into(),
            document_id,
            fund_id,
            reply,
        };
        self.tx
            .send(task)
            .await
            .map_err(|_| SiftError::job("worker queue is closed"))?;
        Ok(rx)
    }

    /// Stop accepting work and wait for queued documents to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.dispatcher.await {
            error!("Worker dispatcher failed: {}", e);
        }
    }
}

async fn dispatch<E>(ctx: Arc<TaskContext<E>>, mut rx: mpsc::Receiver<Task>, slots: Arc<Semaphore>)
where
    E: TableExtractor + Send + Sync + 'static,
{
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = joined {
                    error!("Document task panicked: {}", e);
                }
            }
            next = rx.recv() => {
                let Some(task) = next else { break };
                // waiting here leaves later tasks in the bounded queue
                let permit = match Arc::clone(&slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let _ = task.reply.send(Err(SiftError::job("worker shut down")));
                        continue;
                    }
                };
                let ctx = Arc::clone(&ctx);
                running.spawn(async move {
                    let _permit = permit;
                    let result = ctx.run_with_retries(&task).await;
                    // the submitter may have stopped listening
                    let _ = task.reply.send(result);
                });
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!("Document task panicked: {}", e);
        }
    }
}
