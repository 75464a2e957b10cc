use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use crate::config::{ProcessingConfig, SiftConfig};
use crate::database::Database;
use crate::extractor::PdfTableExtractor;
use crate::processing::{MemorySink, ProcessingJob};
use crate::worker::Worker;

/// Print the effective configuration, or write it to `output`
pub fn config_command(config: &SiftConfig, output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            config.save_to_file(&path)?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", toml::to_string_pretty(config)?),
    }
    Ok(())
}

/// Create the database schema
pub async fn init_command(db: &Database, url: &str) -> Result<()> {
    db.init_schema().await?;
    println!("Database ready: {}", url);
    Ok(())
}

/// Register one statement and run it through the worker
pub async fn process_command(
    db: Database,
    extractor: Arc<PdfTableExtractor>,
    config: &ProcessingConfig,
    pdf_path: PathBuf,
    fund_id: i64,
) -> Result<()> {
    let document_id = db
        .register_document(&pdf_path, fund_id)
        .await
        .with_context(|| format!("registering {}", pdf_path.display()))?;

    let worker = Worker::spawn(db, extractor, config);
    let reply = worker.submit(&pdf_path, document_id, fund_id).await?;
    let outcome = reply.await.context("worker dropped the job")?;
    worker.shutdown().await;

    let result = outcome?;
    info!(document_id, status = %result.status, "Processing finished");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Register several statements and process them concurrently
pub async fn batch_command(
    db: Database,
    extractor: Arc<PdfTableExtractor>,
    config: &ProcessingConfig,
    pdf_paths: Vec<PathBuf>,
    fund_id: i64,
) -> Result<()> {
    let worker = Worker::spawn(db.clone(), extractor, config);

    let mut pending = Vec::with_capacity(pdf_paths.len());
    for path in pdf_paths {
        match db.register_document(&path, fund_id).await {
            Ok(document_id) => {
                let reply = worker.submit(&path, document_id, fund_id).await?;
                pending.push((path, document_id, reply));
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                println!(
                    "{}",
                    json!({ "file": path.display().to_string(), "error": e.user_message() })
                );
            }
        }
    }

    for (path, document_id, reply) in pending {
        let line = match reply.await {
            Ok(Ok(result)) => json!({
                "file": path.display().to_string(),
                "document_id": document_id,
                "result": result,
            }),
            Ok(Err(e)) => json!({
                "file": path.display().to_string(),
                "document_id": document_id,
                "error": e.to_string(),
            }),
            Err(_) => json!({
                "file": path.display().to_string(),
                "document_id": document_id,
                "error": "worker dropped the job",
            }),
        };
        println!("{}", line);
    }

    worker.shutdown().await;
    Ok(())
}

/// Dry run: show how each table is classified and routed, persist nothing
pub async fn inspect_command(extractor: Arc<PdfTableExtractor>, pdf_path: PathBuf) -> Result<()> {
    let outcome = tokio::task::spawn_blocking(move || {
        let mut sink = MemorySink::new();
        ProcessingJob::new(&*extractor).run(&mut sink, &pdf_path, 0, 0)
    })
    .await
    .context("inspect job aborted")?;

    for table in &outcome.tables {
        let kinds: Vec<&str> = table
            .kinds
            .iter()
            .map(|k| k.map_or("-", |k| k.as_str()))
            .collect();
        println!(
            "table {} ({:?}): {} | {} rows, {} records, {} skipped | {}",
            table.index,
            table.source,
            table.table_type,
            table.rows,
            table.records,
            table.skipped,
            kinds.join(" ")
        );
    }
    for issue in &outcome.issues {
        println!(
            "  {:?} table={:?} row={:?}: {}",
            issue.kind, issue.table, issue.row, issue.message
        );
    }
    println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    Ok(())
}

/// Show documents and their parsing status
pub async fn status_command(db: &Database, document_id: Option<i64>, limit: i64) -> Result<()> {
    let documents: Vec<_> = match document_id {
        Some(id) => db.get_document(id).await?.into_iter().collect(),
        None => db.list_documents(limit).await?,
    };

    if documents.is_empty() {
        println!("No documents found");
        return Ok(());
    }
    for doc in documents {
        println!(
            "{:>6}  fund {:<6} {:<10} {}{}",
            doc.id,
            doc.fund_id,
            doc.parsing_status,
            doc.file_path,
            doc.error_message
                .map(|m| format!("  ({})", m))
                .unwrap_or_default()
        );
    }
    Ok(())
}

/// Per-kind record counts and amount sums for a fund
pub async fn totals_command(db: &Database, fund_id: i64) -> Result<()> {
    let totals = db.fund_totals(fund_id).await?;
    println!("{}", serde_json::to_string_pretty(&totals)?);
    Ok(())
}
