use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;

use fundsift::cli;
use fundsift::config::SiftConfig;
use fundsift::database::Database;
use fundsift::extractor::PdfTableExtractor;
use fundsift::logging::init_logging;

#[derive(Parser)]
#[command(name = "fundsift")]
#[command(about = "Extract capital calls, distributions and adjustments from fund statement PDFs")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (overrides configuration)
    #[arg(long, global = true)]
    database: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Process one statement and record its transactions
    Process {
        pdf: PathBuf,
        #[arg(long)]
        fund_id: i64,
    },
    /// Process several statements concurrently
    Batch {
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,
        #[arg(long)]
        fund_id: i64,
    },
    /// Show table classification and routing without saving anything
    Inspect { pdf: PathBuf },
    /// Show documents and their parsing status
    Status {
        #[arg(long)]
        document_id: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Record counts and amount sums for a fund
    Totals {
        #[arg(long)]
        fund_id: i64,
    },
    /// Print the effective configuration or write it to a file
    Config {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SiftConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database {
        config.database.url = url;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _log_guard = init_logging(&config.logging)?;
    debug!(?config, "Configuration loaded");

    match cli.command {
        Commands::Config { output } => cli::config_command(&config, output),
        Commands::Inspect { pdf } => {
            let extractor = Arc::new(PdfTableExtractor::new(&config.extraction)?);
            cli::inspect_command(extractor, pdf).await
        }
        Commands::Init => {
            let db = open_database(&config).await?;
            cli::init_command(&db, &config.database.url).await
        }
        Commands::Process { pdf, fund_id } => {
            let db = open_database(&config).await?;
            let extractor = Arc::new(PdfTableExtractor::new(&config.extraction)?);
            cli::process_command(db, extractor, &config.processing, pdf, fund_id).await
        }
        Commands::Batch { pdfs, fund_id } => {
            let db = open_database(&config).await?;
            let extractor = Arc::new(PdfTableExtractor::new(&config.extraction)?);
            cli::batch_command(db, extractor, &config.processing, pdfs, fund_id).await
        }
        Commands::Status { document_id, limit } => {
            let db = open_database(&config).await?;
            cli::status_command(&db, document_id, limit).await
        }
        Commands::Totals { fund_id } => {
            let db = open_database(&config).await?;
            cli::totals_command(&db, fund_id).await
        }
    }
}

async fn open_database(config: &SiftConfig) -> Result<Database> {
    let db = Database::connect(&config.database).await?;
    db.init_schema().await?;
    Ok(db)
}
