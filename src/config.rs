use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use anyhow::{Result, anyhow};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub database: DatabaseConfig,
    pub extraction: ExtractionConfig,
    pub processing: ProcessingConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL
    pub url: String,

    pub max_connections: u32,

    /// Create the SQLite file when it does not exist yet
    pub create_if_missing: bool,

    /// How long a statement waits on a locked database before failing
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Minimum cells for a text line to count as a table row
    pub min_columns: usize,

    /// Run of spaces that separates two columns in page text
    pub column_gap: usize,

    /// Enable the external secondary extractor
    pub enable_secondary: bool,

    /// argv of an external extractor printing JSON tables; the PDF path is appended
    pub secondary_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of documents processed concurrently by the worker
    pub parallel_workers: usize,

    /// Retries of a document after an unexpected job failure
    pub max_retries: u32,

    /// Delay before a retry, in milliseconds
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub enable_file_logging: bool,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            extraction: ExtractionConfig::default(),
            processing: ProcessingConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://fundsift.db".to_string(),
            max_connections: 5,
            create_if_missing: true,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_columns: 2,
            column_gap: 2,
            enable_secondary: true,
            secondary_command: None,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 4,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            enable_file_logging: false,
        }
    }
}

impl SiftConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: SiftConfig = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

        Ok(config)
    }

    /// Defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("FUNDSIFT_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(level) = std::env::var("FUNDSIFT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(workers) = std::env::var("FUNDSIFT_PARALLEL_WORKERS") {
            if let Ok(value) = workers.parse::<usize>() {
                self.processing.parallel_workers = value;
            }
        }

        if let Ok(command) = std::env::var("FUNDSIFT_SECONDARY_COMMAND") {
            let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
            self.extraction.secondary_command = if argv.is_empty() { None } else { Some(argv) };
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.parallel_workers == 0 {
            return Err(anyhow!("processing.parallel_workers must be at least 1"));
        }
        if self.extraction.min_columns < 2 {
            return Err(anyhow!("extraction.min_columns must be at least 2"));
        }
        if self.extraction.column_gap == 0 {
            return Err(anyhow!("extraction.column_gap must be at least 1"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| anyhow!("Failed to write config file: {}", e))?;

        Ok(())
    }
}
