use std::fs;
use tracing::info;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Registry,
    Layer,
};

use crate::config::LogConfig;
use crate::error::{SiftError, SiftResult};

/// Keeps the non-blocking file writer alive; hold it until exit.
#[derive(Default)]
pub struct LoggingGuard {
    #[cfg(feature = "advanced_logging")]
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // sqlx logs every statement at info
        EnvFilter::new(format!("fundsift={},sqlx=warn,{}", config.level, config.level))
    })
}

/// Initialize the logging system
pub fn init_logging(config: &LogConfig) -> SiftResult<LoggingGuard> {
    if config.enable_file_logging {
        fs::create_dir_all(&config.log_dir)
            .map_err(|e| SiftError::file_io(config.log_dir.to_string_lossy().to_string(), e))?;
    }

    let registry = Registry::default().with(env_filter(config));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .boxed();

    #[cfg(feature = "advanced_logging")]
    let guard = if config.enable_file_logging {
        let file_appender = tracing_appender::rolling::daily(&config.log_dir, "fundsift.log");
        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .boxed();

        registry
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| SiftError::configuration(format!("logging already initialized: {}", e)))?;
        LoggingGuard { _file: Some(guard) }
    } else {
        registry
            .with(console_layer)
            .try_init()
            .map_err(|e| SiftError::configuration(format!("logging already initialized: {}", e)))?;
        LoggingGuard { _file: None }
    };

    #[cfg(not(feature = "advanced_logging"))]
    let guard = {
        registry
            .with(console_layer)
            .try_init()
            .map_err(|e| SiftError::configuration(format!("logging already initialized: {}", e)))?;
        if config.enable_file_logging {
            tracing::warn!("File logging requested but built without the advanced_logging feature");
        }
        LoggingGuard::default()
    };

    info!("Log level: {}", config.level);
    if config.enable_file_logging {
        info!("File logging enabled: {}", config.log_dir.display());
    }

    Ok(guard)
}

/// Performance logging utilities
pub struct PerformanceTimer {
    start: std::time::Instant,
    operation: String,
}

impl PerformanceTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        tracing::debug!("Starting: {}", operation);
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    pub fn checkpoint(&self, checkpoint: &str) {
        tracing::debug!("{} - {}: {}ms", self.operation, checkpoint, self.elapsed_ms());
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        info!("Completed {}: {}ms", self.operation, self.elapsed_ms());
    }
}

/// Macro for logging with context
#[macro_export]
macro_rules! log_error {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            recoverable = $error.is_recoverable(),
            "fundsift error occurred"
        );
    };
}

#[macro_export]
macro_rules! log_job_start {
    ($file:expr, $document_id:expr, $fund_id:expr) => {
        tracing::info!(
            file = %$file,
            document_id = $document_id,
            fund_id = $fund_id,
            "Starting document processing"
        );
    };
}
