use thiserror::Error;

/// Main error type for the fundsift pipeline
#[derive(Error, Debug)]
pub enum SiftError {
    #[error("Failed to open document {path}: {message}")]
    DocumentOpen {
        path: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Table extraction failed ({extractor}): {message}")]
    Extraction { extractor: String, message: String },

    #[error("Text extraction failed on page {page} of {pages}: {message}")]
    PageExtraction {
        page: u32,
        pages: usize,
        message: String,
    },

    #[error("Row could not be recorded: {message}")]
    RowBuild { message: String },

    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("File I/O error: {path}")]
    FileIO {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Processing job failed: {message}")]
    Job { message: String },

    #[error("General error: {0}")]
    General(#[from] anyhow::Error),
}

impl SiftError {
    /// Create a document open error without an underlying source
    pub fn document_open(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DocumentOpen {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a document open error with source
    pub fn document_open_with_source(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DocumentOpen {
            path: path.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn extraction(extractor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            extractor: extractor.into(),
            message: message.into(),
        }
    }

    /// A page of an opened document whose text could not be read
    pub fn page_extraction(page: u32, pages: usize, message: impl Into<String>) -> Self {
        Self::PageExtraction {
            page,
            pages,
            message: message.into(),
        }
    }

    pub fn row_build(message: impl Into<String>) -> Self {
        Self::RowBuild {
            message: message.into(),
        }
    }

    /// Create a database error
    pub fn database(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source,
        }
    }

    /// Create a file I/O error
    pub fn file_io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileIO {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn job(message: impl Into<String>) -> Self {
        Self::Job {
            message: message.into(),
        }
    }

    /// Whether the task boundary may retry the document after this error.
    ///
    /// An unreadable document fails the same way every time; a busy or
    /// locked database usually does not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SiftError::DocumentOpen { .. } => false,
            SiftError::Configuration { .. } => false,
            SiftError::RowBuild { .. } => true,
            SiftError::Extraction { .. } => true,
            SiftError::PageExtraction { .. } => false,
            SiftError::Database { .. } => true,
            SiftError::FileIO { .. } => true,
            SiftError::Job { .. } => false,
            SiftError::General(_) => false,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SiftError::DocumentOpen { path, .. } => {
                format!("Could not open {}. It might be encrypted, corrupted, or not a PDF.", path)
            }
            SiftError::Extraction { extractor, .. } => {
                format!("The {} table extractor failed; results may be incomplete.", extractor)
            }
            SiftError::PageExtraction { page, .. } => {
                format!("Page {} could not be read; the document was not recorded.", page)
            }
            SiftError::RowBuild { .. } => "A table row was skipped.".to_string(),
            SiftError::Database { .. } => {
                "Database error occurred. Extracted records might not be saved.".to_string()
            }
            SiftError::FileIO { .. } => {
                "File access error. Check file permissions and disk space.".to_string()
            }
            SiftError::Configuration { message } => format!("Invalid configuration: {}", message),
            _ => "Something went wrong. Check the logs for details.".to_string(),
        }
    }
}

/// Result type alias for convenience
pub type SiftResult<T> = Result<T, SiftError>;

/// Error context for adding additional information
pub trait ErrorContext<T> {
    fn with_db_context(self, operation: &str) -> SiftResult<T>;
}

impl<T> ErrorContext<T> for Result<T, sqlx::Error> {
    fn with_db_context(self, operation: &str) -> SiftResult<T> {
        self.map_err(|e| SiftError::database(operation, e))
    }
}
