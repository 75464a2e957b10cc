pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod parse;
pub mod processing;
pub mod records;
pub mod router;
pub mod status;
pub mod table;
pub mod worker;

pub use error::{SiftError, SiftResult};
pub use processing::{JobStatus, ProcessingJob, ProcessingResult, RecordSink};
