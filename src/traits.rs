use crate::model::{ItemDescriptor, StructuredRecord};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid item descriptor at line {line}: {reason}")]
    InvalidItem { line: usize, reason: String },
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Invalid filter: {0}")]
    Filter(#[from] regex::Error),
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Output rejected record: {0}")]
    Rejected(String),
}

/// The lazy sequence of item descriptors feeding a run.
pub type ItemStream = Box<dyn Iterator<Item = Result<ItemDescriptor, InputError>> + Send>;

/// Source of items to harvest.
///
/// Enumeration is finite and not restartable: every call to [`items`](Input::items)
/// starts a fresh walk. Iteration may block and is driven from a blocking thread.
pub trait Input: Send + Sync {
    /// Short name used in logs (e.g., "file_system").
    fn name(&self) -> &str;

    fn items(&self) -> Result<ItemStream, InputError>;
}

/// Destination for completed records.
#[async_trait]
pub trait Output: Send + Sync {
    /// Short name used in logs and failure reports (e.g., "json_file").
    fn name(&self) -> &str;

    /// Writes one record. Called concurrently from several item tasks.
    async fn export(&self, record: &StructuredRecord) -> Result<(), OutputError>;

    /// Flushes anything buffered. Called once after the input is exhausted.
    async fn finish(&self) -> Result<(), OutputError> {
        Ok(())
    }
}
