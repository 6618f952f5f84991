//! Error types for the pipeline stages.

use thiserror::Error;

use super::artifact::ArtifactError;
use super::tool::ToolError;
use crate::queue::QueueError;
use crate::repository::DbError;
use crate::storage::ObjectStoreError;

/// Errors that abort a pipeline run. Per-document problems are reported in
/// the run summary instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Object store error: {0}")]
    Store(#[from] ObjectStoreError),

    #[error("Extraction tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Converge(#[from] ConvergeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the document update routine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// The result cannot be applied without producing inconsistent pages.
    #[error("Integrity error for document {doc_id}: {reason}")]
    Integrity { doc_id: i64, reason: String },

    #[error("Document {0} does not exist")]
    UnknownDocument(i64),

    #[error("Database error: {0}")]
    Database(#[from] DbError),
}

impl ConvergeError {
    /// Whether the error concerns only this document and the run may continue.
    pub fn is_per_document(&self) -> bool {
        !matches!(self, ConvergeError::Database(_))
    }
}
