use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Embedding provider error: {0}")]
    Embedding(String),
    #[error("Generation provider error: {0}")]
    Generation(String),
    #[error("Provider timeout during {0}")]
    Timeout(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Processing error: {0}")]
    Processing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stable taxonomy code used in logs and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_input",
            Self::Extraction(_) => "extraction_failed",
            Self::Embedding(_) => "embedding_provider_error",
            Self::Generation(_) => "generation_provider_error",
            Self::Timeout(_) => "provider_timeout",
            Self::Cache(_) => "cache_error",
            Self::OpenAI(_) => "provider_error",
            Self::Database(_) => "storage_error",
            Self::NotFound(_) => "not_found",
            Self::Processing(_) => "processing_error",
            Self::Join(_) | Self::Io(_) | Self::Anyhow(_) | Self::InternalError(_) => {
                "internal_error"
            }
        }
    }

    /// Message safe to show an end user. Provider detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::NotFound(msg) => format!("Not found: {msg}"),
            Self::Extraction(_) => {
                "No readable text could be extracted from the document. \
                 Try uploading a cleaner copy."
                    .into()
            }
            Self::Timeout(_) => "The request took too long to complete. Please try again.".into(),
            _ => "The service could not complete your request. Please try again.".into(),
        }
    }

    /// Whether the failure is the caller's to fix rather than ours.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}
