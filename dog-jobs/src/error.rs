use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Job type not registered: {0}")]
    UnknownType(String),

    #[error("Could not construct handler '{name}': {reason}")]
    HandlerConstruction { name: String, reason: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Whether the error means the store could not be reached
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Handler-level failure, captured into a job's `error_details`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The handler ran and reported a failure
    #[error("{0}")]
    Failed(String),

    /// The job arguments did not match what the handler expects
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The handler needs credentials the worker was not given
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl JobError {
    /// Create a generic execution failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create an argument validation failure
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Failed(msg) | Self::InvalidArgs(msg) | Self::MissingCredentials(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::JobNotFound(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_message() {
        assert_eq!(JobError::failed("boom").message(), "boom");
        assert_eq!(JobError::invalid_args("no recipient").to_string(), "invalid arguments: no recipient");
    }

    #[test]
    fn test_store_unavailable_classification() {
        assert!(QueueError::StoreUnavailable("down".into()).is_store_unavailable());
        assert!(!QueueError::UnknownType("LogQueueable".into()).is_store_unavailable());
    }
}
