//! Error types for the queue engine

use thiserror::Error;

/// Main error type for jobq
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input from the caller (empty command, bad priority, unknown
    /// config key, duplicate job id, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Job id does not exist in the store
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The requested state transition is not legal from the job's
    /// current state
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The store lock could not be acquired within the bounded wait
    #[error("Could not acquire store lock within {waited_ms}ms")]
    LockTimeout { waited_ms: u64 },

    /// Reading, writing, or renaming a data file failed
    #[error("Store I/O error: {0}")]
    Store(#[from] std::io::Error),

    /// On-disk JSON could not be parsed or produced
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

// Common error constructors
impl Error {
    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new precondition error
    pub fn precondition<T: Into<String>>(msg: T) -> Self {
        Error::Precondition(msg.into())
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Precondition(_) => "precondition",
            Error::LockTimeout { .. } => "lock_timeout",
            Error::Store(_) => "store_io",
            Error::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::validation("Command cannot be empty");
        assert_eq!(err.to_string(), "Validation error: Command cannot be empty");
        assert_eq!(err.category(), "validation");

        let err = Error::LockTimeout { waited_ms: 5000 };
        assert!(err.to_string().contains("5000ms"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert_eq!(err.category(), "store_io");
    }
}
