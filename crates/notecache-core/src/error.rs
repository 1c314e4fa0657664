//! Error types for notecache.

use thiserror::Error;

/// Result type alias using notecache's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for notecache operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Host application call failed (vault read, thumbnail render)
    #[error("Host error: {0}")]
    Host(String),

    /// Content provider failed to generate content
    #[error("Provider error: {0}")]
    Provider(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Work was abandoned because the cache session is stopped
    #[error("Cache session stopped")]
    Stopped,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("notes/a.md".to_string());
        assert_eq!(err.to_string(), "Not found: notes/a.md");
    }

    #[test]
    fn test_error_display_host() {
        let err = Error::Host("vault unavailable".to_string());
        assert_eq!(err.to_string(), "Host error: vault unavailable");
    }

    #[test]
    fn test_error_display_provider() {
        let err = Error::Provider("preview failed".to_string());
        assert_eq!(err.to_string(), "Provider error: preview failed");
    }

    #[test]
    fn test_error_display_stopped() {
        assert_eq!(Error::Stopped.to_string(), "Cache session stopped");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
