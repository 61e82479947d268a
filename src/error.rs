use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// True only for errors that surface at construction time.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this error is recoverable. Recoverable errors degrade a
    /// single operation (miss or failed write); they never tear down the
    /// cache.
    pub fn is_recoverable(&self) -> bool {
        !self.is_configuration()
    }
}

/// Labels a failure with the operation it broke, folding foreign error
/// types (join errors, io errors) into [`Error::Operation`] on the way.
pub trait ErrorContext<T> {
    fn context(self, msg: &str) -> Result<T>;
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: std::fmt::Display> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| Error::Operation(format!("{}: {}", msg, e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Operation(format!("{}: {}", f(), e)))
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(err: bincode::error::EncodeError) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(err: bincode::error::DecodeError) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::Timeout(Duration::ZERO),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => Error::Connection(err.to_string()),
            _ => Error::Operation(err.to_string()),
        }
    }
}

/// Sink for runtime failures that the cache swallows instead of
/// propagating. Injectable so operators can route failures to their own
/// telemetry.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &Error, operation: &str, context: Option<&str>);
}

/// Default reporter: structured warning through `tracing`.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &Error, operation: &str, context: Option<&str>) {
        warn!(
            operation,
            context = context.unwrap_or(""),
            error = %error,
            "cache operation degraded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Config("bad".into()).is_configuration());
        assert!(!Error::Config("bad".into()).is_recoverable());
        assert!(Error::Connection("refused".into()).is_recoverable());
        assert!(Error::Timeout(Duration::from_secs(5)).is_recoverable());
    }

    #[test]
    fn test_context_wraps_message() {
        let res: Result<()> = Err(Error::Operation("boom".into()));
        let err = res.context("backend set").unwrap_err();
        assert!(err.to_string().contains("backend set"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_context_folds_foreign_errors() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::other("disk"));
        let err = res.context("load snapshot").unwrap_err();
        assert!(matches!(err, Error::Operation(_)));
        assert!(err.to_string().contains("load snapshot"));
    }

    #[test]
    fn test_json_error_conversion() {
        let err = serde_json::from_str::<u64>("not-a-number").unwrap_err();
        assert!(matches!(Error::from(err), Error::Serialization(_)));
    }

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert!(matches!(Error::from(refused), Error::Connection(_)));
        let other = std::io::Error::other("disk");
        assert!(matches!(Error::from(other), Error::Operation(_)));
    }
}
