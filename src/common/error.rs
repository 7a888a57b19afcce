//! Crate-level Error Type
//!
//! Aggregates the per-subsystem errors for callers that drive the whole
//! service (the binary, embedding applications).

use thiserror::Error;

/// Root error type
#[derive(Debug, Error)]
pub enum CanopyError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Store errors
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// File codec errors
    #[error("file error: {0}")]
    File(#[from] crate::sync::FileError),

    /// Sync scheduler errors
    #[error("sync error: {0}")]
    Sync(#[from] crate::sync::SyncError),

    /// Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] crate::sync::TransportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CanopyError {
    /// Get error code for API responses and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            CanopyError::Config(_) => "CONFIG_ERROR",
            CanopyError::Logging(_) => "LOGGING_ERROR",
            CanopyError::Store(_) => "STORE_ERROR",
            CanopyError::File(_) => "FILE_ERROR",
            CanopyError::Sync(_) => "SYNC_ERROR",
            CanopyError::Transport(_) => "TRANSPORT_ERROR",
            CanopyError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using CanopyError
pub type Result<T> = std::result::Result<T, CanopyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_error_codes() {
        let err: CanopyError = StoreError::NoChange.into();
        assert_eq!(err.error_code(), "STORE_ERROR");
        assert!(err.to_string().contains("no change"));
    }
}
