//! Error types for croptag.
//!
//! This module defines the crate-level error type. Component-specific failures
//! that callers branch on (form validation, submission outcome, EPC parsing)
//! have their own enums next to the code that produces them.

use std::path::PathBuf;
use thiserror::Error;

use crate::epc::EpcError;

/// The main error type for croptag operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the registration log.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Scan Errors ===
    /// A tag identifier could not be parsed.
    #[error("invalid EPC {input:?}: {source}")]
    InvalidEpc {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        #[source]
        source: EpcError,
    },

    // === Backend Errors ===
    /// The backend URL is malformed.
    #[error("invalid backend URL {url}: {message}")]
    InvalidUrl {
        /// The URL as configured.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for croptag operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create an invalid EPC error.
    #[must_use]
    pub fn invalid_epc(input: impl Into<String>, source: EpcError) -> Self {
        Self::InvalidEpc {
            input: input.into(),
            source,
        }
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error came from the configuration layer.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad(_) | Self::ConfigValidation { .. })
    }

    /// Check if this error came from the registration log.
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. } | Self::DatabaseQuery(_) | Self::DatabaseMigration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_epc_display() {
        let err = Error::invalid_epc("ABC", EpcError::Length { len: 3 });
        let msg = err.to_string();
        assert!(msg.contains("\"ABC\""));
        assert!(msg.contains("got 3"));
    }

    #[test]
    fn test_invalid_url_display() {
        let err = Error::InvalidUrl {
            url: "ftp://x".to_string(),
            message: "unsupported scheme".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ftp://x"));
        assert!(msg.contains("unsupported scheme"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::config_validation("debounce_ms must be greater than 0");
        assert!(err.to_string().contains("debounce_ms"));
        assert!(err.is_config_error());
        assert!(!err.is_storage_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
            assert!(err.is_storage_error());
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
        assert!(err.is_storage_error());
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
