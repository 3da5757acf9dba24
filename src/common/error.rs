//! Error types for the workflow tester
//!
//! Configuration errors abort a run before anything is sent to the
//! execution service. Remote and IO errors are absorbed by the case runner
//! into the test result, so only assertion failures escape a completed run.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the workflow tester
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file '{path}': {message}")]
    ConfigParse { path: String, message: String },

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unknown comparator '{name}'. Available: {available}")]
    UnknownComparator { name: String, available: String },

    // === Execution Service Errors ===
    #[error("Execution service request '{operation}' failed: {message}")]
    Remote { operation: String, message: String },

    #[error("Workflow invocation failed: {0}")]
    InvocationFailed(String),

    #[error("Workflow invocation timed out after {0:?}")]
    Timeout(Duration),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Test Errors ===
    #[error("Test assertion failed: {0}")]
    TestAssertion(String),
}

impl Error {
    /// Create a remote request failed error
    pub fn remote(operation: &str, message: impl std::fmt::Display) -> Self {
        Self::Remote {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a configuration parse error for a file
    pub fn config_parse(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        Self::ConfigParse {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error must abort a run before any remote call
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse { .. }
                | Error::FileRead { .. }
                | Error::NotFound(_)
                | Error::UnknownComparator { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(Error::Config("no inputs".into()).is_configuration());
        assert!(Error::NotFound(PathBuf::from("wf.ga")).is_configuration());
        assert!(!Error::remote("create_session", "503").is_configuration());
        assert!(!Error::Timeout(Duration::from_secs(5)).is_configuration());
    }

    #[test]
    fn test_remote_message() {
        let err = Error::remote("upload_artifact", "connection reset");
        assert_eq!(
            err.to_string(),
            "Execution service request 'upload_artifact' failed: connection reset"
        );
    }
}
