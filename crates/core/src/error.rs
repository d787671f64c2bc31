//! Core error types for resmgr.
//!
//! All errors are explicit and typed - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Core error type shared by the coordinator and the binary.
#[derive(Debug, Error)]
pub enum Error {
    // I/O errors
    #[error("failed to read file '{path}': {reason}")]
    FileReadFailed { path: PathBuf, reason: String },

    // Parsing errors
    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("TOML parse error: {reason}")]
    TomlParseFailed { reason: String },

    // Configuration errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Wire protocol errors
    #[error("unknown message kind {kind}")]
    UnknownMessageKind { kind: u32 },

    #[error("message kind {kind} is not valid in direction {direction}")]
    WrongDirection { kind: u32, direction: &'static str },

    #[error("message kind {kind} requires a resource id, got {resource}")]
    MissingResource { kind: u32, resource: i32 },
}

impl Error {
    /// Create a file read error.
    pub fn file_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a TOML parse error.
    pub fn toml_parse_failed(reason: impl Into<String>) -> Self {
        Self::TomlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether this error comes from decoding a message frame.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::UnknownMessageKind { .. }
                | Self::WrongDirection { .. }
                | Self::MissingResource { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_read_failed_mentions_path() {
        let err = Error::file_read_failed("/tmp/resmgr.toml", "not found");
        assert!(err.to_string().contains("/tmp/resmgr.toml"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_protocol_classification() {
        assert!(Error::UnknownMessageKind { kind: 42 }.is_protocol());
        assert!(
            Error::WrongDirection {
                kind: 1,
                direction: "worker->master"
            }
            .is_protocol()
        );
        assert!(!Error::invalid_config("slot_count must be positive").is_protocol());
    }
}
