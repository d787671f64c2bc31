//! Result type definition and extension traits.
//!
//! Provides combinators for Result types so callers can log and move on
//! without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for resmgr core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for any displayable error.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self, context: &str) -> Option<T>;

    /// Get the value or a default, logging the error if present.
    fn or_default_logged(self, context: &str, default: T) -> T;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn or_default_logged(self, context: &str, default: T) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "{context}, using default");
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_into_option_ok() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.into_option_logged("reading"), Some(42));
    }

    #[test]
    fn test_result_into_option_err() {
        let result: Result<i32> = Err(Error::invalid_config("bad"));
        assert_eq!(result.into_option_logged("reading"), None);
    }

    #[test]
    fn test_or_default_logged() {
        let parsed: std::result::Result<u64, std::num::ParseIntError> = "x".parse();
        assert_eq!(parsed.or_default_logged("parsing seed", 7), 7);
    }
}
