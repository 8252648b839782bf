/// Error types for short-term memory operations.
///
/// Absence is not an error here. A missing key, an expired entry or an
/// unknown buffer is reported as `None`, `false` or an empty collection.
/// Capacity pressure is resolved by eviction and never surfaces either.
/// What remains are the conditions a caller genuinely has to handle.
use thiserror::Error;

/// The main error type for koru-stm operations.
#[derive(Error, Debug)]
pub enum StmError {
    /// An operation was invoked before `initialize()` or after `shutdown()`
    #[error("Short-term memory is not initialized")]
    NotInitialized,

    /// Configuration values are out of range
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which value was rejected and why
        reason: String,
    },

    /// A typed value could not be converted into a payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StmError {
    /// Shorthand for building an `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        StmError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Result type alias for koru-stm operations.
pub type StmResult<T> = Result<T, StmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StmError::NotInitialized.to_string(),
            "Short-term memory is not initialized"
        );
        assert_eq!(
            StmError::invalid_config("decay_rate must be within [0, 1]").to_string(),
            "Invalid configuration: decay_rate must be within [0, 1]"
        );
    }
}
