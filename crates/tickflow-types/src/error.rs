//! Unified error interface for Tickflow.
//!
//! This module provides the [`ErrorCode`] trait for standardized
//! error handling across all Tickflow crates.
//!
//! # Design
//!
//! All Tickflow error types implement [`ErrorCode`] to provide:
//!
//! - **Machine-readable codes**: for programmatic error handling and
//!   the per-system failure lists in tick results
//! - **Recoverability info**: for retry logic (scheduler retries,
//!   event-bus redelivery, circuit-breaker accounting)
//!
//! # Example
//!
//! ```
//! use tickflow_types::ErrorCode;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     NotFound(String),
//!     Timeout,
//! }
//!
//! impl ErrorCode for MyError {
//!     fn code(&self) -> &'static str {
//!         match self {
//!             Self::NotFound(_) => "NOT_FOUND",
//!             Self::Timeout => "TIMEOUT",
//!         }
//!     }
//!
//!     fn is_recoverable(&self) -> bool {
//!         matches!(self, Self::Timeout)
//!     }
//! }
//!
//! assert_eq!(MyError::Timeout.code(), "TIMEOUT");
//! assert!(MyError::Timeout.is_recoverable());
//! ```

/// Unified error code interface for Tickflow errors.
///
/// # Code Format
///
/// Error codes should be:
///
/// - **UPPER_SNAKE_CASE**: e.g., `"TIMEOUT"`, `"CYCLE_DETECTED"`
/// - **Prefix-namespaced per layer**: e.g., `"GRAPH_CYCLE"`,
///   `"BREAKER_OPEN"`, `"INFERENCE_FALLBACK_EXHAUSTED"`
/// - **Stable**: codes are an API contract and must not change
///
/// # Recoverability
///
/// An error is recoverable if retrying the operation may succeed:
/// timeouts, transient provider failures, full queues. Errors caused
/// by invalid definitions or exhausted budgets are not.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether a retry of the failed operation may succeed.
    fn is_recoverable(&self) -> bool;
}

/// Validates that an error code follows Tickflow conventions.
///
/// # Checks
///
/// 1. Code is not empty
/// 2. Code starts with the expected prefix
/// 3. Code is UPPER_SNAKE_CASE
///
/// # Panics
///
/// Panics with a descriptive message if validation fails. Intended
/// for use inside tests.
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();

    assert!(!code.is_empty(), "Error code must not be empty");

    assert!(
        code.starts_with(expected_prefix),
        "Error code '{}' must start with prefix '{}'",
        code,
        expected_prefix
    );

    assert!(
        is_upper_snake_case(code),
        "Error code '{}' must be UPPER_SNAKE_CASE",
        code
    );
}

/// Validates multiple error codes at once.
///
/// Use this to verify all variants of an error enum in one test.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    for err in errors {
        assert_error_code(err, expected_prefix);
    }
}

/// Checks if a string is UPPER_SNAKE_CASE.
fn is_upper_snake_case(s: &str) -> bool {
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
