// Error values for the two failure tiers: registration-time contract
// violations (caught by tests/CI when builtins load) and evaluation-time
// errors (converted into cell-local error values, never fatal).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder substituted with the registered function name at the call
/// site, so error text is written once per function and stays correct when
/// a function is registered under an alias.
pub const FUNCTION_NAME_PLACEHOLDER: &str = "[[FUNCTION_NAME]]";

/// User-visible error classes. The literal is what lands in the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Formula could not be parsed.
    BadExpr,
    /// Generic evaluation failure (bad argument, out-of-bounds index...).
    GenericError,
    /// Division by zero.
    DivByZero,
    /// No result available (e.g. every element filtered out).
    NotAvailable,
    /// Circular reference between cells.
    Circular,
}

impl ErrorCode {
    pub fn literal(&self) -> &'static str {
        match self {
            ErrorCode::BadExpr => "#BAD_EXPR",
            ErrorCode::GenericError => "#ERROR",
            ErrorCode::DivByZero => "#DIV/0!",
            ErrorCode::NotAvailable => "#N/A",
            ErrorCode::Circular => "#CIRC!",
        }
    }

    /// Map a cell error literal back to its code. Unknown literals (e.g. a
    /// foreign `#REF!` imported from elsewhere) fall back to GenericError.
    pub fn from_literal(literal: &str) -> ErrorCode {
        match literal {
            "#BAD_EXPR" => ErrorCode::BadExpr,
            "#DIV/0!" => ErrorCode::DivByZero,
            "#N/A" => ErrorCode::NotAvailable,
            "#CIRC!" => ErrorCode::Circular,
            _ => ErrorCode::GenericError,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.literal())
    }
}

/// Evaluation-time error. Raised by the sanitizer and by `compute`
/// implementations; the evaluator substitutes [[FUNCTION_NAME]] and turns
/// it into an error payload for the one cell being computed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct EvalError {
    pub code: ErrorCode,
    pub message: String,
}

impl EvalError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn bad_expr(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadExpr, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GenericError, message)
    }

    pub fn div_by_zero() -> Self {
        Self::new(ErrorCode::DivByZero, "Division by zero")
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotAvailable, message)
    }

    pub fn circular() -> Self {
        Self::new(ErrorCode::Circular, "Circular reference")
    }

    /// Substitute the [[FUNCTION_NAME]] placeholder with the real name.
    pub fn named(mut self, function_name: &str) -> Self {
        if self.message.contains(FUNCTION_NAME_PLACEHOLDER) {
            self.message = self.message.replace(FUNCTION_NAME_PLACEHOLDER, function_name);
        }
        self
    }
}

/// Registration-time contract violation. Thrown synchronously when a
/// function is registered, never during evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("function {function}: argument '{arg}' combines META with other types")]
    MetaCombinedWithOtherTypes { function: String, arg: String },
    #[error("function {function}: non-repeating argument '{arg}' follows a repeating one")]
    NonRepeatingAfterRepeating { function: String, arg: String },
    #[error("function {function}: mandatory argument '{arg}' follows an optional one")]
    MandatoryAfterOptional { function: String, arg: String },
    #[error("function {function} is already registered")]
    DuplicateFunction { function: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_literals() {
        assert_eq!(ErrorCode::BadExpr.literal(), "#BAD_EXPR");
        assert_eq!(ErrorCode::GenericError.literal(), "#ERROR");
        assert_eq!(ErrorCode::DivByZero.literal(), "#DIV/0!");
        assert_eq!(ErrorCode::NotAvailable.literal(), "#N/A");
    }

    #[test]
    fn test_literal_roundtrip() {
        for code in [
            ErrorCode::BadExpr,
            ErrorCode::GenericError,
            ErrorCode::DivByZero,
            ErrorCode::NotAvailable,
            ErrorCode::Circular,
        ] {
            assert_eq!(ErrorCode::from_literal(code.literal()), code);
        }
        // Foreign literals degrade to the generic class
        assert_eq!(ErrorCode::from_literal("#REF!"), ErrorCode::GenericError);
    }

    #[test]
    fn test_placeholder_substitution() {
        let err = EvalError::generic("[[FUNCTION_NAME]] expects a number").named("SUM");
        assert_eq!(err.message, "SUM expects a number");

        // No placeholder: message untouched
        let err = EvalError::div_by_zero().named("AVERAGE");
        assert_eq!(err.message, "Division by zero");
    }
}
