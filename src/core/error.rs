//! Core error types with rich error code system

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use super::error_code::*;

/// Position reported by the external parser for a syntax error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Where an error happened: the sub-expression text and the element path of the focus
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorSite {
    pub expression: Option<String>,
    pub path: Option<String>,
}

impl fmt::Display for ErrorSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(expression) = &self.expression {
            write!(f, " in '{expression}'")?;
        }
        if let Some(path) = &self.path {
            write!(f, " at {path}")?;
        }
        Ok(())
    }
}

/// Main FHIRPath error type
#[derive(Debug, Clone, Error)]
pub enum FhirPathError {
    /// Parse tree rejected; parser-supplied messages and positions pass through unchanged
    #[error("{error_code}: {message}{}", .location.as_ref().map(|l| format!(" at {l}")).unwrap_or_default())]
    SyntaxError {
        error_code: ErrorCode,
        message: String,
        location: Option<SourceLocation>,
    },

    /// Wrong arity, wrong argument kind, non-singleton or operand type mismatch
    #[error("{error_code}: {message}{site}")]
    TypeError {
        error_code: ErrorCode,
        message: String,
        site: ErrorSite,
    },

    /// Runtime failure that is not a type error
    #[error("{error_code}: {message}{site}")]
    EvaluationError {
        error_code: ErrorCode,
        message: String,
        site: ErrorSite,
    },

    /// Read of an environment variable with no binding in scope
    #[error("FP0060: Attempting to access an undefined environment variable: {name}{site}")]
    UndefinedVariable { name: String, site: ErrorSite },

    /// An async function was reached while async mode is off
    #[error(
        "FP0101: The asynchronous function \"{function}\" is not allowed. Set the async mode to Allowed or Always to enable it."
    )]
    AsyncNotAllowed { function: String },

    /// The cancellation token fired before or during evaluation
    #[error("FP0102: Evaluation was cancelled")]
    Cancelled,

    /// Network or protocol failure while resolving externally
    #[error("{error_code}: {message}{}", .url.as_ref().map(|u| format!(" ({u})")).unwrap_or_default())]
    ExternalResolution {
        error_code: ErrorCode,
        message: String,
        url: Option<String>,
    },
}

impl FhirPathError {
    pub fn syntax_error(
        error_code: ErrorCode,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) -> Self {
        Self::SyntaxError {
            error_code,
            message: message.into(),
            location,
        }
    }

    pub fn type_error(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self::TypeError {
            error_code,
            message: message.into(),
            site: ErrorSite::default(),
        }
    }

    pub fn evaluation_error(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self::EvaluationError {
            error_code,
            message: message.into(),
            site: ErrorSite::default(),
        }
    }

    pub fn undefined_variable(name: impl Into<String>) -> Self {
        Self::UndefinedVariable {
            name: name.into(),
            site: ErrorSite::default(),
        }
    }

    pub fn async_not_allowed(function: impl Into<String>) -> Self {
        Self::AsyncNotAllowed {
            function: function.into(),
        }
    }

    pub fn external(
        error_code: ErrorCode,
        message: impl Into<String>,
        url: Option<String>,
    ) -> Self {
        Self::ExternalResolution {
            error_code,
            message: message.into(),
            url,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::SyntaxError { error_code, .. }
            | Self::TypeError { error_code, .. }
            | Self::EvaluationError { error_code, .. }
            | Self::ExternalResolution { error_code, .. } => *error_code,
            Self::UndefinedVariable { .. } => FP0060,
            Self::AsyncNotAllowed { .. } => FP0101,
            Self::Cancelled => FP0102,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn site_mut(&mut self) -> Option<&mut ErrorSite> {
        match self {
            Self::TypeError { site, .. }
            | Self::EvaluationError { site, .. }
            | Self::UndefinedVariable { site, .. } => Some(site),
            _ => None,
        }
    }

    /// Attach the sub-expression text unless a more specific one is already set
    pub fn with_expression(mut self, expression: impl fmt::Display) -> Self {
        if let Some(site) = self.site_mut() {
            if site.expression.is_none() {
                site.expression = Some(expression.to_string());
            }
        }
        self
    }

    /// Attach the element path of the focus unless one is already set
    pub fn with_path(mut self, path: Option<String>) -> Self {
        if let Some(site) = self.site_mut() {
            if site.path.is_none() {
                site.path = path;
            }
        }
        self
    }

    /// The sub-expression text recorded for this error, if any
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::TypeError { site, .. }
            | Self::EvaluationError { site, .. }
            | Self::UndefinedVariable { site, .. } => site.expression.as_deref(),
            _ => None,
        }
    }

    /// The element path recorded for this error, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::TypeError { site, .. }
            | Self::EvaluationError { site, .. }
            | Self::UndefinedVariable { site, .. } => site.path.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for FHIRPath operations
pub type Result<T> = std::result::Result<T, FhirPathError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_error_message_carries_site() {
        let err = FhirPathError::type_error(FP0052, "Expected a single item, found 2")
            .with_expression("Patient.name.given")
            .with_path(Some("Patient.name[0]".to_string()));

        assert_eq!(
            err.to_string(),
            "FP0052: Expected a single item, found 2 in 'Patient.name.given' at Patient.name[0]"
        );
    }

    #[test]
    fn test_innermost_expression_wins() {
        let err = FhirPathError::undefined_variable("v")
            .with_expression("%v")
            .with_expression("select(%v)");

        assert_eq!(err.expression(), Some("%v"));
        assert_eq!(err.error_code(), FP0060);
    }

    #[test]
    fn test_syntax_error_location() {
        let err = FhirPathError::syntax_error(FP0001, "mismatched input", Some(SourceLocation::new(1, 7)));
        assert_eq!(err.to_string(), "FP0001: mismatched input at 1:7");
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(FhirPathError::Cancelled.is_cancellation());
        assert!(!FhirPathError::async_not_allowed("memberOf").is_cancellation());
    }
}
