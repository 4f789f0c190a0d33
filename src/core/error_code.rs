//! Error code system in the style of compiler diagnostics (FP0001, FP0051, ...)
//!
//! Codes are grouped by the stage that raises them so callers can branch on
//! [`ErrorCategory`] without matching individual numbers.

use std::fmt;

/// Error categories for organizing error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Parse-tree errors surfaced from the external parser (FP0001-FP0050)
    Syntax,
    /// Arity, singleton and type errors (FP0051-FP0063)
    Type,
    /// Other runtime failures (FP0064-FP0100)
    Evaluation,
    /// Async mode and cancellation (FP0101-FP0150)
    Execution,
    /// Terminology and reference resolution (FP0200-FP0250)
    External,
}

/// Error code rendered as `FP0000`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub code: u16,
}

impl ErrorCode {
    pub const fn new(code: u16) -> Self {
        Self { code }
    }

    /// Full error code string (e.g. "FP0051")
    pub fn code_str(&self) -> String {
        format!("FP{:04}", self.code)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code {
            1..=50 => ErrorCategory::Syntax,
            51..=63 => ErrorCategory::Type,
            64..=100 => ErrorCategory::Evaluation,
            101..=150 => ErrorCategory::Execution,
            _ => ErrorCategory::External,
        }
    }

    /// Short human-readable title
    pub fn title(&self) -> &'static str {
        match self.code {
            1 => "Invalid parse tree",
            2 => "Unknown parse node type",
            3 => "Malformed literal",
            51 => "Type mismatch",
            52 => "Singleton expected",
            53 => "Invalid function arguments",
            54 => "Unknown function",
            55 => "Wrong number of arguments",
            56 => "Incompatible units",
            57 => "Invalid type specifier",
            60 => "Variable not defined",
            64 => "Variable already defined",
            65 => "Invalid regular expression",
            66 => "Recursion limit exceeded",
            67 => "Invalid date/time value",
            101 => "Async function not allowed",
            102 => "Evaluation cancelled",
            200 => "External resolution failed",
            201 => "Terminology server not configured",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FP{:04}", self.code)
    }
}

// Syntax errors (FP0001-FP0050)

/// The parse tree is structurally invalid (missing children, wrong shape)
pub const FP0001: ErrorCode = ErrorCode::new(1);
/// A node carries a `type` label outside the known set
pub const FP0002: ErrorCode = ErrorCode::new(2);
/// A literal's text cannot be interpreted
pub const FP0003: ErrorCode = ErrorCode::new(3);

// Type errors (FP0051-FP0063)

/// Operand types do not fit the operator or function
pub const FP0051: ErrorCode = ErrorCode::new(51);
/// More than one item where a single item was required
pub const FP0052: ErrorCode = ErrorCode::new(52);
/// Argument kind or value not accepted
pub const FP0053: ErrorCode = ErrorCode::new(53);
/// No function registered under the invoked name
pub const FP0054: ErrorCode = ErrorCode::new(54);
/// Argument count not declared for the function
pub const FP0055: ErrorCode = ErrorCode::new(55);
/// Quantity units are not dimensionally convertible
pub const FP0056: ErrorCode = ErrorCode::new(56);
/// Type specifier does not name a known type
pub const FP0057: ErrorCode = ErrorCode::new(57);

/// Environment variable read without a binding in scope
pub const FP0060: ErrorCode = ErrorCode::new(60);

// Evaluation errors (FP0064-FP0100)

/// `defineVariable` tried to shadow an existing name
pub const FP0064: ErrorCode = ErrorCode::new(64);
/// Regular expression failed to compile
pub const FP0065: ErrorCode = ErrorCode::new(65);
/// Expression nesting exceeded the configured depth
pub const FP0066: ErrorCode = ErrorCode::new(66);
/// Date/time arithmetic produced an unrepresentable value
pub const FP0067: ErrorCode = ErrorCode::new(67);

// Execution errors (FP0101-FP0150)

/// Async function reached while async mode is off
pub const FP0101: ErrorCode = ErrorCode::new(101);
/// Cancellation token fired
pub const FP0102: ErrorCode = ErrorCode::new(102);

// External resolution (FP0200-FP0250)

/// Network or protocol failure talking to a terminology or FHIR server
pub const FP0200: ErrorCode = ErrorCode::new(200);
/// Operation needs a server URL that was not configured
pub const FP0201: ErrorCode = ErrorCode::new(201);
