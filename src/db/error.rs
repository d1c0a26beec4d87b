use std::fmt;
use thiserror::Error;

/// Code reported when a backend gives a message but no error number.
pub const GENERIC_ERROR_CODE: i64 = 1;

/// Categorized error types for SQL Server failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Incorrect syntax near a token
    Syntax,
    /// Missing object or column, ambiguous reference
    Semantic,
    /// Constraint violations, conversion failures, truncation
    Execution,
    /// Deadlocks and transaction state errors
    Transaction,
    /// Login and network failures
    Connection,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// The uniform (code, message) pair every backend error is reduced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: i64,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// An error from a backend that does not report error numbers.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(GENERIC_ERROR_CODE, message)
    }

    pub fn category(&self) -> ErrorCategory {
        categorize_error_number(self.code)
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Errors surfaced by the adapter. Nothing backend-specific leaks past this type.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("connection: {message}")]
    Connection { message: String },

    /// A statement reached the server and the server rejected it.
    #[error("{sql}: {message}")]
    Query {
        sql: String,
        code: i64,
        message: String,
    },

    #[error("not connected")]
    NotConnected,

    #[error("config: {message}")]
    Config { message: String },

    #[error("unsupported: {feature}")]
    Unsupported { feature: String },
}

impl AdapterError {
    pub fn query(sql: &str, error: NativeError) -> Self {
        AdapterError::Query {
            sql: sql.to_string(),
            code: error.code,
            message: error.message,
        }
    }

    pub fn connection(error: impl fmt::Display) -> Self {
        AdapterError::Connection {
            message: error.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        AdapterError::Config {
            message: message.into(),
        }
    }

    pub fn unsupported(feature: impl Into<String>) -> Self {
        AdapterError::Unsupported {
            feature: feature.into(),
        }
    }

    /// Backend error number, for query failures.
    pub fn code(&self) -> Option<i64> {
        match self {
            AdapterError::Query { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AdapterError::Query { code, .. } => categorize_error_number(*code),
            AdapterError::Connection { .. } | AdapterError::NotConnected => {
                ErrorCategory::Connection
            }
            _ => ErrorCategory::Unknown,
        }
    }
}

/// Categorize a SQL Server error number.
fn categorize_error_number(code: i64) -> ErrorCategory {
    match code {
        // Incorrect syntax near ..., near keyword ..., must declare variable
        102 | 105 | 156 | 170 | 137 => ErrorCategory::Syntax,
        // Invalid column name, invalid object name, ambiguous column
        207 | 208 | 209 | 4104 => ErrorCategory::Semantic,
        // Identity insert off, PK/unique violation, FK conflict, null into not-null,
        // conversion failures, truncation, divide by zero
        544 | 2627 | 2601 | 547 | 515 | 245 | 8114 | 8152 | 2628 | 8134 => {
            ErrorCategory::Execution
        }
        // Deadlock victim, transaction count mismatch
        1205 | 266 | 3902 | 3903 => ErrorCategory::Transaction,
        // Cannot open database, login failed, network errors
        4060 | 18456 | 10054 | 10060 | 53 => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}
