use thiserror::Error;

use crate::redact::redact_sql;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Error raised by a driver implementation.
///
/// Drivers report failures as plain messages so that engine errors stay `Clone`
/// and one script failure can be attributed to every call in that script.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<duckdb::Error> for DriverError {
    fn from(err: duckdb::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Coarse error category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Format,
    Build,
    Execution,
    Transfer,
    Resource,
    Config,
}

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Unknown column, empty required payload and similar caller mistakes.
    #[error("validation error: {0}")]
    Validation(String),

    /// Arguments supplied to a procedure call that it does not declare.
    #[error("argument mismatch for procedure {procedure}: unexpected arguments {unexpected:?}")]
    ArgumentMismatch {
        procedure: String,
        unexpected: Vec<String>,
    },

    /// Malformed date/time/number/boolean literal.
    #[error("format error: cannot read {literal:?} as {expected}")]
    Format { literal: String, expected: String },

    #[error("build error: {0}")]
    Build(String),

    #[error("execution error in {context}: {message} (sql: {sql})")]
    Execution {
        message: String,
        sql: String,
        context: String,
    },

    #[error("transfer error in {context}: {message}{}", render_sql(.sql))]
    Transfer {
        message: String,
        sql: Option<String>,
        context: String,
    },

    #[error("resource error: {0}")]
    Resource(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::ArgumentMismatch { .. } => ErrorKind::Validation,
            CoreError::Format { .. } => ErrorKind::Format,
            CoreError::Build(_) => ErrorKind::Build,
            CoreError::Execution { .. } => ErrorKind::Execution,
            CoreError::Transfer { .. } => ErrorKind::Transfer,
            CoreError::Resource(_) => ErrorKind::Resource,
            CoreError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn format(literal: &str, expected: impl Into<String>) -> Self {
        CoreError::Format {
            literal: literal.to_string(),
            expected: expected.into(),
        }
    }

    /// Wraps a driver failure; the SQL is redacted before it is stored.
    pub fn execution(err: DriverError, sql: &str, context: impl Into<String>) -> Self {
        CoreError::Execution {
            message: err.message,
            sql: redact_sql(sql),
            context: context.into(),
        }
    }

    pub fn transfer(message: impl Into<String>, context: impl Into<String>) -> Self {
        CoreError::Transfer {
            message: message.into(),
            sql: None,
            context: context.into(),
        }
    }

    pub fn transfer_sql(err: DriverError, sql: &str, context: impl Into<String>) -> Self {
        CoreError::Transfer {
            message: err.message,
            sql: Some(redact_sql(sql)),
            context: context.into(),
        }
    }
}

fn render_sql(sql: &Option<String>) -> String {
    sql.as_deref()
        .map(|s| format!(" (sql: {s})"))
        .unwrap_or_default()
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        // Row and array readers tunnel engine errors through io::Error.
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<CoreError>()) {
            return inner.clone();
        }
        CoreError::transfer(err.to_string(), "io")
    }
}

impl From<CoreError> for std::io::Error {
    fn from(err: CoreError) -> Self {
        std::io::Error::other(err)
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::Config(err.to_string())
    }
}
