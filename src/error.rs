use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("workspace database not ready: {0}")]
    NotReady(String),

    #[error("no code deployed")]
    NoCode,

    #[error("compile error: {0}")]
    CompileError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("query timeout")]
    QueryTimeout,

    #[error("execution timeout: {0}")]
    Timeout(String),

    #[error("execution interrupted: {0}")]
    Interrupted(String),

    #[error("{0}")]
    HandlerError(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable name, shared by the admin envelope and the
    /// sandbox database bridge.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Database(_) => "Database",
            Error::Io(_) => "Io",
            Error::NotFound(_) => "NotFound",
            Error::TableNotFound(_) => "TableNotFound",
            Error::TableExists(_) => "TableExists",
            Error::NotReady(_) => "NotReady",
            Error::NoCode => "NoCode",
            Error::CompileError(_) => "CompileError",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Forbidden(_) => "Forbidden",
            Error::Conflict(_) => "Conflict",
            Error::QueryTimeout => "QueryTimeout",
            Error::Timeout(_) => "Timeout",
            Error::Interrupted(_) => "Interrupted",
            Error::HandlerError(_) => "HandlerError",
            Error::Config(_) => "Config",
            Error::Internal(_) => "Internal",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    /// Classifies an error raised while running tenant SQL.
    ///
    /// Engine failures caused by the statement itself become `InvalidInput`
    /// so callers see a 400, while interrupts from the query deadline become
    /// `QueryTimeout`.
    #[must_use]
    pub fn from_tenant_sql(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let message = message.clone().unwrap_or_else(|| failure.to_string());
                match failure.code {
                    ErrorCode::OperationInterrupted => Error::QueryTimeout,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Error::QueryTimeout,
                    ErrorCode::ConstraintViolation => Error::Conflict(message),
                    ErrorCode::CannotOpen | ErrorCode::NotADatabase => Error::NotReady(message),
                    ErrorCode::ReadOnly => Error::Forbidden(message),
                    ErrorCode::Unknown | ErrorCode::TypeMismatch | ErrorCode::ParameterOutOfRange => {
                        match message.strip_prefix("no such table: ") {
                            Some(table) => Error::TableNotFound(table.to_string()),
                            None => Error::InvalidInput(message),
                        }
                    }
                    _ => Error::Database(err),
                }
            }
            rusqlite::Error::InvalidParameterCount(got, expected) => Error::InvalidInput(format!(
                "statement expects {expected} parameters, got {got}"
            )),
            rusqlite::Error::InvalidParameterName(name) => {
                Error::InvalidInput(format!("unknown parameter {name}"))
            }
            rusqlite::Error::MultipleStatement => {
                Error::Forbidden("multiple statements are not allowed".to_string())
            }
            rusqlite::Error::ExecuteReturnedResults => {
                Error::InvalidInput("statement returned rows".to_string())
            }
            _ => Error::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
