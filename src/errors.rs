use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("CONNECTION_FAILED: {0}")]
    Connection(String),
    #[error("FILE_NOT_FOUND: {0}")]
    FileNotFound(String),
    #[error("TABLE_NOT_FOUND: {0}")]
    TableNotFound(String),
    #[error("QUERY_FAILED: {0}")]
    QueryExecution(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("INVALID_INPUT: {0}")]
    Invalid(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable tag persisted next to the error text on a cache row.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::FileNotFound(_) => "file_not_found",
            Self::TableNotFound(_) => "table_not_found",
            Self::QueryExecution(_) => "query_execution",
            Self::Config(_) => "config",
            Self::Invalid(_) => "invalid_input",
            Self::Io(_) => "io",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(value: csv::Error) -> Self {
        Self::QueryExecution(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
