use thiserror::Error;

/// Failure kinds surfaced by the generative backend. All of them are
/// retryable up to the attempt ceiling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation timed out")]
    Timeout,

    #[error("generation quota exceeded")]
    QuotaExceeded,

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

/// Classified SQL failure. The underlying engine only reports error text,
/// so kinds are recovered by pattern matching (see `sql::classify_error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QueryErrorKind {
    SyntaxError,
    UnknownColumn,
    UnknownTable,
    TypeMismatch,
    Timeout,
}

#[derive(Error, Debug, Clone)]
#[error("query error ({kind:?}): {message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Sandbox-side failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecutionErrorKind {
    Timeout,
    MissingResult,
    RuntimeFault,
}

#[derive(Error, Debug, Clone)]
#[error("execution error ({kind:?}): {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(budget_secs: u64) -> Self {
        Self::new(
            ExecutionErrorKind::Timeout,
            format!("execution exceeded the {budget_secs}s budget"),
        )
    }
}

/// Failures from the connector boundary when materializing a dataset.
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("source not found: {0}")]
    NotFound(String),

    #[error("unsupported or malformed source format: {0}")]
    FormatError(String),

    #[error("connection failed: {0}")]
    ConnectionError(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dataframe error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for EngineError {
    fn from(e: polars::error::PolarsError) -> Self {
        EngineError::Polars(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
