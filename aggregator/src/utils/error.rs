use thiserror::Error;

/// Aggregator error with context for the unit of work that failed
///
/// Absence of data is never an error; aggregation entry points return `Option` for that.
#[derive(Error, Debug)]
pub enum AggregatorError {
    // Input errors 1xxx
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed duration '{value}': {reason}")]
    MalformedDuration { value: String, reason: String },

    #[error("Malformed date '{value}'")]
    MalformedDate { value: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Query backend errors 2xxx
    #[error("Query {execution_id} failed: {reason}")]
    QueryFailed { execution_id: String, reason: String },

    #[error("Query {execution_id} was cancelled")]
    QueryCancelled { execution_id: String },

    #[error("Query {execution_id} did not finish within {timeout_secs}s")]
    QueryTimedOut { execution_id: String, timeout_secs: u64 },

    #[error("Query backend unavailable: {0}")]
    QueryBackend(String),

    // Webservice errors 3xxx
    #[error("Webservice rejected request ({status}): {message}")]
    WebserviceRejected { status: u16, message: String },

    #[error("Webservice unavailable: {0}")]
    Webservice(String),

    // Storage and ingest errors 4xxx
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // System errors 5xxx
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Generic wrapper for other errors - auto-convert from anyhow::Error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AggregatorError {
    /// Helper to create invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Helper to create malformed duration error
    pub fn malformed_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDuration { value: value.into(), reason: reason.into() }
    }

    /// Helper to create malformed date error
    pub fn malformed_date(value: impl Into<String>) -> Self {
        Self::MalformedDate { value: value.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Helper to create query failed error
    pub fn query_failed(execution_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueryFailed { execution_id: execution_id.into(), reason: reason.into() }
    }

    pub fn query_backend(message: impl Into<String>) -> Self {
        Self::QueryBackend(message.into())
    }

    pub fn webservice(message: impl Into<String>) -> Self {
        Self::Webservice(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Helper to create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable numeric code, grouped by range
    pub fn error_code(&self) -> i32 {
        match self {
            // Input errors 1xxx
            Self::InvalidInput(_) => 1001,
            Self::MalformedDuration { .. } => 1002,
            Self::MalformedDate { .. } => 1003,
            Self::Config(_) => 1004,

            // Query backend errors 2xxx
            Self::QueryFailed { .. } => 2001,
            Self::QueryCancelled { .. } => 2002,
            Self::QueryTimedOut { .. } => 2003,
            Self::QueryBackend(_) => 2004,

            // Webservice errors 3xxx
            Self::WebserviceRejected { .. } => 3001,
            Self::Webservice(_) => 3002,

            // Storage and ingest errors 4xxx
            Self::Storage(_) => 4001,
            Self::Csv(_) => 4002,
            Self::Io(_) => 4003,

            // System errors 5xxx
            Self::Internal(_) => 5001,
            Self::Json(_) => 5002,
            Self::Http(_) => 5003,
            Self::Other(_) => 5004,
        }
    }

    /// Whether the failure belongs to the remote query engine rather than local input
    pub fn is_query_error(&self) -> bool {
        (2001..=2999).contains(&self.error_code())
    }
}

pub type AggregatorResult<T> = Result<T, AggregatorError>;
