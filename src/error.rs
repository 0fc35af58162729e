//! Error taxonomy for the query pipeline.
//!
//! Every failure a request can hit maps onto one [`QueryError`] variant, and
//! every variant onto a stable, serializable [`ErrorKind`] that the entry
//! points hand back to callers together with a human-readable message:
//!
//! ```
//! use dataset_query::error::{ErrorKind, QueryError};
//!
//! let err = QueryError::Execution("unable to find column \"nope\"".to_owned());
//! assert_eq!(err.kind(), ErrorKind::Execution);
//! assert!(err.to_string().contains("nope"));
//! ```
//!
//! ## Recoverability
//!
//! Not every variant is fatal everywhere. `Synthesis` is always recoverable
//! (the request degrades to raw rows), `Execution` and `Translation` are fatal
//! in the deterministic workflow but become observations inside the agent
//! loop. See [`crate::orchestration`] for where each decision is made.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failure of the external reasoning service.
#[derive(Debug, Clone, Error)]
pub enum ExternalCallError {
    /// The call did not finish within the configured timeout.
    #[error("reasoning call timed out after {0:?}")]
    Timeout(Duration),

    /// Network, authentication, rate limiting or any other provider failure.
    #[error("reasoning service error: {0}")]
    Api(String),

    /// The provider answered but the answer is unusable.
    #[error("malformed reasoning response: {0}")]
    MalformedResponse(String),

    /// No API key was supplied and none is configured.
    #[error("no LLM provider API key configured")]
    MissingCredential,
}

/// Failure of the dataset collaborator.
#[derive(Debug, Clone, Error)]
pub enum DatasetError {
    #[error("dataset not found: {0}")]
    NotFound(String),

    /// Transport-level failure while fetching records.
    #[error("failed to fetch dataset {id}: {message}")]
    Fetch { id: String, message: String },

    /// Records were fetched but could not be turned into a table.
    #[error("failed to decode dataset {id}: {message}")]
    Decode { id: String, message: String },
}

/// Main error type for a single query request.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// No usable schema could be derived from the loaded table.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("translation failed: {0}")]
    Translation(String),

    /// Diagnostic from the SQL engine (syntax, unknown column, type mismatch).
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("agent did not finish within {max_turns} turns")]
    AgentBudgetExceeded { max_turns: usize },

    /// The agent declared itself done without ever executing a query.
    #[error("agent finished without a successful query execution: {0}")]
    AgentIncomplete(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    External(#[from] ExternalCallError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Stable, serializable error category returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Schema,
    Translation,
    Execution,
    Synthesis,
    AgentBudgetExceeded,
    AgentIncomplete,
    DatasetNotFound,
    DatasetLoad,
    ExternalCall,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Translation => "translation",
            Self::Execution => "execution",
            Self::Synthesis => "synthesis",
            Self::AgentBudgetExceeded => "agent_budget_exceeded",
            Self::AgentIncomplete => "agent_incomplete",
            Self::DatasetNotFound => "dataset_not_found",
            Self::DatasetLoad => "dataset_load",
            Self::ExternalCall => "external_call",
            Self::InvalidInput => "invalid_input",
        }
    }

    /// HTTP status code used by the server shell.
    pub fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::DatasetNotFound => 404,
            Self::Execution | Self::AgentIncomplete => 422,
            Self::Translation | Self::Synthesis | Self::ExternalCall | Self::DatasetLoad => 502,
            Self::AgentBudgetExceeded => 504,
            Self::Schema => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::Schema,
            Self::Translation(_) => ErrorKind::Translation,
            Self::Execution(_) => ErrorKind::Execution,
            Self::Synthesis(_) => ErrorKind::Synthesis,
            Self::AgentBudgetExceeded { .. } => ErrorKind::AgentBudgetExceeded,
            Self::AgentIncomplete(_) => ErrorKind::AgentIncomplete,
            Self::Dataset(DatasetError::NotFound(_)) => ErrorKind::DatasetNotFound,
            Self::Dataset(_) => ErrorKind::DatasetLoad,
            Self::External(_) => ErrorKind::ExternalCall,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Serializable `{kind, message}` body for the entry points.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Structured error returned by the HTTP and CLI shells.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, QueryError>;
