//! Error types for the test engine
//!
//! Every error knows whether the retry loop may try again. Transient
//! backend failures are retried until the operation deadline, while
//! validation, expression and explicitly terminal errors surface at once.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::checks::CheckFailure;
use crate::client::ClientError;
use crate::operations::errors::ResourceError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test engine
#[derive(Error, Debug)]
pub enum Error {
    // === Backend Errors ===
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("the resource already exists in the cluster")]
    AlreadyExists,

    #[error("the resource does not exist in the cluster")]
    ResourceMissing,

    #[error("no actual resource found")]
    NoCandidates,

    // === Expression / Binding Errors ===
    #[error("expression error: {0}")]
    Expression(#[from] crate::expressions::Error),

    #[error("invalid binding name '{0}'")]
    InvalidBindingName(String),

    #[error("binding name '{0}' is reserved")]
    ReservedBindingName(String),

    #[error("environment variable '{0}' must evaluate to a string")]
    InvalidEnv(String),

    // === Assertion Errors ===
    #[error("{}", format_failures(.0))]
    Check(Vec<CheckFailure>),

    #[error("{0}")]
    Resource(Box<ResourceError>),

    #[error("resource {0} matched the assertion")]
    UnexpectedMatch(String),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<Error>),

    #[error("{0}")]
    WaitNotSatisfied(String),

    // === Execution Errors ===
    #[error("{0}")]
    CommandFailed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0} test(s) failed")]
    TestsFailed(usize),

    #[error("{0}")]
    Terminal(Box<Error>),

    // === Cluster Errors ===
    #[error("cluster '{0}' is not registered")]
    ClusterNotFound(String),

    #[error("cluster configuration error: {0}")]
    Cluster(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("invalid test document: {0}")]
    Validation(String),

    #[error("Failed to load '{path}': {error}")]
    Load { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the retry loop may attempt the operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Client(e) => e.is_retryable(),
            Error::AlreadyExists
            | Error::Expression(_)
            | Error::InvalidBindingName(_)
            | Error::ReservedBindingName(_)
            | Error::InvalidEnv(_)
            | Error::Terminal(_)
            | Error::Cancelled
            | Error::TestsFailed(_)
            | Error::ClusterNotFound(_)
            | Error::Cluster(_)
            | Error::Config(_)
            | Error::ConfigParse(_)
            | Error::Validation(_)
            | Error::Load { .. }
            | Error::FileRead { .. }
            | Error::Internal(_) => false,
            Error::Multiple(errors) => errors.iter().all(Error::is_retryable),
            _ => true,
        }
    }

    /// Mark an error as final so the retry loop stops immediately
    pub fn terminal(self) -> Self {
        match self {
            Error::Terminal(_) => self,
            other => Error::Terminal(Box::new(other)),
        }
    }

    /// Strip a terminal marker, if any
    pub fn into_inner(self) -> Self {
        match self {
            Error::Terminal(inner) => *inner,
            other => other,
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: impl ToString) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a document load error
    pub fn load(path: &std::path::Path, error: impl ToString) -> Self {
        Self::Load {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }
}

fn format_failures(failures: &[CheckFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
