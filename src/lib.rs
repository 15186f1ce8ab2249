pub mod client;
pub mod config;
pub mod error;
pub mod query;
pub mod session;
pub mod tools;

use std::path::PathBuf;
use thiserror::Error;

pub use client::ClientError;
pub use error::{AuthenticationFailure, ConnectAttempt};

#[derive(Error, Debug)]
pub enum SqlMcpError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Authentication(#[from] AuthenticationFailure),

    #[error("Connection error: {0}")]
    Connection(#[source] ClientError),

    #[error("not found ongoing query. cursor={0}")]
    UnknownCursor(String),

    #[error("Query execution failed: {0}")]
    Execution(#[source] ClientError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot load credential file {}: {reason}", path.display())]
    CredentialFile { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SqlMcpError>;

impl SqlMcpError {
    /// Stable error code reported to tool callers
    pub fn error_code(&self) -> &str {
        match self {
            SqlMcpError::Configuration(_) => "configuration",
            SqlMcpError::Authentication(_) => "authentication",
            SqlMcpError::Connection(_) => "connection",
            SqlMcpError::UnknownCursor(_) => "unknown_cursor",
            SqlMcpError::Execution(_) => "execution",
            SqlMcpError::InvalidArgument(_) => "invalid_argument",
            SqlMcpError::CredentialFile { .. } => "configuration",
            SqlMcpError::Json(_) => "invalid_argument",
            SqlMcpError::Io(_) => "io",
        }
    }
}
