//! Client-side view of the transactional SQL engine.
//!
//! The engine is a black box reached through a handful of operations: open a
//! session, prepare a statement, begin a transaction, execute and iterate
//! rows, commit, roll back and close. Everything above this module talks to
//! the engine only through these traits.

pub mod sqlite;

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::SqlMcpError;

pub use sqlite::SqliteConnector;

/// Failure classes reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    /// Credential rejected
    Authentication,
    /// Malformed or unacceptable request (also reported for unusable credentials)
    InvalidRequest,
    /// Optimistic concurrency conflict; the transaction cannot be serialized
    SerializationFailure,
    Io,
    Interrupted,
    Timeout,
    /// Session, transaction or cursor already closed
    Closed,
    /// Any other SQL-level error
    Sql,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientErrorKind::Authentication => "authentication error",
            ClientErrorKind::InvalidRequest => "invalid request",
            ClientErrorKind::SerializationFailure => "serialization failure",
            ClientErrorKind::Io => "I/O error",
            ClientErrorKind::Interrupted => "interrupted",
            ClientErrorKind::Timeout => "timeout",
            ClientErrorKind::Closed => "closed",
            ClientErrorKind::Sql => "SQL error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        ClientError {
            kind,
            message: message.into(),
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Closed, message)
    }

    /// Errors that mean "this credential was not accepted"; connection
    /// attempts move on to the next candidate after one of these.
    pub fn is_authentication_class(&self) -> bool {
        matches!(
            self.kind,
            ClientErrorKind::Authentication | ClientErrorKind::InvalidRequest
        )
    }

    pub fn is_serialization_failure(&self) -> bool {
        self.kind == ClientErrorKind::SerializationFailure
    }
}

/// Credential stored in a file; the secret is opaque to this crate
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct FileCredential {
    pub user: String,
    secret: String,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(skip)]
    pub path: PathBuf,
}

impl FileCredential {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        FileCredential {
            user: user.into(),
            secret: secret.into(),
            expires_at: None,
            path: PathBuf::new(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for FileCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCredential")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("path", &self.path)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    UserPassword { user: String, password: Option<String> },
    Token(String),
    File(FileCredential),
}

impl Credential {
    /// Short name of the credential scheme, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Anonymous => "anonymous",
            Credential::UserPassword { .. } => "user",
            Credential::Token(_) => "token",
            Credential::File(_) => "file",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::UserPassword { user, .. } => f
                .debug_struct("UserPassword")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Token(_) => f.write_str("Token(<redacted>)"),
            Credential::File(file) => f.debug_tuple("File").field(file).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub label: String,
    /// Upper bound on session establishment, `None` waits forever
    pub connect_timeout: Option<Duration>,
    pub keep_alive: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            label: "sqlmcp".to_string(),
            connect_timeout: Some(Duration::from_secs(30)),
            keep_alive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Optimistic, short transaction
    Occ,
    /// Long transaction that reserves its write set up front
    Ltx,
    /// Read-only transaction
    Rtx,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionMode::Occ => "OCC",
            TransactionMode::Ltx => "LTX",
            TransactionMode::Rtx => "RTX",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOptions {
    pub mode: TransactionMode,
    /// Tables an LTX intends to write
    pub write_preserve: Vec<String>,
}

impl TransactionOptions {
    pub fn occ() -> Self {
        TransactionOptions {
            mode: TransactionMode::Occ,
            write_preserve: Vec::new(),
        }
    }

    pub fn ltx(write_preserve: Vec<String>) -> Self {
        TransactionOptions {
            mode: TransactionMode::Ltx,
            write_preserve,
        }
    }

    pub fn rtx() -> Self {
        TransactionOptions {
            mode: TransactionMode::Rtx,
            write_preserve: Vec::new(),
        }
    }
}

/// Handle to a large object held by the engine. Only readable through the
/// transaction that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LobReference {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    /// Exact numeric kept in its textual form
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Blob(LobReference),
    Clob(LobReference),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Inserted,
    Updated,
    Merged,
    Deleted,
}

impl CounterKind {
    pub fn name(&self) -> &'static str {
        match self {
            CounterKind::Inserted => "inserted_rows",
            CounterKind::Updated => "updated_rows",
            CounterKind::Merged => "merged_rows",
            CounterKind::Deleted => "deleted_rows",
        }
    }
}

/// Affected-row counters of one statement, in engine order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteCounts(pub Vec<(CounterKind, u64)>);

/// Opens authenticated sessions against one endpoint
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        credential: &Credential,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>, ClientError>;
}

/// An authenticated connection. Methods take `&self` so a pool can tear a
/// session down while someone else holds it.
pub trait Session: Send + Sync {
    /// Liveness check; `false` once closed or the connection is lost
    fn is_alive(&self) -> bool;

    fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>, ClientError>;

    fn begin(&self, options: &TransactionOptions) -> Result<Box<dyn Transaction>, ClientError>;

    /// Tear down the connection. Idempotent.
    fn close(&self) -> Result<(), ClientError>;
}

pub trait PreparedStatement: Send {
    fn sql(&self) -> &str;

    fn close(&mut self) -> Result<(), ClientError>;
}

pub trait Transaction: Send {
    fn execute_query(
        &mut self,
        statement: &dyn PreparedStatement,
    ) -> Result<Box<dyn ResultCursor>, ClientError>;

    fn execute_statement(
        &mut self,
        statement: &dyn PreparedStatement,
    ) -> Result<ExecuteCounts, ClientError>;

    fn read_blob(&mut self, lob: &LobReference) -> Result<Vec<u8>, ClientError>;

    fn read_clob(&mut self, lob: &LobReference) -> Result<String, ClientError>;

    fn commit(&mut self) -> Result<(), ClientError>;

    /// Abandon the transaction. A no-op once committed or rolled back.
    fn rollback(&mut self) -> Result<(), ClientError>;
}

/// Server-side row iterator
pub trait ResultCursor: Send {
    fn column_names(&self) -> &[String];

    /// Next row, `None` once exhausted
    fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, ClientError>;

    fn close(&mut self) -> Result<(), ClientError>;
}

/// Pick the engine adapter for an endpoint string
pub fn connector_for(endpoint: &str) -> Result<Arc<dyn Connector>, SqlMcpError> {
    let (scheme, target) = endpoint.split_once(':').ok_or_else(|| {
        SqlMcpError::Configuration(format!("endpoint has no scheme: {endpoint}"))
    })?;
    match scheme {
        "sqlite" => Ok(Arc::new(SqliteConnector::new(target)?)),
        other => Err(SqlMcpError::Configuration(format!(
            "unsupported endpoint scheme: {other}"
        ))),
    }
}
