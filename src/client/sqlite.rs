//! SQLite engine adapter.
//!
//! Every session owns a dedicated thread holding the `rusqlite::Connection`;
//! session, transaction and cursor handles talk to it over a channel. This is
//! what lets an open statement and its row iterator outlive a single call:
//! the borrow chain `Connection -> Statement -> Rows` stays on the worker's
//! stack while the handles travel between calls.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::{
    ClientError, ClientErrorKind, Connector, CounterKind, Credential, ExecuteCounts, LobReference,
    PreparedStatement, ResultCursor, Session, SessionOptions, SqlValue, Transaction,
    TransactionMode, TransactionOptions,
};
use crate::SqlMcpError;

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

enum Command {
    Ping(Reply<()>),
    Prepare { sql: String, reply: Reply<Vec<String>> },
    Begin { options: TransactionOptions, reply: Reply<()> },
    Query { sql: String, reply: Reply<Vec<String>> },
    Fetch(Reply<Option<Vec<SqlValue>>>),
    CloseCursor(Reply<()>),
    Execute { sql: String, reply: Reply<usize> },
    Commit(Reply<()>),
    Rollback(Reply<()>),
    Close(Reply<()>),
}

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    Memory,
}

pub struct SqliteConnector {
    target: Target,
}

impl SqliteConnector {
    /// `target` is a file path or `:memory:`
    pub fn new(target: &str) -> Result<Self, SqlMcpError> {
        let target = match target.trim() {
            "" => {
                return Err(SqlMcpError::Configuration(
                    "sqlite endpoint needs a database path".to_string(),
                ));
            }
            ":memory:" => Target::Memory,
            path => Target::File(PathBuf::from(path)),
        };
        Ok(SqliteConnector { target })
    }
}

impl Connector for SqliteConnector {
    fn connect(
        &self,
        credential: &Credential,
        options: &SessionOptions,
    ) -> Result<Box<dyn Session>, ClientError> {
        // SQLite has no authentication of its own
        debug!(credential = credential.kind(), label = %options.label, "opening SQLite session");

        let (sender, receiver) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let target = self.target.clone();
        let label = options.label.clone();

        thread::Builder::new()
            .name(format!("sqlmcp-session-{}", options.label))
            .spawn(move || run_worker(target, label, receiver, ready_tx))
            .map_err(|e| ClientError::new(ClientErrorKind::Io, e.to_string()))?;

        await_ready(ready_rx, options.connect_timeout)?;

        Ok(Box::new(SqliteSession {
            sender,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Wait for the worker to report whether the database opened.
///
/// Must run off the async runtime (callers sit on `spawn_blocking` threads).
fn await_ready(
    ready: oneshot::Receiver<Result<(), ClientError>>,
    timeout: Option<Duration>,
) -> Result<(), ClientError> {
    let handshake_closed = || ClientError::closed("session worker exited during handshake");

    let Some(timeout) = timeout else {
        return ready.blocking_recv().map_err(|_| handshake_closed())?;
    };
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| ClientError::new(ClientErrorKind::Io, e.to_string()))?;
    match runtime.block_on(tokio::time::timeout(timeout, ready)) {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(handshake_closed()),
        Err(_) => Err(ClientError::new(
            ClientErrorKind::Timeout,
            format!("session not established within {timeout:?}"),
        )),
    }
}

fn request<T>(
    sender: &UnboundedSender<Command>,
    make: impl FnOnce(Reply<T>) -> Command,
) -> Result<T, ClientError> {
    let (reply, response) = oneshot::channel();
    sender
        .send(make(reply))
        .map_err(|_| ClientError::closed("session is closed"))?;
    response
        .blocking_recv()
        .map_err(|_| ClientError::closed("session worker dropped the request"))?
}

/// Send without waiting; used from `Drop`
fn notify(sender: &UnboundedSender<Command>, make: impl FnOnce(Reply<()>) -> Command) {
    let (reply, _response) = oneshot::channel();
    let _ = sender.send(make(reply));
}

pub struct SqliteSession {
    sender: UnboundedSender<Command>,
    closed: AtomicBool,
}

impl SqliteSession {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::closed("session is closed"));
        }
        Ok(())
    }
}

impl Session for SqliteSession {
    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && request(&self.sender, Command::Ping).is_ok()
    }

    fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>, ClientError> {
        self.ensure_open()?;
        let columns = request(&self.sender, |reply| Command::Prepare {
            sql: sql.to_string(),
            reply,
        })?;
        Ok(Box::new(SqlitePreparedStatement {
            sql: sql.to_string(),
            columns,
        }))
    }

    fn begin(&self, options: &TransactionOptions) -> Result<Box<dyn Transaction>, ClientError> {
        self.ensure_open()?;
        if !options.write_preserve.is_empty() {
            debug!(tables = ?options.write_preserve, "write preserve covered by BEGIN IMMEDIATE");
        }
        request(&self.sender, |reply| Command::Begin {
            options: options.clone(),
            reply,
        })?;
        Ok(Box::new(SqliteTransaction {
            sender: self.sender.clone(),
            finished: false,
        }))
    }

    fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match request(&self.sender, Command::Close) {
            // worker already gone: nothing left to tear down
            Err(e) if e.kind == ClientErrorKind::Closed => Ok(()),
            other => other,
        }
    }
}

pub struct SqlitePreparedStatement {
    sql: String,
    columns: Vec<String>,
}

impl SqlitePreparedStatement {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl PreparedStatement for SqlitePreparedStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn close(&mut self) -> Result<(), ClientError> {
        // statements live in the connection's statement cache
        Ok(())
    }
}

pub struct SqliteTransaction {
    sender: UnboundedSender<Command>,
    finished: bool,
}

impl Transaction for SqliteTransaction {
    fn execute_query(
        &mut self,
        statement: &dyn PreparedStatement,
    ) -> Result<Box<dyn ResultCursor>, ClientError> {
        let columns = request(&self.sender, |reply| Command::Query {
            sql: statement.sql().to_string(),
            reply,
        })?;
        Ok(Box::new(SqliteCursor {
            sender: self.sender.clone(),
            columns,
            closed: false,
        }))
    }

    fn execute_statement(
        &mut self,
        statement: &dyn PreparedStatement,
    ) -> Result<ExecuteCounts, ClientError> {
        let changed = request(&self.sender, |reply| Command::Execute {
            sql: statement.sql().to_string(),
            reply,
        })?;
        Ok(match counter_kind(statement.sql()) {
            Some(kind) => ExecuteCounts(vec![(kind, changed as u64)]),
            None => ExecuteCounts::default(),
        })
    }

    fn read_blob(&mut self, lob: &LobReference) -> Result<Vec<u8>, ClientError> {
        Err(ClientError::new(
            ClientErrorKind::InvalidRequest,
            format!("unknown blob reference {}: SQLite returns blobs inline", lob.id),
        ))
    }

    fn read_clob(&mut self, lob: &LobReference) -> Result<String, ClientError> {
        Err(ClientError::new(
            ClientErrorKind::InvalidRequest,
            format!("unknown clob reference {}: SQLite returns text inline", lob.id),
        ))
    }

    fn commit(&mut self) -> Result<(), ClientError> {
        if self.finished {
            return Err(ClientError::closed("transaction already finished"));
        }
        // the worker rolls back a commit that fails, so either way it is over
        self.finished = true;
        request(&self.sender, Command::Commit)
    }

    fn rollback(&mut self) -> Result<(), ClientError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        request(&self.sender, Command::Rollback)
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            notify(&self.sender, Command::Rollback);
        }
    }
}

pub struct SqliteCursor {
    sender: UnboundedSender<Command>,
    columns: Vec<String>,
    closed: bool,
}

impl ResultCursor for SqliteCursor {
    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, ClientError> {
        if self.closed {
            return Err(ClientError::closed("cursor is closed"));
        }
        request(&self.sender, Command::Fetch)
    }

    fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        request(&self.sender, Command::CloseCursor)
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if !self.closed {
            notify(&self.sender, Command::CloseCursor);
        }
    }
}

fn counter_kind(sql: &str) -> Option<CounterKind> {
    let keyword = sql.split_whitespace().next()?.to_ascii_uppercase();
    match keyword.as_str() {
        "INSERT" => Some(CounterKind::Inserted),
        "UPDATE" => Some(CounterKind::Updated),
        "DELETE" => Some(CounterKind::Deleted),
        "REPLACE" => Some(CounterKind::Merged),
        _ => None,
    }
}

fn classify(err: rusqlite::Error) -> ClientError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                ClientErrorKind::SerializationFailure
            }
            ErrorCode::OperationInterrupted => ClientErrorKind::Interrupted,
            ErrorCode::SystemIoFailure | ErrorCode::CannotOpen | ErrorCode::DiskFull => {
                ClientErrorKind::Io
            }
            ErrorCode::PermissionDenied => ClientErrorKind::Authentication,
            _ => ClientErrorKind::Sql,
        },
        _ => ClientErrorKind::Sql,
    };
    ClientError::new(kind, err.to_string())
}

fn open_connection(target: &Target, label: &str) -> Result<Connection, ClientError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    match target {
        Target::File(path) => {
            let conn = Connection::open_with_flags(path, flags).map_err(classify)?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA temp_store=MEMORY;",
            )
            .map_err(classify)?;
            Ok(conn)
        }
        Target::Memory => {
            // shared cache so every pooled session sees the same database
            let uri = format!("file:sqlmcp-{label}?mode=memory&cache=shared");
            Connection::open_with_flags(uri, flags).map_err(classify)
        }
    }
}

#[derive(Default)]
struct TxState {
    active: bool,
    read_only: bool,
}

fn run_worker(
    target: Target,
    label: String,
    mut receiver: UnboundedReceiver<Command>,
    ready: oneshot::Sender<Result<(), ClientError>>,
) {
    let conn = match open_connection(&target, &label) {
        Ok(conn) => conn,
        Err(e) => {
            error!("Failed to open SQLite database {:?}: {}", target, e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        // caller gave up waiting
        return;
    }

    let mut state = TxState::default();
    let mut pending: Option<Command> = None;

    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => match receiver.blocking_recv() {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::Ping(reply) => {
                let _ = reply.send(Ok(()));
            }
            Command::Prepare { sql, reply } => {
                let _ = reply.send(prepare(&conn, &sql));
            }
            Command::Begin { options, reply } => {
                let _ = reply.send(begin(&conn, &mut state, &options));
            }
            Command::Query { sql, reply } => {
                if !state.active {
                    let _ = reply.send(Err(no_transaction()));
                    continue;
                }
                pending = serve_cursor(&conn, &sql, reply, &mut receiver);
            }
            Command::Fetch(reply) => {
                let _ = reply.send(Err(ClientError::closed("no open cursor")));
            }
            Command::CloseCursor(reply) => {
                let _ = reply.send(Ok(()));
            }
            Command::Execute { sql, reply } => {
                let result = if state.active {
                    conn.execute(&sql, []).map_err(classify)
                } else {
                    Err(no_transaction())
                };
                let _ = reply.send(result);
            }
            Command::Commit(reply) => {
                let _ = reply.send(finish(&conn, &mut state, "COMMIT"));
            }
            Command::Rollback(reply) => {
                let _ = reply.send(finish(&conn, &mut state, "ROLLBACK"));
            }
            Command::Close(reply) => {
                if state.active {
                    let _ = finish(&conn, &mut state, "ROLLBACK");
                }
                let _ = reply.send(Ok(()));
                break;
            }
        }
    }

    info!("SQLite session {} shutting down", label);
}

fn no_transaction() -> ClientError {
    ClientError::new(ClientErrorKind::InvalidRequest, "no active transaction")
}

fn prepare(conn: &Connection, sql: &str) -> Result<Vec<String>, ClientError> {
    let statement = conn.prepare_cached(sql).map_err(classify)?;
    Ok(statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect())
}

fn begin(
    conn: &Connection,
    state: &mut TxState,
    options: &TransactionOptions,
) -> Result<(), ClientError> {
    if state.active {
        return Err(ClientError::new(
            ClientErrorKind::InvalidRequest,
            "transaction already active",
        ));
    }
    let (begin_sql, read_only) = match options.mode {
        TransactionMode::Occ => ("BEGIN DEFERRED", false),
        TransactionMode::Ltx => ("BEGIN IMMEDIATE", false),
        TransactionMode::Rtx => ("BEGIN DEFERRED", true),
    };
    if read_only {
        conn.execute_batch("PRAGMA query_only=ON").map_err(classify)?;
    }
    if let Err(e) = conn.execute_batch(begin_sql) {
        if read_only {
            let _ = conn.execute_batch("PRAGMA query_only=OFF");
        }
        return Err(classify(e));
    }
    state.active = true;
    state.read_only = read_only;
    Ok(())
}

/// End the active transaction with `COMMIT` or `ROLLBACK`. Idempotent.
fn finish(conn: &Connection, state: &mut TxState, sql: &str) -> Result<(), ClientError> {
    if !state.active {
        return Ok(());
    }
    let result = conn.execute_batch(sql).map_err(classify);
    if result.is_err() && !conn.is_autocommit() {
        // failed COMMIT leaves the transaction open
        let _ = conn.execute_batch("ROLLBACK");
    }
    state.active = false;
    if state.read_only {
        let _ = conn.execute_batch("PRAGMA query_only=OFF");
        state.read_only = false;
    }
    result
}

/// Run a query and serve `Fetch` requests until the cursor closes. Any
/// other command ends the cursor and is handed back to the main loop.
fn serve_cursor(
    conn: &Connection,
    sql: &str,
    reply: Reply<Vec<String>>,
    receiver: &mut UnboundedReceiver<Command>,
) -> Option<Command> {
    let mut statement = match conn.prepare_cached(sql) {
        Ok(statement) => statement,
        Err(e) => {
            let _ = reply.send(Err(classify(e)));
            return None;
        }
    };
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let column_count = columns.len();
    let mut rows = match statement.query([]) {
        Ok(rows) => rows,
        Err(e) => {
            let _ = reply.send(Err(classify(e)));
            return None;
        }
    };
    let _ = reply.send(Ok(columns));

    loop {
        let command = receiver.blocking_recv()?;
        match command {
            Command::Fetch(reply) => {
                let _ = reply.send(fetch(&mut rows, column_count));
            }
            Command::Ping(reply) => {
                let _ = reply.send(Ok(()));
            }
            Command::CloseCursor(reply) => {
                let _ = reply.send(Ok(()));
                return None;
            }
            other => return Some(other),
        }
    }
}

fn fetch(
    rows: &mut rusqlite::Rows<'_>,
    column_count: usize,
) -> Result<Option<Vec<SqlValue>>, ClientError> {
    let Some(row) = rows.next().map_err(classify)? else {
        return Ok(None);
    };
    let mut values = Vec::with_capacity(column_count);
    for i in 0..column_count {
        let value = match row.get_ref(i).map_err(classify)? {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            ValueRef::Text(text) => SqlValue::Text(String::from_utf8_lossy(text).into_owned()),
            ValueRef::Blob(blob) => SqlValue::Bytes(blob.to_vec()),
        };
        values.push(value);
    }
    Ok(Some(values))
}
