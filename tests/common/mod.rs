#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sqlmcp::client::{
    ClientError, ClientErrorKind, Connector, CounterKind, Credential, ExecuteCounts, LobReference,
    PreparedStatement, ResultCursor, Session, SessionOptions, SqlValue, Transaction,
    TransactionOptions,
};
use sqlmcp::session::{ConnectionFactory, SessionPool};

/// Canned result set of one SQL text
#[derive(Clone)]
struct FakeTable {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

#[derive(Default)]
struct EngineState {
    tables: Mutex<HashMap<String, FakeTable>>,
    update_counts: Mutex<HashMap<String, ExecuteCounts>>,
    lobs: Mutex<HashMap<u64, Vec<u8>>>,
    /// Credential kinds the engine refuses, with the error kind it answers
    rejected: Mutex<HashMap<&'static str, ClientErrorKind>>,
    connect_failure: Mutex<Option<ClientError>>,
    /// Fail the fetch of the row at this index with a serialization failure
    conflict_at_row: Mutex<Option<usize>>,
    conflict_on_commit: AtomicBool,
    conflict_on_begin: AtomicBool,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
    attempted: Mutex<Vec<&'static str>>,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    cursors_closed: AtomicUsize,
    statements_closed: AtomicUsize,
    open_transactions: AtomicUsize,
}

/// In-memory engine whose failures can be scripted per test
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        FakeEngine::default()
    }

    pub fn with_result(self, sql: &str, columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        self.state.tables.lock().insert(
            sql.to_string(),
            FakeTable {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
        self
    }

    pub fn with_update_counts(self, sql: &str, counts: ExecuteCounts) -> Self {
        self.state.update_counts.lock().insert(sql.to_string(), counts);
        self
    }

    pub fn with_lob(self, id: u64, contents: &[u8]) -> Self {
        self.state.lobs.lock().insert(id, contents.to_vec());
        self
    }

    pub fn reject(self, credential_kind: &'static str, kind: ClientErrorKind) -> Self {
        self.state.rejected.lock().insert(credential_kind, kind);
        self
    }

    pub fn fail_connect(&self, error: Option<ClientError>) {
        *self.state.connect_failure.lock() = error;
    }

    pub fn conflict_at_row(&self, index: Option<usize>) {
        *self.state.conflict_at_row.lock() = index;
    }

    pub fn conflict_on_commit(&self, enabled: bool) {
        self.state.conflict_on_commit.store(enabled, Ordering::SeqCst);
    }

    pub fn conflict_on_begin(&self, enabled: bool) {
        self.state.conflict_on_begin.store(enabled, Ordering::SeqCst);
    }

    /// Simulate every open connection being lost
    pub fn kill_sessions(&self) {
        for alive in self.state.sessions.lock().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn attempted(&self) -> Vec<&'static str> {
        self.state.attempted.lock().clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }

    pub fn cursors_closed(&self) -> usize {
        self.state.cursors_closed.load(Ordering::SeqCst)
    }

    pub fn statements_closed(&self) -> usize {
        self.state.statements_closed.load(Ordering::SeqCst)
    }

    /// Transactions begun and neither committed nor rolled back
    pub fn open_transactions(&self) -> usize {
        self.state.open_transactions.load(Ordering::SeqCst)
    }
}

impl Connector for FakeEngine {
    fn connect(
        &self,
        credential: &Credential,
        _options: &SessionOptions,
    ) -> Result<Box<dyn Session>, ClientError> {
        self.state.attempted.lock().push(credential.kind());
        if let Some(error) = self.state.connect_failure.lock().clone() {
            return Err(error);
        }
        if let Some(kind) = self.state.rejected.lock().get(credential.kind()) {
            return Err(ClientError::new(
                *kind,
                format!("{} credential rejected", credential.kind()),
            ));
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.state.sessions.lock().push(alive.clone());
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            alive,
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeSession {
    state: Arc<EngineState>,
    alive: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl FakeSession {
    fn check(&self) -> Result<(), ClientError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::closed("session is closed"))
        }
    }
}

impl Session for FakeSession {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>, ClientError> {
        self.check()?;
        Ok(Box::new(FakeStatement {
            state: self.state.clone(),
            sql: sql.to_string(),
            closed: false,
        }))
    }

    fn begin(&self, _options: &TransactionOptions) -> Result<Box<dyn Transaction>, ClientError> {
        self.check()?;
        if self.state.conflict_on_begin.load(Ordering::SeqCst) {
            return Err(ClientError::new(
                ClientErrorKind::SerializationFailure,
                "conflict while starting transaction",
            ));
        }
        self.state.open_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeTransaction {
            state: self.state.clone(),
            finished: false,
        }))
    }

    fn close(&self) -> Result<(), ClientError> {
        self.alive.store(false, Ordering::SeqCst);
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct FakeStatement {
    state: Arc<EngineState>,
    sql: String,
    closed: bool,
}

impl PreparedStatement for FakeStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn close(&mut self) -> Result<(), ClientError> {
        if !self.closed {
            self.closed = true;
            self.state.statements_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct FakeTransaction {
    state: Arc<EngineState>,
    finished: bool,
}

impl FakeTransaction {
    fn check(&self) -> Result<(), ClientError> {
        if self.finished {
            Err(ClientError::closed("transaction already finished"))
        } else {
            Ok(())
        }
    }

    fn lob(&self, lob: &LobReference) -> Result<Vec<u8>, ClientError> {
        self.check()?;
        self.state
            .lobs
            .lock()
            .get(&lob.id)
            .cloned()
            .ok_or_else(|| ClientError::new(ClientErrorKind::Sql, format!("no lob {}", lob.id)))
    }
}

impl Transaction for FakeTransaction {
    fn execute_query(
        &mut self,
        statement: &dyn PreparedStatement,
    ) -> Result<Box<dyn ResultCursor>, ClientError> {
        self.check()?;
        let table = self
            .state
            .tables
            .lock()
            .get(statement.sql())
            .cloned()
            .ok_or_else(|| ClientError::new(ClientErrorKind::Sql, "no such table"))?;
        Ok(Box::new(FakeCursor {
            state: self.state.clone(),
            columns: table.columns,
            rows: table.rows.into(),
            fetched: 0,
            conflict_at: *self.state.conflict_at_row.lock(),
            closed: false,
        }))
    }

    fn execute_statement(
        &mut self,
        statement: &dyn PreparedStatement,
    ) -> Result<ExecuteCounts, ClientError> {
        self.check()?;
        Ok(self
            .state
            .update_counts
            .lock()
            .get(statement.sql())
            .cloned()
            .unwrap_or_else(|| ExecuteCounts(vec![(CounterKind::Inserted, 1)])))
    }

    fn read_blob(&mut self, lob: &LobReference) -> Result<Vec<u8>, ClientError> {
        self.lob(lob)
    }

    fn read_clob(&mut self, lob: &LobReference) -> Result<String, ClientError> {
        let bytes = self.lob(lob)?;
        String::from_utf8(bytes).map_err(|e| ClientError::new(ClientErrorKind::Sql, e.to_string()))
    }

    fn commit(&mut self) -> Result<(), ClientError> {
        self.check()?;
        if self.state.conflict_on_commit.load(Ordering::SeqCst) {
            return Err(ClientError::new(
                ClientErrorKind::SerializationFailure,
                "serialization failure on commit",
            ));
        }
        self.finished = true;
        self.state.open_transactions.fetch_sub(1, Ordering::SeqCst);
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ClientError> {
        if !self.finished {
            self.finished = true;
            self.state.open_transactions.fetch_sub(1, Ordering::SeqCst);
            self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct FakeCursor {
    state: Arc<EngineState>,
    columns: Vec<String>,
    rows: VecDeque<Vec<SqlValue>>,
    fetched: usize,
    conflict_at: Option<usize>,
    closed: bool,
}

impl ResultCursor for FakeCursor {
    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>, ClientError> {
        if self.conflict_at == Some(self.fetched) {
            return Err(ClientError::new(
                ClientErrorKind::SerializationFailure,
                format!("conflict reading row {}", self.fetched),
            ));
        }
        let row = self.rows.pop_front();
        if row.is_some() {
            self.fetched += 1;
        }
        Ok(row)
    }

    fn close(&mut self) -> Result<(), ClientError> {
        if !self.closed {
            self.closed = true;
            self.state.cursors_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// `n` rows of `(id INTEGER, name TEXT)` with identical encoded sizes
pub fn numbered_rows(n: usize) -> Vec<Vec<SqlValue>> {
    (0..n)
        .map(|i| {
            vec![
                SqlValue::Int(1_000 + i as i64),
                SqlValue::Text(format!("name-{i:04}")),
            ]
        })
        .collect()
}

/// Pool bound to `engine` with an anonymous credential
pub fn pool_for(engine: &FakeEngine) -> Arc<SessionPool> {
    let factory = ConnectionFactory::new(Arc::new(engine.clone()), SessionOptions::default());
    let connection = factory
        .establish(&[Credential::Anonymous])
        .expect("fake engine accepts anonymous");
    Arc::new(SessionPool::from_connection(connection))
}

/// Values of the `id` column, in page order
pub fn ids(rows: &[sqlmcp::query::Row]) -> Vec<i64> {
    rows.iter()
        .filter_map(|row| row.get("id").and_then(|v| v.as_i64()))
        .collect()
}

pub fn distinct<T: std::hash::Hash + Eq + Clone>(items: &[T]) -> HashSet<T> {
    items.iter().cloned().collect()
}
