use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::budget::{Admission, ResponseBudget};
use super::row::{Row, encoded_row_size, materialize_row};
use super::Page;
use crate::client::{ClientError, PreparedStatement, ResultCursor, Transaction, TransactionOptions};
use crate::config::Config;
use crate::session::{PooledSession, SessionPool};
use crate::{Result, SqlMcpError};

/// Source of query ids, unique for the life of the process
static QUERY_ID: AtomicU64 = AtomicU64::new(0);

/// Keeps unfinished queries alive between calls.
///
/// A fresh call opens a session, transaction and row iterator and returns
/// the first page; if rows remain, the execution is parked under a one-shot
/// cursor token. Presenting the token removes the execution from the map,
/// produces the next page and parks it again under a new token.
pub struct QueryExecutionCache {
    pool: Arc<SessionPool>,
    budget: ResponseBudget,
    idle_timeout: Option<Duration>,
    parked: Mutex<HashMap<String, ParkedQuery>>,
}

struct ParkedQuery {
    execution: QueryExecution,
    parked_at: Instant,
}

impl QueryExecutionCache {
    pub fn new(pool: Arc<SessionPool>, budget: ResponseBudget) -> Self {
        QueryExecutionCache {
            pool,
            budget,
            idle_timeout: None,
            parked: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(pool: Arc<SessionPool>, config: &Config) -> Self {
        QueryExecutionCache::new(pool, ResponseBudget::new(config.response_limit_size))
            .with_idle_timeout(config.cursor_idle_timeout_duration())
    }

    /// Parked queries idle longer than `timeout` are abandoned
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Run `sql` (no cursor) or continue the query behind `cursor`.
    ///
    /// `options` only applies to fresh calls. A conflict while reading or
    /// committing is reported inside the page; failures while opening, and
    /// every other failure, are errors. Either way a finished query has
    /// released its session before this returns.
    pub fn execute(
        &self,
        sql: &str,
        options: &TransactionOptions,
        cursor: Option<&str>,
    ) -> Result<Page> {
        self.sweep_expired();

        let mut execution = match cursor {
            None => {
                let session = self.pool.acquire()?;
                QueryExecution::open(session, sql, options).map_err(SqlMcpError::Execution)?
            }
            Some(token) => self.take(token)?,
        };

        let page = execution.next_page(&self.budget)?;
        debug!(
            query_id = execution.query_id,
            rows = page.rows.len(),
            has_more = page.has_more_record,
            "page produced"
        );

        if let Some(token) = &page.next_cursor {
            self.parked.lock().insert(
                token.clone(),
                ParkedQuery {
                    execution,
                    parked_at: Instant::now(),
                },
            );
        }
        Ok(page)
    }

    /// Number of queries waiting for a continuation call
    pub fn parked_count(&self) -> usize {
        self.parked.lock().len()
    }

    /// Abandon every parked query, returning their sessions to the pool
    pub fn close_all(&self) {
        let parked: Vec<ParkedQuery> = self.parked.lock().drain().map(|(_, p)| p).collect();
        if parked.is_empty() {
            return;
        }
        let count = parked.len();
        for mut query in parked {
            query.execution.release();
        }
        info!("Closed {} unfinished queries", count);
    }

    fn take(&self, token: &str) -> Result<QueryExecution> {
        self.parked
            .lock()
            .remove(token)
            .map(|parked| parked.execution)
            .ok_or_else(|| SqlMcpError::UnknownCursor(token.to_string()))
    }

    fn sweep_expired(&self) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };
        let expired: Vec<(String, ParkedQuery)> = {
            let mut parked = self.parked.lock();
            let stale: Vec<String> = parked
                .iter()
                .filter(|(_, p)| p.parked_at.elapsed() > timeout)
                .map(|(token, _)| token.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|token| parked.remove(&token).map(|p| (token, p)))
                .collect()
        };

        for (token, mut query) in expired {
            info!(cursor = %token, "abandoning idle query");
            query.execution.release();
        }
    }
}

impl Drop for QueryExecutionCache {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Everything one in-flight query owns between calls
struct QueryExecution {
    query_id: u64,
    pages_served: u64,
    session: Option<PooledSession>,
    statement: Option<Box<dyn PreparedStatement>>,
    transaction: Option<Box<dyn Transaction>>,
    cursor: Option<Box<dyn ResultCursor>>,
    columns: Vec<String>,
    /// Row fetched but pushed to the next page, with its size estimate
    lookahead: Option<(Row, usize)>,
    finished: bool,
}

impl QueryExecution {
    fn open(
        session: PooledSession,
        sql: &str,
        options: &TransactionOptions,
    ) -> std::result::Result<Self, ClientError> {
        let mut execution = QueryExecution {
            query_id: QUERY_ID.fetch_add(1, Ordering::Relaxed),
            pages_served: 0,
            session: Some(session),
            statement: None,
            transaction: None,
            cursor: None,
            columns: Vec::new(),
            lookahead: None,
            finished: false,
        };

        if let Err(e) = execution.start(sql, options) {
            warn!(query_id = execution.query_id, "query open error: {}", e);
            execution.finished = true;
            execution.release();
            return Err(e);
        }
        debug!(query_id = execution.query_id, mode = %options.mode, "query opened");
        Ok(execution)
    }

    fn start(&mut self, sql: &str, options: &TransactionOptions) -> std::result::Result<(), ClientError> {
        let session = self
            .session
            .as_deref()
            .ok_or_else(|| ClientError::closed("session already released"))?;
        let statement = self.statement.insert(session.prepare(sql)?);
        let transaction = self.transaction.insert(session.begin(options)?);
        let cursor = transaction.execute_query(&**statement)?;
        self.columns = cursor.column_names().to_vec();
        self.cursor = Some(cursor);
        Ok(())
    }

    fn next_page(&mut self, budget: &ResponseBudget) -> Result<Page> {
        let page = self.fill_page(budget);
        if page.is_err() {
            self.finished = true;
        }
        if self.finished {
            self.release();
        }
        page
    }

    fn fill_page(&mut self, budget: &ResponseBudget) -> Result<Page> {
        let mut packer = budget.start_page();
        let mut rows = Vec::new();
        if let Some((row, size)) = self.lookahead.take() {
            packer.offer(size);
            rows.push(row);
        }

        loop {
            let row = match self.fetch_row() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    return match self.complete() {
                        Ok(()) => Ok(Page::last(rows)),
                        Err(e) => self.interrupted(rows, e),
                    };
                }
                Err(e) => return self.interrupted(rows, e),
            };
            let size = encoded_row_size(&row)?;
            match packer.offer(size) {
                Admission::Include => rows.push(row),
                Admission::Defer => {
                    self.lookahead = Some((row, size));
                    break;
                }
            }
        }

        self.pages_served += 1;
        Ok(Page::partial(rows, self.cursor_token()))
    }

    fn fetch_row(&mut self) -> std::result::Result<Option<Row>, ClientError> {
        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| ClientError::closed("result cursor already released"))?;
        let Some(values) = cursor.next_row()? else {
            return Ok(None);
        };
        let transaction = self
            .transaction
            .as_deref_mut()
            .ok_or_else(|| ClientError::closed("transaction already released"))?;
        materialize_row(&self.columns, values, transaction).map(Some)
    }

    /// Rows exhausted: close the iterator and commit
    fn complete(&mut self) -> std::result::Result<(), ClientError> {
        self.finished = true;
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close() {
                warn!(query_id = self.query_id, "result cursor close error: {}", e);
            }
        }
        let transaction = self
            .transaction
            .as_deref_mut()
            .ok_or_else(|| ClientError::closed("transaction already released"))?;
        transaction.commit()?;
        debug!(query_id = self.query_id, "query committed");
        Ok(())
    }

    /// Draining stopped on an error: a conflict becomes page data, anything
    /// else is raised. The query is over in both cases.
    fn interrupted(&mut self, rows: Vec<Row>, error: ClientError) -> Result<Page> {
        self.finished = true;
        if error.is_serialization_failure() {
            debug!(query_id = self.query_id, "serialization failure: {}", error);
            return Ok(Page::conflict(rows, error.message));
        }
        warn!(query_id = self.query_id, "query execution error: {}", error);
        Err(SqlMcpError::Execution(error))
    }

    fn cursor_token(&self) -> String {
        format!("query{}-{}", self.query_id, self.pages_served)
    }

    /// Close iterator, transaction and statement, then hand the session back.
    /// Safe to call more than once.
    fn release(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close() {
                warn!(query_id = self.query_id, "result cursor close error: {}", e);
            }
        }
        if let Some(mut transaction) = self.transaction.take() {
            if let Err(e) = transaction.rollback() {
                warn!(query_id = self.query_id, "transaction rollback error: {}", e);
            }
        }
        if let Some(mut statement) = self.statement.take() {
            if let Err(e) = statement.close() {
                warn!(query_id = self.query_id, "statement close error: {}", e);
            }
        }
        self.lookahead = None;
        if let Some(session) = self.session.take() {
            session.release();
        }
    }
}

impl Drop for QueryExecution {
    fn drop(&mut self) {
        self.release();
    }
}
