use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{ClientError, ExecuteCounts, PreparedStatement, Transaction, TransactionOptions};
use crate::session::SessionPool;
use crate::{Result, SqlMcpError};

/// Runs single DML and DDL statements to completion in their own transaction
pub struct StatementExecutor {
    pool: Arc<SessionPool>,
}

impl StatementExecutor {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        StatementExecutor { pool }
    }

    /// Execute a DML statement and commit; returns the engine's row counters
    pub fn execute_update(&self, sql: &str, options: &TransactionOptions) -> Result<ExecuteCounts> {
        let counts = self.run(sql, options)?;
        debug!(counters = counts.0.len(), "update committed");
        Ok(counts)
    }

    pub fn execute_ddl(&self, sql: &str, options: &TransactionOptions) -> Result<()> {
        self.run(sql, options)?;
        debug!("ddl committed");
        Ok(())
    }

    fn run(&self, sql: &str, options: &TransactionOptions) -> Result<ExecuteCounts> {
        let session = self.pool.acquire()?;
        let mut statement = session.prepare(sql).map_err(SqlMcpError::Execution)?;

        let outcome = session
            .begin(options)
            .and_then(|mut transaction| execute_and_commit(&mut *transaction, &*statement));

        if let Err(e) = statement.close() {
            warn!("statement close error: {}", e);
        }
        session.release();
        outcome.map_err(SqlMcpError::Execution)
    }
}

/// Rolls back when execution or commit fails
fn execute_and_commit(
    transaction: &mut dyn Transaction,
    statement: &dyn PreparedStatement,
) -> std::result::Result<ExecuteCounts, ClientError> {
    let result = transaction
        .execute_statement(statement)
        .and_then(|counts| transaction.commit().map(|()| counts));
    if result.is_err() {
        if let Err(e) = transaction.rollback() {
            warn!("transaction rollback error: {}", e);
        }
    }
    result
}
