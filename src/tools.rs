use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::{ExecuteCounts, TransactionMode, TransactionOptions};
use crate::config::Config;
use crate::query::{Page, QueryExecutionCache, StatementExecutor};
use crate::session::SessionPool;
use crate::{Result, SqlMcpError};

pub const TOOL_QUERY: &str = "query";
pub const TOOL_UPDATE: &str = "update";
pub const TOOL_EXECUTE_DDL: &str = "execute_ddl";
/// camelCase name some clients send for the DDL tool
pub const TOOL_EXECUTE_DDL_CAMEL: &str = "executeDdl";

/// Arguments shared by the three SQL tools
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolArguments {
    pub sql: String,
    #[serde(default)]
    pub transaction_type: Option<String>,
    /// Comma separated table names, used with LTX
    #[serde(default)]
    pub write_preserve: Option<String>,
    /// Continuation token, query only
    #[serde(default)]
    pub cursor: Option<String>,
}

impl ToolArguments {
    /// Decode the transaction options, falling back to `default` when no
    /// transaction type was given
    pub fn transaction_options(
        &self,
        default: TransactionMode,
        allow_read_only: bool,
    ) -> Result<TransactionOptions> {
        let mode = match self.transaction_type.as_deref() {
            None => default,
            Some(name) => parse_transaction_mode(name)?,
        };
        if mode == TransactionMode::Rtx && !allow_read_only {
            return Err(SqlMcpError::InvalidArgument(format!(
                "Unexpected transaction_type: {}",
                self.transaction_type.as_deref().unwrap_or("RTX")
            )));
        }

        Ok(match mode {
            TransactionMode::Occ => TransactionOptions::occ(),
            TransactionMode::Rtx => TransactionOptions::rtx(),
            TransactionMode::Ltx => TransactionOptions::ltx(self.write_preserve_tables()),
        })
    }

    fn write_preserve_tables(&self) -> Vec<String> {
        self.write_preserve
            .as_deref()
            .map(|tables| {
                tables
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn parse_transaction_mode(name: &str) -> Result<TransactionMode> {
    match name.to_uppercase().as_str() {
        "OCC" | "SHORT" => Ok(TransactionMode::Occ),
        "LTX" | "LONG" => Ok(TransactionMode::Ltx),
        "RTX" | "READ ONLY" => Ok(TransactionMode::Rtx),
        _ => Err(SqlMcpError::InvalidArgument(format!(
            "Unexpected transaction_type: {name}"
        ))),
    }
}

/// Counter map of an update, e.g. `{"inserted_rows": 3}`
pub fn counts_to_json(counts: &ExecuteCounts) -> Value {
    let mut map = Map::new();
    for (kind, count) in &counts.0 {
        map.insert(kind.name().to_string(), Value::from(*count));
    }
    Value::Object(map)
}

/// Dispatches tool calls onto the pool, the query cache and the statement
/// executor. Every method is blocking and may be called from many threads.
pub struct ToolHandler {
    pool: Arc<SessionPool>,
    cache: QueryExecutionCache,
    executor: StatementExecutor,
}

impl ToolHandler {
    pub fn new(pool: Arc<SessionPool>, cache: QueryExecutionCache) -> Self {
        let executor = StatementExecutor::new(pool.clone());
        ToolHandler {
            pool,
            cache,
            executor,
        }
    }

    pub fn connect(config: &Config) -> Result<Self> {
        let pool = Arc::new(SessionPool::connect(config)?);
        info!(
            credential = pool.credential_kind(),
            limit = config.response_limit_size,
            "session pool ready"
        );
        let cache = QueryExecutionCache::from_config(pool.clone(), config);
        Ok(ToolHandler::new(pool, cache))
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn cache(&self) -> &QueryExecutionCache {
        &self.cache
    }

    pub fn query(&self, args: &ToolArguments) -> Result<Page> {
        let options = args.transaction_options(TransactionMode::Rtx, true)?;
        self.cache.execute(&args.sql, &options, args.cursor.as_deref())
    }

    pub fn update(&self, args: &ToolArguments) -> Result<ExecuteCounts> {
        let options = args.transaction_options(TransactionMode::Occ, false)?;
        self.executor.execute_update(&args.sql, &options)
    }

    pub fn execute_ddl(&self, args: &ToolArguments) -> Result<()> {
        let options = args.transaction_options(TransactionMode::Occ, false)?;
        self.executor.execute_ddl(&args.sql, &options)
    }

    /// Run `tool` with JSON `arguments` and encode its result
    pub fn call(&self, tool: &str, arguments: &Value) -> Result<Value> {
        let args: ToolArguments = serde_json::from_value(arguments.clone())
            .map_err(|e| SqlMcpError::InvalidArgument(format!("{tool}: {e}")))?;
        debug!(tool, "tool call");

        match tool {
            TOOL_QUERY => Ok(serde_json::to_value(self.query(&args)?)?),
            TOOL_UPDATE => Ok(counts_to_json(&self.update(&args)?)),
            TOOL_EXECUTE_DDL | TOOL_EXECUTE_DDL_CAMEL => {
                self.execute_ddl(&args)?;
                Ok(Value::String("succeeded".to_string()))
            }
            other => Err(SqlMcpError::InvalidArgument(format!("unknown tool: {other}"))),
        }
    }

    /// Handle one JSON-lines request and produce its response line
    pub fn handle_request_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<ToolRequest>(line) {
            Ok(request) => {
                let outcome = self.call(&request.tool, &request.arguments);
                ToolResponse::from_outcome(request.id, outcome)
            }
            Err(e) => ToolResponse::failure(
                Value::Null,
                &SqlMcpError::InvalidArgument(format!("malformed request: {e}")),
            ),
        };
        response.to_line()
    }

    /// Abandon unfinished queries, then close every session
    pub fn shutdown(&self) {
        self.cache.close_all();
        self.pool.shutdown();
    }
}

#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

#[derive(Debug, Serialize)]
pub struct ToolFailure {
    pub code: String,
    pub message: String,
}

impl ToolResponse {
    fn from_outcome(id: Value, outcome: Result<Value>) -> Self {
        match outcome {
            Ok(result) => ToolResponse {
                id,
                result: Some(result),
                error: None,
            },
            Err(e) => ToolResponse::failure(id, &e),
        }
    }

    fn failure(id: Value, error: &SqlMcpError) -> Self {
        ToolResponse {
            id,
            result: None,
            error: Some(ToolFailure {
                code: error.error_code().to_string(),
                message: error.to_string(),
            }),
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"id":null,"error":{{"code":"internal","message":"{e}"}}}}"#)
        })
    }
}
