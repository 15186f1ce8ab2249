pub mod budget;
pub mod cursor_cache;
pub mod row;
pub mod statement;

use serde::Serialize;

pub use budget::{Admission, PAGE_BASE_OVERHEAD, PagePacker, ResponseBudget};
pub use cursor_cache::QueryExecutionCache;
pub use row::{Row, encoded_row_size, materialize_row};
pub use statement::StatementExecutor;

/// One bounded batch of query results plus continuation metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub rows: Vec<Row>,
    pub has_more_record: bool,
    pub next_cursor: Option<String>,
    pub serialization_failure_message: Option<String>,
}

impl Page {
    /// More rows remain behind `cursor`
    pub fn partial(rows: Vec<Row>, cursor: String) -> Self {
        Page {
            rows,
            has_more_record: true,
            next_cursor: Some(cursor),
            serialization_failure_message: None,
        }
    }

    /// The query ran to completion
    pub fn last(rows: Vec<Row>) -> Self {
        Page {
            rows,
            has_more_record: false,
            next_cursor: None,
            serialization_failure_message: None,
        }
    }

    /// The query was cut short by a concurrency conflict
    pub fn conflict(rows: Vec<Row>, message: String) -> Self {
        Page {
            rows,
            has_more_record: false,
            next_cursor: None,
            serialization_failure_message: Some(message),
        }
    }
}
