use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Number, Value};

use crate::client::{ClientError, SqlValue, Transaction};

/// Per-row allowance for separators around an encoded row
pub const ROW_SEPARATOR_OVERHEAD: usize = 8;

/// Column name to value, in column order
pub type Row = serde_json::Map<String, Value>;

/// Convert one fetched row into a self-contained JSON row.
///
/// LOB references are read through `transaction` here: they are only valid
/// while the transaction is open, and it may be gone before the caller looks
/// at the page.
pub fn materialize_row(
    columns: &[String],
    values: Vec<SqlValue>,
    transaction: &mut dyn Transaction,
) -> Result<Row, ClientError> {
    let mut row = Row::with_capacity(columns.len());
    for (name, value) in columns.iter().zip(values) {
        let value = match value {
            SqlValue::Blob(lob) => bytes_value(&transaction.read_blob(&lob)?),
            SqlValue::Clob(lob) => Value::String(transaction.read_clob(&lob)?),
            other => to_json(other),
        };
        row.insert(name.clone(), value);
    }
    Ok(row)
}

/// Size estimate of a row inside a page: its UTF-8 JSON length plus separators
pub fn encoded_row_size(row: &Row) -> Result<usize, serde_json::Error> {
    Ok(serde_json::to_vec(row)?.len() + ROW_SEPARATOR_OVERHEAD)
}

fn to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Boolean(v) => Value::Bool(v),
        SqlValue::Int(v) => Value::from(v),
        SqlValue::Float(v) => match Number::from_f64(v) {
            Some(n) => Value::Number(n),
            None => Value::String(non_finite(v).to_string()),
        },
        SqlValue::Decimal(v) | SqlValue::Text(v) => Value::String(v),
        SqlValue::Bytes(v) => bytes_value(&v),
        // LOBs are resolved by `materialize_row`
        SqlValue::Blob(_) | SqlValue::Clob(_) => Value::Null,
    }
}

fn bytes_value(bytes: &[u8]) -> Value {
    Value::String(STANDARD.encode(bytes))
}

fn non_finite(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}
