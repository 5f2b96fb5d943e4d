//! Row-oriented query results.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row: column name to value, in column order.
pub type Row = IndexMap<String, Value>;

/// Columnar result as returned by a backend, before encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Encoded query result: ordered column names plus one ordered map per row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at (row, column name).
    pub fn get_value(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }
}

/// Zip each positional row with the column names.
///
/// Rows shorter than the column list are padded with nulls; extra values are
/// dropped. A duplicated column name keeps its first position and the value
/// of its last occurrence.
pub fn encode(raw: RawResultSet) -> QueryResult {
    let RawResultSet { columns, rows } = raw;

    let rows = rows
        .into_iter()
        .map(|values| {
            let mut values = values.into_iter();
            let mut row = Row::with_capacity(columns.len());
            for name in &columns {
                row.insert(name.clone(), values.next().unwrap_or(Value::Null));
            }
            row
        })
        .collect();

    QueryResult { columns, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(columns: &[&str], rows: Vec<Vec<Value>>) -> RawResultSet {
        RawResultSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn rows_keep_column_order() {
        let result = encode(raw(
            &["zeta", "alpha", "mid"],
            vec![vec![json!(1), json!("a"), Value::Null]],
        ));

        assert_eq!(result.row_count(), 1);
        let keys: Vec<&String> = result.rows[0].keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);

        let encoded = serde_json::to_string(&result.rows[0]).unwrap();
        assert_eq!(encoded, r#"{"zeta":1,"alpha":"a","mid":null}"#);
    }

    #[test]
    fn empty_result_keeps_columns() {
        let result = encode(raw(&["id", "name"], vec![]));
        assert!(result.is_empty());
        assert_eq!(result.column_count(), 2);
        assert_eq!(result.columns, vec!["id", "name"]);
    }

    #[test]
    fn short_rows_are_padded_with_null() {
        let result = encode(raw(&["a", "b"], vec![vec![json!(true)]]));
        assert_eq!(result.get_value(0, "a"), Some(&json!(true)));
        assert_eq!(result.get_value(0, "b"), Some(&Value::Null));
    }

    #[test]
    fn duplicate_columns_keep_last_value() {
        let result = encode(raw(&["x", "y", "x"], vec![vec![json!(1), json!(2), json!(3)]]));
        let keys: Vec<&String> = result.rows[0].keys().collect();
        assert_eq!(keys, vec!["x", "y"]);
        assert_eq!(result.get_value(0, "x"), Some(&json!(3)));
        assert_eq!(result.column_count(), 3);
    }
}
