//! Query-related data models.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A positional parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Arrays and objects are bound as JSON
    Json(JsonValue),
}

/// SQL text plus its positional parameters. Never validated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: QueryParam) -> Self {
        self.params.push(param);
        self
    }
}

/// Rows returned by one query, in backend order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    pub row_count: usize,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<serde_json::Map<String, JsonValue>>) -> Self {
        let row_count = rows.len();
        Self { rows, row_count }
    }

    pub fn into_rows(self) -> Vec<serde_json::Map<String, JsonValue>> {
        self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_param_deserializes_untagged() {
        let params: Vec<QueryParam> =
            serde_json::from_value(json!([null, true, 7, 1.5, "x", {"a": 1}])).unwrap();
        assert_eq!(
            params,
            vec![
                QueryParam::Null,
                QueryParam::Bool(true),
                QueryParam::Int(7),
                QueryParam::Float(1.5),
                QueryParam::String("x".to_string()),
                QueryParam::Json(json!({"a": 1})),
            ]
        );
    }

    #[test]
    fn test_query_result_row_count_matches_rows() {
        let mut row = serde_json::Map::new();
        row.insert("n".to_string(), json!(1));
        let result = QueryResult::from_rows(vec![row.clone(), row]);
        assert_eq!(result.row_count, 2);
        assert_eq!(QueryResult::from_rows(Vec::new()).row_count, 0);
    }
}
