//! Capture data model

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlscope_sql::StatementKind;
use uuid::Uuid;

/// A single bind parameter as handed to the driver
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl SqlParam {
    /// Storage form of the parameter. Structured values (UUIDs, timestamps,
    /// bytes) become strings.
    pub fn to_json(&self) -> Value {
        match self {
            SqlParam::Null => Value::Null,
            SqlParam::Bool(b) => Value::Bool(*b),
            SqlParam::Int(i) => Value::from(*i),
            SqlParam::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            SqlParam::Text(s) => Value::String(s.clone()),
            SqlParam::Uuid(u) => Value::String(u.to_string()),
            SqlParam::Timestamp(t) => Value::String(t.to_rfc3339()),
            SqlParam::Bytes(b) => Value::String(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
        }
    }
}

impl From<bool> for SqlParam {
    fn from(value: bool) -> Self {
        SqlParam::Bool(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        SqlParam::Int(value.into())
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Int(value)
    }
}

impl From<f64> for SqlParam {
    fn from(value: f64) -> Self {
        SqlParam::Float(value)
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::Text(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::Text(value)
    }
}

impl From<Uuid> for SqlParam {
    fn from(value: Uuid) -> Self {
        SqlParam::Uuid(value)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(value: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(value)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(value: Vec<u8>) -> Self {
        SqlParam::Bytes(value)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlParam::Null)
    }
}

/// Parameter set of one statement call
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// `%s`, `?` or `$n` style markers
    Positional(Vec<SqlParam>),
    /// `%(name)s` or `:name` style markers
    Named(Vec<(String, SqlParam)>),
}

impl Params {
    pub fn is_empty(&self) -> bool {
        match self {
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
        }
    }

    /// Storage form: a JSON array for positional, an object for named.
    pub fn to_json(&self) -> Value {
        match self {
            Params::Positional(values) => Value::Array(values.iter().map(SqlParam::to_json).collect()),
            Params::Named(values) => Value::Object(
                values
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::Positional(Vec::new())
    }
}

impl From<Vec<SqlParam>> for Params {
    fn from(values: Vec<SqlParam>) -> Self {
        Params::Positional(values)
    }
}

/// One intercepted statement execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementRecord {
    /// Statement text as handed to the driver
    pub sql: String,
    /// Normalized parameters (array or object)
    pub params: Value,
    /// Wall-clock start of the execution
    pub execution_time: DateTime<Utc>,
    /// Execution duration in seconds, measured on a monotonic clock
    pub execution_duration: f64,
    pub is_in_transaction: bool,
    pub db_alias: String,
    /// Rows affected or returned, when the driver reports it
    pub rows_affected: Option<i64>,
    pub db_vendor: String,
    pub needs_rollback: bool,
    /// Tables referenced by the statement. Best effort, empty when the
    /// statement could not be parsed.
    pub tables: BTreeSet<String>,
    /// The wrapped call returned an error
    #[serde(default)]
    pub failed: bool,
}

impl StatementRecord {
    pub fn kind(&self) -> StatementKind {
        StatementKind::of(&self.sql)
    }

    pub fn is_read(&self) -> bool {
        self.kind().is_read()
    }
}

/// Everything observed while serving one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestCapture {
    pub id: Uuid,
    pub method: String,
    pub request_path: String,
    pub started_at: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub response_body: Option<Value>,
    /// Statements in execution order
    pub statements: Vec<StatementRecord>,
    pub is_n_plus_one: bool,
    pub n_plus_one_suggestion: Option<String>,
}

impl RequestCapture {
    pub fn new(method: impl Into<String>, request_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            request_path: request_path.into(),
            started_at: Utc::now(),
            status_code: None,
            response_body: None,
            statements: Vec::new(),
            is_n_plus_one: false,
            n_plus_one_suggestion: None,
        }
    }

    pub fn push(&mut self, record: StatementRecord) {
        self.statements.push(record);
    }

    pub fn set_response(&mut self, status_code: u16, snapshot: ResponseSnapshot) {
        self.status_code = Some(status_code);
        self.response_body = snapshot.into_value();
    }

    /// Sum of all statement durations in seconds
    pub fn total_duration(&self) -> f64 {
        self.statements.iter().map(|s| s.execution_duration).sum()
    }
}

/// Response body as it will be stored
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseSnapshot {
    Json(Value),
    NotCaptured,
}

impl ResponseSnapshot {
    /// Build a snapshot from a buffered body. JSON bodies are kept as
    /// documents, textual bodies as strings; anything else is dropped.
    pub fn from_bytes(content_type: Option<&str>, bytes: &[u8]) -> Self {
        let Some(content_type) = content_type else {
            return ResponseSnapshot::NotCaptured;
        };

        if content_type.contains("json") {
            return serde_json::from_slice(bytes)
                .map(ResponseSnapshot::Json)
                .unwrap_or(ResponseSnapshot::NotCaptured);
        }

        if content_type.starts_with("text/") {
            return std::str::from_utf8(bytes)
                .map(|text| ResponseSnapshot::Json(Value::String(text.to_string())))
                .unwrap_or(ResponseSnapshot::NotCaptured);
        }

        ResponseSnapshot::NotCaptured
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            ResponseSnapshot::Json(value) => Some(value),
            ResponseSnapshot::NotCaptured => None,
        }
    }
}

/// A proposed index produced by the index advisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSuggestion {
    pub table: String,
    pub columns: Vec<String>,
    pub rationale: String,
}

impl fmt::Display for IndexSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE INDEX ON {}({})", self.table, self.columns.join(", "))
    }
}
