use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlscope_core::StatementRecord;
use sqlscope_store::{StoredCapture, StoredPage};
use utoipa::ToSchema;

/// One captured SQL statement
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CapturedQuery {
    /// Statement text as executed
    pub sql: String,
    /// Bound parameters (array for positional, object for named)
    #[schema(value_type = Object)]
    pub params: Value,
    /// When execution started
    pub execution_time: DateTime<Utc>,
    /// Duration in seconds
    pub execution_duration: f64,
    pub is_in_transaction: bool,
    /// Logical database alias
    pub db_alias: String,
    /// Rows affected or returned
    pub rows_affected: Option<i64>,
    /// Database engine
    pub db_vendor: String,
    pub needs_rollback: bool,
    /// Tables referenced by the statement
    pub tables: Vec<String>,
    /// Whether the statement returned an error
    pub failed: bool,
}

impl From<StatementRecord> for CapturedQuery {
    fn from(record: StatementRecord) -> Self {
        Self {
            sql: record.sql,
            params: record.params,
            execution_time: record.execution_time,
            execution_duration: record.execution_duration,
            is_in_transaction: record.is_in_transaction,
            db_alias: record.db_alias,
            rows_affected: record.rows_affected,
            db_vendor: record.db_vendor,
            needs_rollback: record.needs_rollback,
            tables: record.tables.into_iter().collect(),
            failed: record.failed,
        }
    }
}

/// Proposed index
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IndexSuggestionInfo {
    pub table: String,
    pub columns: Vec<String>,
    pub rationale: String,
    /// Ready-to-run DDL
    pub statement: String,
}

/// A stored request capture
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryStoreRecord {
    /// Capture ID
    pub id: String,
    /// HTTP method
    pub method: String,
    /// Request path
    pub request_path: String,
    /// Response status code
    pub status_code: Option<u16>,
    /// Response body snapshot, when it could be captured
    #[schema(value_type = Option<Object>)]
    pub response_body: Option<Value>,
    /// When the request started
    pub started_at: DateTime<Utc>,
    /// Statements in execution order
    pub queries: Vec<CapturedQuery>,
    /// Sum of statement durations in seconds
    pub total_duration: f64,
    /// Whether an N+1 pattern was detected
    pub is_n_plus_one: bool,
    /// How to fix the detected N+1 pattern
    pub n_plus_one_suggestion: Option<String>,
    /// Index advisor output joined with "; "
    pub index_suggestion: Option<String>,
    pub index_suggestions: Vec<IndexSuggestionInfo>,
    /// When the index advisor last ran for this capture
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl From<StoredCapture> for QueryStoreRecord {
    fn from(capture: StoredCapture) -> Self {
        let index_suggestion = if capture.index_suggestions.is_empty() {
            None
        } else {
            Some(
                capture
                    .index_suggestions
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        Self {
            id: capture.id,
            method: capture.method,
            request_path: capture.request_path,
            status_code: capture.status_code,
            response_body: capture.response_body,
            started_at: capture.started_at,
            queries: capture
                .statements
                .into_iter()
                .map(CapturedQuery::from)
                .collect(),
            total_duration: capture.total_duration,
            is_n_plus_one: capture.is_n_plus_one,
            n_plus_one_suggestion: capture.n_plus_one_suggestion,
            index_suggestion,
            index_suggestions: capture
                .index_suggestions
                .into_iter()
                .map(|suggestion| IndexSuggestionInfo {
                    statement: suggestion.to_string(),
                    table: suggestion.table,
                    columns: suggestion.columns,
                    rationale: suggestion.rationale,
                })
                .collect(),
            analyzed_at: capture.analyzed_at,
        }
    }
}

/// Paginated list of stored captures
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryRecordList {
    /// Total count (without pagination)
    pub count: u64,
    pub results: Vec<QueryStoreRecord>,
}

impl From<StoredPage<StoredCapture>> for QueryRecordList {
    fn from(page: StoredPage<StoredCapture>) -> Self {
        Self {
            count: page.count,
            results: page.results.into_iter().map(QueryStoreRecord::from).collect(),
        }
    }
}

/// Request path usage
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointUsage {
    pub request_path: String,
    /// Number of captured requests
    pub total_usage: i64,
}

/// Paginated endpoint usage ranking
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EndpointUsageList {
    pub count: u64,
    pub results: Vec<EndpointUsage>,
}

impl From<StoredPage<sqlscope_store::EndpointUsage>> for EndpointUsageList {
    fn from(page: StoredPage<sqlscope_store::EndpointUsage>) -> Self {
        Self {
            count: page.count,
            results: page
                .results
                .into_iter()
                .map(|usage| EndpointUsage {
                    request_path: usage.request_path,
                    total_usage: usage.total_usage,
                })
                .collect(),
        }
    }
}

/// Table usage
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TableUsage {
    pub table_name: String,
    /// Number of statements referencing the table
    pub total_usage: i64,
}

/// Paginated table usage ranking
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TableUsageList {
    pub count: u64,
    pub results: Vec<TableUsage>,
}

impl From<StoredPage<sqlscope_store::TableUsage>> for TableUsageList {
    fn from(page: StoredPage<sqlscope_store::TableUsage>) -> Self {
        Self {
            count: page.count,
            results: page
                .results
                .into_iter()
                .map(|usage| TableUsage {
                    table_name: usage.table_name,
                    total_usage: usage.total_usage,
                })
                .collect(),
        }
    }
}

/// Query parameters shared by the report endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ReportQuery {
    /// Sort key (list endpoint only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    /// Page size (default: 10, max: 1000)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    /// Number of records to skip (default: 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
    /// Start of window, RFC 3339 or YYYY-MM-DD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_date: Option<String>,
    /// End of window, RFC 3339 or YYYY-MM-DD (whole day)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_date: Option<String>,
}

/// Accepted analysis request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnalyzeResponse {
    pub id: String,
    pub status: String,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
    /// Whether the index advisor is running
    pub advisor_enabled: bool,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}
