//! Write and read operations over stored captures

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult,
    Iterable, NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set,
    TransactionTrait, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlscope_core::{IndexSuggestion, RequestCapture, StatementRecord};
use tracing::debug;

use crate::entities::{captured_statement, request_capture, statement_table};
use crate::StoreError;

/// Rows per multi-row insert
const INSERT_CHUNK: usize = 500;

/// Inclusive time window on capture start. Open ends match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    /// The whole history
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    fn condition(&self) -> Condition {
        let mut condition = Condition::all();
        if let Some(from) = self.from {
            condition = condition.add(request_capture::Column::StartedAt.gte(from));
        }
        if let Some(to) = self.to {
            condition = condition.add(request_capture::Column::StartedAt.lte(to));
        }
        condition
    }
}

/// Explicit limit/offset pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u64,
    pub offset: u64,
}

impl PageRequest {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
        }
    }
}

/// Sort order for [`QueryStore::query`]. All keys sort descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Total duration of the capture's statements
    #[default]
    ExecutionDuration,
    /// Request start time
    ExecutionTime,
    /// Sum of rows affected over the capture's statements
    RowsAffected,
}

/// One page of results plus the total number of matches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPage<T> {
    pub count: u64,
    pub results: Vec<T>,
}

/// A capture as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredCapture {
    pub id: String,
    pub method: String,
    pub request_path: String,
    pub status_code: Option<u16>,
    pub response_body: Option<JsonValue>,
    pub started_at: DateTime<Utc>,
    pub statements: Vec<StatementRecord>,
    /// Sum of statement durations in seconds, computed by the query
    pub total_duration: f64,
    pub is_n_plus_one: bool,
    pub n_plus_one_suggestion: Option<String>,
    pub index_suggestions: Vec<IndexSuggestion>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

/// Request path usage count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromQueryResult)]
pub struct EndpointUsage {
    pub request_path: String,
    pub total_usage: i64,
}

/// Table usage count, one per statement referencing the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromQueryResult)]
pub struct TableUsage {
    pub table_name: String,
    pub total_usage: i64,
}

/// Outcome of [`QueryStore::record`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// A capture with the same id is already stored; nothing was written
    AlreadyRecorded,
}

/// Sink for finished captures
#[async_trait]
pub trait CaptureRecorder: Send + Sync {
    async fn record(&self, capture: &RequestCapture) -> Result<RecordOutcome, StoreError>;
}

#[derive(Debug, FromQueryResult)]
struct CaptureRow {
    id: String,
    method: String,
    request_path: String,
    status_code: Option<i32>,
    response_body: Option<String>,
    started_at: DateTime<Utc>,
    is_n_plus_one: bool,
    n_plus_one_suggestion: Option<String>,
    index_suggestions: Option<String>,
    analyzed_at: Option<DateTime<Utc>>,
    total_duration: Option<f64>,
}

fn total_duration_expr() -> SimpleExpr {
    let sum = Expr::col((
        captured_statement::Entity,
        captured_statement::Column::ExecutionDuration,
    ))
    .sum();
    SimpleExpr::from(Func::coalesce([
        sum,
        SimpleExpr::Value(Value::Double(Some(0.0))),
    ]))
}

fn total_rows_expr() -> SimpleExpr {
    let sum = Expr::col((
        captured_statement::Entity,
        captured_statement::Column::RowsAffected,
    ))
    .sum();
    SimpleExpr::from(Func::coalesce([
        sum,
        SimpleExpr::Value(Value::BigInt(Some(0))),
    ]))
}

/// Captures joined with their statements, one row per capture
fn captures_with_totals() -> Select<request_capture::Entity> {
    request_capture::Entity::find()
        .select_only()
        .columns(request_capture::Column::iter())
        .column_as(total_duration_expr(), "total_duration")
        .left_join(captured_statement::Entity)
        .group_by(request_capture::Column::Id)
}

fn to_statement_record(model: captured_statement::Model) -> StatementRecord {
    StatementRecord {
        sql: model.sql,
        params: serde_json::from_str(&model.params).unwrap_or_default(),
        execution_time: model.execution_time,
        execution_duration: model.execution_duration,
        is_in_transaction: model.is_in_transaction,
        db_alias: model.db_alias,
        rows_affected: model.rows_affected,
        db_vendor: model.db_vendor,
        needs_rollback: model.needs_rollback,
        tables: serde_json::from_str(&model.tables).unwrap_or_default(),
        failed: model.failed,
    }
}

fn position(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

/// Query store over a SeaORM connection
#[derive(Clone)]
pub struct QueryStore {
    db: DatabaseConnection,
}

impl QueryStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Persist one capture with all of its statements.
    ///
    /// Writes are keyed by capture id; recording the same capture again is
    /// a no-op reported as [`RecordOutcome::AlreadyRecorded`].
    pub async fn record(&self, capture: &RequestCapture) -> Result<RecordOutcome, StoreError> {
        let id = capture.id.to_string();

        if request_capture::Entity::find_by_id(id.clone())
            .one(&self.db)
            .await?
            .is_some()
        {
            debug!("Capture {} already recorded", id);
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let response_body = capture
            .response_body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut statements = Vec::with_capacity(capture.statements.len());
        let mut tables = Vec::new();
        for (index, statement) in capture.statements.iter().enumerate() {
            statements.push(captured_statement::ActiveModel {
                id: NotSet,
                capture_id: Set(id.clone()),
                position: Set(position(index)),
                sql: Set(statement.sql.clone()),
                params: Set(serde_json::to_string(&statement.params)?),
                execution_time: Set(statement.execution_time),
                execution_duration: Set(statement.execution_duration),
                is_in_transaction: Set(statement.is_in_transaction),
                db_alias: Set(statement.db_alias.clone()),
                rows_affected: Set(statement.rows_affected),
                db_vendor: Set(statement.db_vendor.clone()),
                needs_rollback: Set(statement.needs_rollback),
                tables: Set(serde_json::to_string(&statement.tables)?),
                failed: Set(statement.failed),
            });

            for table in &statement.tables {
                tables.push(statement_table::ActiveModel {
                    id: NotSet,
                    capture_id: Set(id.clone()),
                    position: Set(position(index)),
                    table_name: Set(table.clone()),
                });
            }
        }

        let txn = self.db.begin().await?;

        request_capture::ActiveModel {
            id: Set(id.clone()),
            method: Set(capture.method.clone()),
            request_path: Set(capture.request_path.clone()),
            status_code: Set(capture.status_code.map(i32::from)),
            response_body: Set(response_body),
            started_at: Set(capture.started_at),
            is_n_plus_one: Set(capture.is_n_plus_one),
            n_plus_one_suggestion: Set(capture.n_plus_one_suggestion.clone()),
            index_suggestions: Set(None),
            analyzed_at: Set(None),
        }
        .insert(&txn)
        .await?;

        while !statements.is_empty() {
            let rest = statements.split_off(statements.len().min(INSERT_CHUNK));
            captured_statement::Entity::insert_many(statements)
                .exec_without_returning(&txn)
                .await?;
            statements = rest;
        }

        while !tables.is_empty() {
            let rest = tables.split_off(tables.len().min(INSERT_CHUNK));
            statement_table::Entity::insert_many(tables)
                .exec_without_returning(&txn)
                .await?;
            tables = rest;
        }

        txn.commit().await?;

        debug!(
            "Recorded capture {} ({} statements) for {}",
            id,
            capture.statements.len(),
            capture.request_path
        );

        Ok(RecordOutcome::Inserted)
    }

    /// Fetch one capture by id
    pub async fn get(&self, id: &str) -> Result<Option<StoredCapture>, StoreError> {
        let row = captures_with_totals()
            .filter(request_capture::Column::Id.eq(id))
            .into_model::<CaptureRow>()
            .one(&self.db)
            .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Captures in a window, sorted by `sort` (descending)
    pub async fn query(
        &self,
        window: TimeWindow,
        sort: SortBy,
        page: PageRequest,
    ) -> Result<StoredPage<StoredCapture>, StoreError> {
        let select = captures_with_totals().filter(window.condition());
        let select = match sort {
            SortBy::ExecutionDuration => select.order_by_desc(total_duration_expr()),
            SortBy::ExecutionTime => select.order_by_desc(request_capture::Column::StartedAt),
            SortBy::RowsAffected => select.order_by_desc(total_rows_expr()),
        };

        self.fetch_page(select, page).await
    }

    /// Captures whose total duration is at least `threshold_secs`, most
    /// recent first
    pub async fn aggregate_slow(
        &self,
        threshold_secs: f64,
        window: TimeWindow,
        page: PageRequest,
    ) -> Result<StoredPage<StoredCapture>, StoreError> {
        let select = captures_with_totals()
            .filter(window.condition())
            .having(Expr::expr(total_duration_expr()).gte(threshold_secs))
            .order_by_desc(request_capture::Column::StartedAt);

        self.fetch_page(select, page).await
    }

    /// Captures ranked by total duration, slowest first
    pub async fn most_slow(
        &self,
        window: TimeWindow,
        page: PageRequest,
    ) -> Result<StoredPage<StoredCapture>, StoreError> {
        let select = captures_with_totals()
            .filter(window.condition())
            .order_by_desc(total_duration_expr());

        self.fetch_page(select, page).await
    }

    /// Captures flagged by the N+1 detector, most recent first
    pub async fn n_plus_one_candidates(
        &self,
        window: TimeWindow,
        page: PageRequest,
    ) -> Result<StoredPage<StoredCapture>, StoreError> {
        let select = captures_with_totals()
            .filter(window.condition())
            .filter(request_capture::Column::IsNPlusOne.eq(true))
            .order_by_desc(request_capture::Column::StartedAt);

        self.fetch_page(select, page).await
    }

    /// Request paths ranked by number of captures
    pub async fn most_used_endpoints(
        &self,
        window: TimeWindow,
        page: PageRequest,
    ) -> Result<StoredPage<EndpointUsage>, StoreError> {
        let usage = Expr::col((request_capture::Entity, request_capture::Column::Id)).count();

        let select = request_capture::Entity::find()
            .select_only()
            .column(request_capture::Column::RequestPath)
            .column_as(usage.clone(), "total_usage")
            .filter(window.condition())
            .group_by(request_capture::Column::RequestPath);

        let count = select.clone().count(&self.db).await?;
        let results = select
            .order_by_desc(usage)
            .order_by_asc(request_capture::Column::RequestPath)
            .offset(page.offset)
            .limit(page.limit)
            .into_model::<EndpointUsage>()
            .all(&self.db)
            .await?;

        Ok(StoredPage { count, results })
    }

    /// Tables ranked by number of statements referencing them
    pub async fn most_used_tables(
        &self,
        window: TimeWindow,
        page: PageRequest,
    ) -> Result<StoredPage<TableUsage>, StoreError> {
        let usage = Expr::col((statement_table::Entity, statement_table::Column::Id)).count();

        let select = statement_table::Entity::find()
            .select_only()
            .column(statement_table::Column::TableName)
            .column_as(usage.clone(), "total_usage")
            .inner_join(request_capture::Entity)
            .filter(window.condition())
            .group_by(statement_table::Column::TableName);

        let count = select.clone().count(&self.db).await?;
        let results = select
            .order_by_desc(usage)
            .order_by_asc(statement_table::Column::TableName)
            .offset(page.offset)
            .limit(page.limit)
            .into_model::<TableUsage>()
            .all(&self.db)
            .await?;

        Ok(StoredPage { count, results })
    }

    /// Store index advisor output on a capture. Returns `false` when the
    /// capture does not exist.
    pub async fn attach_index_suggestions(
        &self,
        id: &str,
        suggestions: &[IndexSuggestion],
    ) -> Result<bool, StoreError> {
        let Some(model) = request_capture::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(false);
        };

        let mut active: request_capture::ActiveModel = model.into();
        active.index_suggestions = Set(Some(serde_json::to_string(suggestions)?));
        active.analyzed_at = Set(Some(Utc::now()));
        active.update(&self.db).await?;

        Ok(true)
    }

    async fn fetch_page(
        &self,
        select: Select<request_capture::Entity>,
        page: PageRequest,
    ) -> Result<StoredPage<StoredCapture>, StoreError> {
        let count = select.clone().count(&self.db).await?;

        let rows = select
            .order_by_asc(request_capture::Column::Id)
            .offset(page.offset)
            .limit(page.limit)
            .into_model::<CaptureRow>()
            .all(&self.db)
            .await?;

        let results = self.hydrate(rows).await?;
        Ok(StoredPage { count, results })
    }

    /// Attach statements to capture rows, keeping row order
    async fn hydrate(&self, rows: Vec<CaptureRow>) -> Result<Vec<StoredCapture>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let statements = captured_statement::Entity::find()
            .filter(captured_statement::Column::CaptureId.is_in(ids))
            .order_by_asc(captured_statement::Column::CaptureId)
            .order_by_asc(captured_statement::Column::Position)
            .all(&self.db)
            .await?;

        let mut by_capture: HashMap<String, Vec<StatementRecord>> = HashMap::new();
        for statement in statements {
            by_capture
                .entry(statement.capture_id.clone())
                .or_default()
                .push(to_statement_record(statement));
        }

        Ok(rows
            .into_iter()
            .map(|row| StoredCapture {
                statements: by_capture.remove(&row.id).unwrap_or_default(),
                method: row.method,
                request_path: row.request_path,
                status_code: row.status_code.and_then(|code| u16::try_from(code).ok()),
                response_body: row
                    .response_body
                    .and_then(|body| serde_json::from_str(&body).ok()),
                started_at: row.started_at,
                total_duration: row.total_duration.unwrap_or(0.0),
                is_n_plus_one: row.is_n_plus_one,
                n_plus_one_suggestion: row.n_plus_one_suggestion,
                index_suggestions: row
                    .index_suggestions
                    .and_then(|json| serde_json::from_str(&json).ok())
                    .unwrap_or_default(),
                analyzed_at: row.analyzed_at,
                id: row.id,
            })
            .collect())
    }
}

#[async_trait]
impl CaptureRecorder for QueryStore {
    async fn record(&self, capture: &RequestCapture) -> Result<RecordOutcome, StoreError> {
        QueryStore::record(self, capture).await
    }
}
