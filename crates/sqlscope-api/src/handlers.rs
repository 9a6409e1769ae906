use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlscope_advisor::AdvisorError;
use sqlscope_store::{PageRequest, SortBy, StoreError, TimeWindow};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::models::*;
use crate::AppState;

/// Largest accepted page size
const MAX_LIMIT: i64 = 1000;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, code: &str, error: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error,
            code: Some(code.to_string()),
        }),
    )
}

fn bad_request(code: &str, error: String) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, code, error)
}

fn store_error(e: StoreError) -> ApiError {
    error!("Query store error: {}", e);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "STORE_ERROR",
        format!("Query store error: {}", e),
    )
}

fn parse_query(query: Result<Query<ReportQuery>, QueryRejection>) -> Result<ReportQuery, ApiError> {
    query
        .map(|Query(query)| query)
        .map_err(|e| bad_request("INVALID_QUERY", e.body_text()))
}

fn parse_date(field: &str, value: &str, end_of_day: bool) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    let invalid = || {
        bad_request(
            "INVALID_DATE",
            format!(
                "Invalid {} '{}': expected an RFC 3339 timestamp or YYYY-MM-DD",
                field, value
            ),
        )
    };

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?;
    let naive = if end_of_day {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    }
    .ok_or_else(invalid)?;

    Ok(Utc.from_utc_datetime(&naive))
}

fn parse_window(query: &ReportQuery) -> Result<TimeWindow, ApiError> {
    let from = query
        .from_date
        .as_deref()
        .map(|value| parse_date("from_date", value, false))
        .transpose()?;
    let to = query
        .to_date
        .as_deref()
        .map(|value| parse_date("to_date", value, true))
        .transpose()?;

    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(bad_request(
                "INVALID_DATE_RANGE",
                "from_date must not be after to_date".to_string(),
            ));
        }
    }

    Ok(TimeWindow::between(from, to))
}

fn parse_page(query: &ReportQuery) -> Result<PageRequest, ApiError> {
    let defaults = PageRequest::default();

    let limit = match query.limit {
        None => defaults.limit,
        Some(limit) if limit <= 0 => {
            return Err(bad_request(
                "INVALID_LIMIT",
                format!("limit must be a positive integer, got {}", limit),
            ))
        }
        Some(limit) => limit.min(MAX_LIMIT) as u64,
    };

    let offset = match query.skip {
        None => defaults.offset,
        Some(skip) if skip < 0 => {
            return Err(bad_request(
                "INVALID_SKIP",
                format!("skip must be a non-negative integer, got {}", skip),
            ))
        }
        Some(skip) => skip as u64,
    };

    Ok(PageRequest::new(limit, offset))
}

fn parse_sort(sort_by: Option<&str>) -> Result<SortBy, ApiError> {
    match sort_by {
        None => Ok(SortBy::default()),
        Some("execution_duration") => Ok(SortBy::ExecutionDuration),
        Some("execution_time") => Ok(SortBy::ExecutionTime),
        Some("rows_affected") | Some("row_affected") => Ok(SortBy::RowsAffected),
        Some(other) => Err(bad_request(
            "INVALID_SORT_KEY",
            format!(
                "Invalid sort_by '{}': expected execution_duration, execution_time or rows_affected",
                other
            ),
        )),
    }
}

/// Health check
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        advisor_enabled: state.advisor.is_some(),
    })
}

/// List stored captures
#[utoipa::path(
    get,
    path = "/api/queries",
    params(
        ("sort_by" = Option<String>, Query, description = "execution_duration (default), execution_time or rows_affected"),
        ("limit" = Option<i64>, Query, description = "Page size (default: 10, max: 1000)"),
        ("skip" = Option<i64>, Query, description = "Records to skip (default: 0)"),
        ("from_date" = Option<String>, Query, description = "Window start, RFC 3339 or YYYY-MM-DD"),
        ("to_date" = Option<String>, Query, description = "Window end, RFC 3339 or YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Stored captures", body = QueryRecordList),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "queries"
)]
pub async fn list_queries(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<QueryRecordList>, (StatusCode, Json<ErrorResponse>)> {
    let query = parse_query(query)?;
    let sort = parse_sort(query.sort_by.as_deref())?;
    let window = parse_window(&query)?;
    let page = parse_page(&query)?;
    debug!("Listing captures: {:?}", query);

    let result = state
        .store
        .query(window, sort, page)
        .await
        .map_err(store_error)?;

    Ok(Json(result.into()))
}

/// Get one stored capture
#[utoipa::path(
    get,
    path = "/api/queries/{id}",
    params(
        ("id" = String, Path, description = "Capture ID")
    ),
    responses(
        (status = 200, description = "Stored capture", body = QueryStoreRecord),
        (status = 404, description = "Capture not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "queries"
)]
pub async fn get_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<QueryStoreRecord>, (StatusCode, Json<ErrorResponse>)> {
    let capture = state.store.get(&id).await.map_err(store_error)?;

    match capture {
        Some(capture) => Ok(Json(capture.into())),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Capture '{}' not found", id),
        )),
    }
}

/// Queue a stored capture for index analysis
#[utoipa::path(
    post,
    path = "/api/queries/{id}/analyze",
    params(
        ("id" = String, Path, description = "Capture ID")
    ),
    responses(
        (status = 202, description = "Analysis queued", body = AnalyzeResponse),
        (status = 404, description = "Capture not found", body = ErrorResponse),
        (status = 503, description = "Index advisor unavailable or busy", body = ErrorResponse)
    ),
    tag = "queries"
)]
pub async fn analyze_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), (StatusCode, Json<ErrorResponse>)> {
    let Some(advisor) = &state.advisor else {
        return Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "ADVISOR_DISABLED",
            "Index advisor is not enabled".to_string(),
        ));
    };

    if state.store.get(&id).await.map_err(store_error)?.is_none() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Capture '{}' not found", id),
        ));
    }

    match advisor.enqueue(id.clone()) {
        Ok(()) => {
            info!("Queued capture {} for index analysis", id);
            Ok((
                StatusCode::ACCEPTED,
                Json(AnalyzeResponse {
                    id,
                    status: "queued".to_string(),
                }),
            ))
        }
        Err(e @ AdvisorError::QueueFull(_)) => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_FULL",
            e.to_string(),
        )),
        Err(e) => Err(error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "ADVISOR_UNAVAILABLE",
            e.to_string(),
        )),
    }
}

/// Captures whose total duration reaches the slow-query threshold
#[utoipa::path(
    get,
    path = "/api/slow-queries",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (default: 10, max: 1000)"),
        ("skip" = Option<i64>, Query, description = "Records to skip (default: 0)"),
        ("from_date" = Option<String>, Query, description = "Window start, RFC 3339 or YYYY-MM-DD"),
        ("to_date" = Option<String>, Query, description = "Window end, RFC 3339 or YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Slow captures, most recent first", body = QueryRecordList),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn slow_queries(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<QueryRecordList>, (StatusCode, Json<ErrorResponse>)> {
    let query = parse_query(query)?;
    let window = parse_window(&query)?;
    let page = parse_page(&query)?;

    let result = state
        .store
        .aggregate_slow(state.slow_query_threshold_secs, window, page)
        .await
        .map_err(store_error)?;

    Ok(Json(result.into()))
}

/// Captures ranked by total duration
#[utoipa::path(
    get,
    path = "/api/most-slow-queries",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (default: 10, max: 1000)"),
        ("skip" = Option<i64>, Query, description = "Records to skip (default: 0)"),
        ("from_date" = Option<String>, Query, description = "Window start, RFC 3339 or YYYY-MM-DD"),
        ("to_date" = Option<String>, Query, description = "Window end, RFC 3339 or YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Captures, slowest first", body = QueryRecordList),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn most_slow_queries(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<QueryRecordList>, (StatusCode, Json<ErrorResponse>)> {
    let query = parse_query(query)?;
    let window = parse_window(&query)?;
    let page = parse_page(&query)?;

    let result = state
        .store
        .most_slow(window, page)
        .await
        .map_err(store_error)?;

    Ok(Json(result.into()))
}

/// Request paths ranked by number of captures
#[utoipa::path(
    get,
    path = "/api/most-used-endpoints",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (default: 10, max: 1000)"),
        ("skip" = Option<i64>, Query, description = "Records to skip (default: 0)"),
        ("from_date" = Option<String>, Query, description = "Window start, RFC 3339 or YYYY-MM-DD"),
        ("to_date" = Option<String>, Query, description = "Window end, RFC 3339 or YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Endpoint usage ranking", body = EndpointUsageList),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn most_used_endpoints(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<EndpointUsageList>, (StatusCode, Json<ErrorResponse>)> {
    let query = parse_query(query)?;
    let window = parse_window(&query)?;
    let page = parse_page(&query)?;

    let result = state
        .store
        .most_used_endpoints(window, page)
        .await
        .map_err(store_error)?;

    Ok(Json(result.into()))
}

/// Tables ranked by number of statements referencing them
#[utoipa::path(
    get,
    path = "/api/most-used-tables",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (default: 10, max: 1000)"),
        ("skip" = Option<i64>, Query, description = "Records to skip (default: 0)"),
        ("from_date" = Option<String>, Query, description = "Window start, RFC 3339 or YYYY-MM-DD"),
        ("to_date" = Option<String>, Query, description = "Window end, RFC 3339 or YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Table usage ranking", body = TableUsageList),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn most_used_tables(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<TableUsageList>, (StatusCode, Json<ErrorResponse>)> {
    let query = parse_query(query)?;
    let window = parse_window(&query)?;
    let page = parse_page(&query)?;

    let result = state
        .store
        .most_used_tables(window, page)
        .await
        .map_err(store_error)?;

    Ok(Json(result.into()))
}

/// Captures flagged with an N+1 pattern
#[utoipa::path(
    get,
    path = "/api/select-or-prefetch-related-potential-candidate-endpoints",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (default: 10, max: 1000)"),
        ("skip" = Option<i64>, Query, description = "Records to skip (default: 0)"),
        ("from_date" = Option<String>, Query, description = "Window start, RFC 3339 or YYYY-MM-DD"),
        ("to_date" = Option<String>, Query, description = "Window end, RFC 3339 or YYYY-MM-DD")
    ),
    responses(
        (status = 200, description = "Flagged captures, most recent first", body = QueryRecordList),
        (status = 400, description = "Invalid query parameters", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "reports"
)]
pub async fn n_plus_one_candidates(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<QueryRecordList>, (StatusCode, Json<ErrorResponse>)> {
    let query = parse_query(query)?;
    let window = parse_window(&query)?;
    let page = parse_page(&query)?;

    let result = state
        .store
        .n_plus_one_candidates(window, page)
        .await
        .map_err(store_error)?;

    Ok(Json(result.into()))
}
