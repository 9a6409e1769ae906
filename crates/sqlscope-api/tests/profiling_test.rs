//! Integration tests for the profiling middleware
//!
//! An application router runs real statements against an in-memory SQLite
//! database through `ProfiledDriver`; the captures land in a second
//! in-memory database behind a `QueryStore`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use sea_orm::{Database, DatabaseConnection, DbErr};
use serde_json::{json, Value};
use sqlscope_api::{middleware::instrument, PersistMode, Profiler, ProfilerConfig};
use sqlscope_core::{
    CaptureHandle, Driver, Params, ProfiledDriver, RequestCapture, SeaOrmDriver, SqlParam,
    StatementCall, StaticRelations,
};
use sqlscope_store::{
    connect, migrate, CaptureRecorder, PageRequest, QueryStore, RecordOutcome, SortBy,
    StoreError, TimeWindow,
};
use tower::ServiceExt; // For `oneshot` method

/// Recorder counting how often it is asked to persist
struct CountingRecorder {
    store: QueryStore,
    calls: AtomicUsize,
}

#[async_trait]
impl CaptureRecorder for CountingRecorder {
    async fn record(&self, capture: &RequestCapture) -> Result<RecordOutcome, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.store.record(capture).await
    }
}

/// Recorder that takes a while before writing
struct SlowRecorder {
    store: QueryStore,
    calls: AtomicUsize,
}

#[async_trait]
impl CaptureRecorder for SlowRecorder {
    async fn record(&self, capture: &RequestCapture) -> Result<RecordOutcome, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.store.record(capture).await
    }
}

/// Recorder that always fails
struct FailingRecorder;

#[async_trait]
impl CaptureRecorder for FailingRecorder {
    async fn record(&self, _capture: &RequestCapture) -> Result<RecordOutcome, StoreError> {
        Err(StoreError::Database(DbErr::Custom("store offline".to_string())))
    }
}

async fn create_test_store() -> QueryStore {
    let db = connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    migrate(&db).await.expect("Failed to run migrations");
    QueryStore::new(db)
}

async fn create_app_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create application database");

    let driver = SeaOrmDriver::new(db.clone(), "default");
    let none = Params::default();
    for ddl in [
        "CREATE TABLE customer (customer_id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        "CREATE TABLE rental (rental_id INTEGER PRIMARY KEY, customer_id INTEGER NOT NULL)",
        "INSERT INTO customer (customer_id, name) VALUES (10, 'Mary'), (11, 'Linda')",
    ] {
        driver
            .execute(StatementCall::new(ddl, &none))
            .await
            .expect("Failed to seed application database");
    }

    db
}

fn driver(db: DatabaseConnection, capture: CaptureHandle) -> ProfiledDriver<SeaOrmDriver<DatabaseConnection>> {
    ProfiledDriver::new(SeaOrmDriver::new(db, "default"), capture)
}

/// One write followed by a customer lookup per rental
async fn create_rentals(
    Extension(capture): Extension<CaptureHandle>,
    State(db): State<DatabaseConnection>,
) -> Json<Value> {
    let driver = driver(db, capture);
    let none = Params::default();
    driver
        .execute(StatementCall::new(
            "INSERT INTO rental (rental_id, customer_id) VALUES (1, 10), (2, 11)",
            &none,
        ))
        .await
        .unwrap();

    for customer_id in [10i64, 11] {
        let params = Params::Positional(vec![SqlParam::from(customer_id)]);
        driver
            .execute(StatementCall::new(
                "SELECT * FROM customer WHERE customer_id = ?",
                &params,
            ))
            .await
            .unwrap();
    }

    Json(json!({"created": 2}))
}

async fn failing_lookup(
    Extension(capture): Extension<CaptureHandle>,
    State(db): State<DatabaseConnection>,
) -> impl IntoResponse {
    let driver = driver(db, capture);
    let none = Params::default();
    let result = driver
        .execute(StatementCall::new("SELECT * FROM missing_table", &none))
        .await;
    assert!(result.is_err());

    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "lookup failed"})))
}

async fn panicking(
    Extension(capture): Extension<CaptureHandle>,
    State(db): State<DatabaseConnection>,
) -> Json<Value> {
    let driver = driver(db, capture);
    let none = Params::default();
    driver
        .execute(StatementCall::new("SELECT * FROM customer", &none))
        .await
        .unwrap();
    panic!("handler bug");
}

async fn stalled(
    Extension(capture): Extension<CaptureHandle>,
    State(db): State<DatabaseConnection>,
) -> Json<Value> {
    let driver = driver(db, capture);
    let none = Params::default();
    driver
        .execute(StatementCall::new("SELECT * FROM customer", &none))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    Json(json!({}))
}

async fn plain_text() -> &'static str {
    "pong"
}

fn app(db: DatabaseConnection, profiler: Profiler) -> Router {
    let router = Router::new()
        .route("/rentals", get(create_rentals))
        .route("/broken", get(failing_lookup))
        .route("/panic", get(panicking))
        .route("/stalled", get(stalled))
        .route("/ping", get(plain_text))
        .with_state(db);

    instrument(router, profiler)
}

fn catalog() -> Arc<StaticRelations> {
    Arc::new(StaticRelations::new().belongs_to("rental", "customer", "customer"))
}

fn profiler(recorder: Arc<dyn CaptureRecorder>, persist_mode: PersistMode) -> Profiler {
    Profiler::new(
        recorder,
        catalog(),
        ProfilerConfig {
            persist_mode,
            ..ProfilerConfig::default()
        },
    )
}

fn request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

async fn stored_count(store: &QueryStore) -> u64 {
    store
        .query(TimeWindow::all(), SortBy::default(), PageRequest::default())
        .await
        .unwrap()
        .count
}

/// Poll until a spawned flush has landed
async fn wait_for_records(store: &QueryStore, expected: u64) {
    for _ in 0..100 {
        if stored_count(store).await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {} stored captures", expected);
}

#[tokio::test]
async fn test_request_capture_end_to_end() {
    let store = create_test_store().await;
    let recorder = Arc::new(CountingRecorder {
        store: store.clone(),
        calls: AtomicUsize::new(0),
    });
    let app = app(create_app_db().await, profiler(recorder.clone(), PersistMode::Blocking));

    let response = app.oneshot(request("/rentals")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"created": 2}));

    assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

    let page = store
        .query(TimeWindow::all(), SortBy::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.count, 1);

    let capture = &page.results[0];
    assert_eq!(capture.method, "GET");
    assert_eq!(capture.request_path, "/rentals");
    assert_eq!(capture.status_code, Some(200));
    assert_eq!(capture.response_body, Some(json!({"created": 2})));
    assert_eq!(capture.statements.len(), 3);
    assert!(capture.statements[0].sql.starts_with("INSERT INTO rental"));
    assert!(capture.statements[1].tables.contains("customer"));
    assert_eq!(capture.statements[1].params, json!([10]));
    assert_eq!(capture.statements[2].params, json!([11]));

    assert!(capture.is_n_plus_one);
    let suggestion = capture.n_plus_one_suggestion.as_deref().unwrap();
    assert!(suggestion.contains("rental.customer"));
}

#[tokio::test]
async fn test_error_response_is_persisted_once() {
    let store = create_test_store().await;
    let recorder = Arc::new(CountingRecorder {
        store: store.clone(),
        calls: AtomicUsize::new(0),
    });
    let app = app(create_app_db().await, profiler(recorder.clone(), PersistMode::Blocking));

    let response = app.oneshot(request("/broken")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

    let page = store
        .query(TimeWindow::all(), SortBy::default(), PageRequest::default())
        .await
        .unwrap();
    let capture = &page.results[0];
    assert_eq!(capture.status_code, Some(500));
    assert_eq!(capture.statements.len(), 1);
    assert!(capture.statements[0].failed);
}

#[tokio::test]
async fn test_panicking_handler_is_persisted_once() {
    let store = create_test_store().await;
    let recorder = Arc::new(CountingRecorder {
        store: store.clone(),
        calls: AtomicUsize::new(0),
    });
    let app = app(create_app_db().await, profiler(recorder.clone(), PersistMode::Blocking));

    let outcome = tokio::spawn(app.oneshot(request("/panic"))).await;
    assert!(outcome.unwrap_err().is_panic());

    wait_for_records(&store, 1).await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

    let page = store
        .query(TimeWindow::all(), SortBy::default(), PageRequest::default())
        .await
        .unwrap();
    let capture = &page.results[0];
    assert_eq!(capture.request_path, "/panic");
    assert_eq!(capture.status_code, None);
    assert_eq!(capture.statements.len(), 1);
}

#[tokio::test]
async fn test_cancelled_request_is_persisted_once() {
    let store = create_test_store().await;
    let recorder = Arc::new(CountingRecorder {
        store: store.clone(),
        calls: AtomicUsize::new(0),
    });
    let app = app(create_app_db().await, profiler(recorder.clone(), PersistMode::Blocking));

    let outcome =
        tokio::time::timeout(Duration::from_millis(200), app.oneshot(request("/stalled"))).await;
    assert!(outcome.is_err());

    wait_for_records(&store, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

    let page = store
        .query(TimeWindow::all(), SortBy::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.results[0].statements.len(), 1);
}

#[tokio::test]
async fn test_request_cancelled_during_blocking_write_is_persisted() {
    let store = create_test_store().await;
    let recorder = Arc::new(SlowRecorder {
        store: store.clone(),
        calls: AtomicUsize::new(0),
    });
    let app = app(create_app_db().await, profiler(recorder.clone(), PersistMode::Blocking));

    // The handler returns at once; the request is dropped while the capture
    // is being written
    let outcome =
        tokio::time::timeout(Duration::from_millis(100), app.oneshot(request("/ping"))).await;
    assert!(outcome.is_err());

    wait_for_records(&store, 1).await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

    let page = store
        .query(TimeWindow::all(), SortBy::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.results[0].request_path, "/ping");
    assert_eq!(page.results[0].status_code, Some(200));
}

#[tokio::test]
async fn test_background_persistence() {
    let store = create_test_store().await;
    let recorder = Arc::new(CountingRecorder {
        store: store.clone(),
        calls: AtomicUsize::new(0),
    });
    let app = app(
        create_app_db().await,
        profiler(recorder.clone(), PersistMode::Background),
    );

    let response = app.oneshot(request("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"pong");

    wait_for_records(&store, 1).await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

    let page = store
        .query(TimeWindow::all(), SortBy::default(), PageRequest::default())
        .await
        .unwrap();
    let capture = &page.results[0];
    assert!(capture.statements.is_empty());
    assert_eq!(capture.response_body, Some(json!("pong")));
    assert!(!capture.is_n_plus_one);
}

#[tokio::test]
async fn test_recorder_failure_does_not_affect_response() {
    let app = app(
        create_app_db().await,
        profiler(Arc::new(FailingRecorder), PersistMode::Blocking),
    );

    let response = app.oneshot(request("/rentals")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"created": 2}));
}
