//! Request profiling middleware and reporting API
//!
//! [`middleware::instrument`] wraps an application router so every request
//! gets a capture that is flushed through the [`Profiler`].
//! [`ApiServer`] serves the reports over the query store.

pub mod handlers;
pub mod middleware;
pub mod models;
pub mod profiler;

pub use profiler::{PersistMode, Profiler, ProfilerConfig};

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use sqlscope_advisor::AdvisorQueue;
use sqlscope_store::QueryStore;
use std::{future::Future, net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across handlers
pub struct AppState {
    pub store: QueryStore,
    pub advisor: Option<AdvisorQueue>,
    /// Total duration in seconds from which a capture counts as slow
    pub slow_query_threshold_secs: f64,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "SQLScope API",
        version = "0.1.0",
        description = "Reports over SQL statements captured per HTTP request",
        contact(
            name = "SQLScope Team",
            email = "team@sqlscope.dev"
        )
    ),
    paths(
        handlers::health_check,
        handlers::list_queries,
        handlers::get_query,
        handlers::analyze_query,
        handlers::slow_queries,
        handlers::most_slow_queries,
        handlers::most_used_endpoints,
        handlers::most_used_tables,
        handlers::n_plus_one_candidates,
    ),
    components(
        schemas(
            models::CapturedQuery,
            models::IndexSuggestionInfo,
            models::QueryStoreRecord,
            models::QueryRecordList,
            models::EndpointUsage,
            models::EndpointUsageList,
            models::TableUsage,
            models::TableUsageList,
            models::ReportQuery,
            models::AnalyzeResponse,
            models::HealthResponse,
            models::ErrorResponse,
        )
    ),
    tags(
        (name = "queries", description = "Stored request captures"),
        (name = "reports", description = "Aggregated reports"),
        (name = "system", description = "System health and info endpoints")
    )
)]
struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    /// Address to bind the API server
    pub bind_addr: SocketAddr,
    /// Enable CORS (for development)
    pub enable_cors: bool,
    /// Threshold for `/api/slow-queries`, in seconds
    pub slow_query_threshold_secs: f64,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            slow_query_threshold_secs: 1.0,
        }
    }
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, store: QueryStore, advisor: Option<AdvisorQueue>) -> Self {
        let state = Arc::new(AppState {
            store,
            advisor,
            slow_query_threshold_secs: config.slow_query_threshold_secs,
        });

        Self { config, state }
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let api_doc = ApiDoc::openapi();

        let api_router = Router::new()
            .route("/api/health", get(handlers::health_check))
            .route("/api/queries", get(handlers::list_queries))
            .route("/api/queries/{id}", get(handlers::get_query))
            .route("/api/queries/{id}/analyze", post(handlers::analyze_query))
            .route("/api/slow-queries", get(handlers::slow_queries))
            .route("/api/most-slow-queries", get(handlers::most_slow_queries))
            .route("/api/most-used-endpoints", get(handlers::most_used_endpoints))
            .route("/api/most-used-tables", get(handlers::most_used_tables))
            .route(
                "/api/select-or-prefetch-related-potential-candidate-endpoints",
                get(handlers::n_plus_one_candidates),
            )
            .with_state(self.state.clone());

        // SwaggerUi also serves /api/openapi.json
        let router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", api_doc))
            .merge(api_router);

        let mut router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_origin(Any);
            router = router.layer(cors);
        }

        router
    }

    /// Start the API server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start the API server and stop when `shutdown` resolves
    pub async fn start_with_shutdown<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();

        info!("Starting API server on {}", self.config.bind_addr);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );
        info!("Swagger UI: http://{}/swagger-ui", self.config.bind_addr);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}
