use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use hyper::Server;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::LakehouseError;
use crate::observability::metrics;
use crate::pipeline::analysis::{AnalysisEngine, AnalysisFilters, FilterParams, SummaryEnvelope};
use crate::pipeline::storage::{FsTableStore, TableStore};

/// Shared, read-only state of the query service.
#[derive(Clone)]
pub struct AppState {
    pub engine: AnalysisEngine,
    pub metrics: Option<PrometheusHandle>,
    pub request_timeout: Duration,
}

enum ApiError {
    Lakehouse(LakehouseError),
    Timeout(Duration),
}

impl From<LakehouseError> for ApiError {
    fn from(e: LakehouseError) -> Self {
        ApiError::Lakehouse(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Lakehouse(LakehouseError::InvalidFilter { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Lakehouse(LakehouseError::TableNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Lakehouse(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match &self {
            ApiError::Timeout(limit) => (
                "timeout",
                format!("query did not finish within {} ms", limit.as_millis()),
            ),
            ApiError::Lakehouse(e) if status.is_server_error() => {
                error!("Query failed: {}", e);
                (e.code(), "internal error while running the analysis".to_string())
            }
            ApiError::Lakehouse(e) => (e.code(), e.to_string()),
        };
        let body = Json(json!({
            "status": "error",
            "code": code,
            "message": message,
        }));
        (status, body).into_response()
    }
}

/// Service banner
async fn index() -> impl IntoResponse {
    Json(json!({
        "service": "disaster_lakehouse",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/api/disaster_summary", "/health", "/metrics"],
    }))
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "disaster_lakehouse",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn prometheus(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn disaster_summary(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Response {
    let started = Instant::now();
    let outcome = run_summary(&state, &params).await;
    let elapsed = started.elapsed().as_secs_f64();
    match outcome {
        Ok(response) => {
            metrics::query::request(200, elapsed, response.0);
            response.1
        }
        Err(e) => {
            if matches!(e, ApiError::Timeout(_)) {
                warn!("Summary query timed out after {:.3}s", elapsed);
            }
            metrics::query::request(e.status().as_u16(), elapsed, 0);
            e.into_response()
        }
    }
}

async fn run_summary(
    state: &AppState,
    params: &FilterParams,
) -> Result<(usize, Response), ApiError> {
    let filters = AnalysisFilters::from_params(params)?;
    let result = tokio::time::timeout(state.request_timeout, state.engine.analyze(&filters))
        .await
        .map_err(|_| ApiError::Timeout(state.request_timeout))??;
    let groups = result.len();
    Ok((groups, Json(SummaryEnvelope::success(&result)).into_response()))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any);
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(parsed)
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/metrics", get(prometheus))
        .route("/api/disaster_summary", get(disaster_summary))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origins)),
        )
}

/// Open the configured store and serve queries until the process is stopped.
pub async fn serve(config: &Config, metrics: Option<PrometheusHandle>) -> anyhow::Result<()> {
    let store: Arc<dyn TableStore> = Arc::new(FsTableStore::open(
        &config.storage.root,
        config.storage.lock_policy(),
    )?);
    let engine = AnalysisEngine::with_tables(
        store,
        &config.tables.incidents.name,
        &config.tables.registry.name,
    );
    let state = AppState {
        engine,
        metrics,
        request_timeout: config.server.request_timeout(),
    };
    let app = create_router(state, &config.server.cors_origins);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("HTTP server listening on http://{}", addr);
    info!("Summary endpoint: http://{}/api/disaster_summary", addr);

    Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::storage::{InMemoryTableStore, Row, WriteMode};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    async fn seeded_router() -> Router {
        let store = Arc::new(InMemoryTableStore::new());
        store
            .write(
                "lakehouse_disasters",
                vec![row(json!({
                    "province": "AKLAN", "municipality": "IBAJAY", "year": 2023, "quarter": 1,
                    "farmers_affected": 50, "losses_php_grand_total": 0.0, "area_total_affected_ha": 0.0
                }))],
                WriteMode::Append,
                None,
            )
            .await
            .unwrap();
        store
            .write(
                "farmer_registry",
                vec![row(json!({
                    "province": "AKLAN", "municipality": "IBAJAY",
                    "registered_rice_farmers": 200, "total_declared_rice_area_ha": 150.0
                }))],
                WriteMode::DynamicOverwrite,
                Some("province"),
            )
            .await
            .unwrap();
        router_for(store)
    }

    fn router_for(store: Arc<InMemoryTableStore>) -> Router {
        create_router(
            AppState {
                engine: AnalysisEngine::new(store),
                metrics: None,
                request_timeout: Duration::from_secs(5),
            },
            &[],
        )
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(seeded_router().await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
    }

    #[tokio::test]
    async fn test_summary_returns_envelope() {
        let (status, body) =
            get_json(seeded_router().await, "/api/disaster_summary?province=aklan&year=2023").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("success"));
        assert_eq!(body["count"], json!(1));
        let group = &body["data"]["groups"][0];
        assert_eq!(group["municipality"], json!("IBAJAY"));
        assert_eq!(group["percentage_farmers_affected"], json!(0.25));
    }

    #[tokio::test]
    async fn test_invalid_quarter_is_bad_request() {
        let (status, body) =
            get_json(seeded_router().await, "/api/disaster_summary?quarter=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], json!("error"));
        assert_eq!(body["code"], json!("invalid_filter"));
    }

    #[tokio::test]
    async fn test_date_and_limit_params() {
        let (status, body) = get_json(
            seeded_router().await,
            "/api/disaster_summary?start_date=2023-13-01",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("invalid_filter"));

        let (status, _) = get_json(seeded_router().await, "/api/disaster_summary?limit=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let store = Arc::new(InMemoryTableStore::new());
        store
            .write(
                "lakehouse_disasters",
                vec![
                    row(json!({"province": "AKLAN", "municipality": "IBAJAY", "year": 2023, "quarter": 1,
                        "farmers_affected": 5, "event_date_start": "2023-02-01"})),
                    row(json!({"province": "AKLAN", "municipality": "KALIBO", "year": 2023, "quarter": 3,
                        "farmers_affected": 7, "event_date_start": "2023-08-20"})),
                ],
                WriteMode::Append,
                None,
            )
            .await
            .unwrap();
        let router = router_for(store);
        let (status, body) = get_json(router.clone(), "/api/disaster_summary?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], json!(1));
        let (_, body) = get_json(
            router,
            "/api/disaster_summary?start_date=2023-07-01&end_date=2023-12-31",
        )
        .await;
        assert_eq!(body["count"], json!(1));
        assert_eq!(body["data"]["groups"][0]["municipality"], json!("KALIBO"));
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let router = router_for(Arc::new(InMemoryTableStore::new()));
        let (status, body) = get_json(router, "/api/disaster_summary").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!("table_not_found"));
    }

    #[tokio::test]
    async fn test_join_key_mismatch_is_not_echoed() {
        let store = Arc::new(InMemoryTableStore::new());
        store
            .write(
                "lakehouse_disasters",
                vec![row(json!({"province": "aklan", "municipality": "IBAJAY", "year": 2023, "quarter": 1}))],
                WriteMode::Append,
                None,
            )
            .await
            .unwrap();
        let (status, body) = get_json(router_for(store), "/api/disaster_summary").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], json!("join_key_mismatch"));
        assert!(!body["message"].as_str().unwrap().contains("aklan"));
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let response = seeded_router()
            .await
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
