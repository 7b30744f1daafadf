mod config;
mod ebay;
mod http;
mod jobs;
mod llm;
mod metrics;
mod models;
mod notifications;
mod pacing;
mod pipeline;
mod scoring;
mod security;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::AppConfig;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, ScanOutcome, ScanRequest};
use notifications::{NotificationConfig, SIGNATURE_HEADER, Verification};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "watch_scout.api", "server crashed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env()?;
    info!(
        target = "watch_scout.api",
        ebay = ?config.ebay,
        llm = ?config.llm,
        notifications = ?config.notifications,
        dev_id_set = config.ebay.dev_id.is_some(),
        "configuration loaded"
    );

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let state = AppState::new(&config, prometheus_handle)?;
    let app = router(state, AuthState::new(&config.api_keys), config.body_limit);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "watch_scout.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    notifications: Arc<NotificationConfig>,
    openapi: Arc<Value>,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

impl AppState {
    fn new(config: &AppConfig, prometheus_handle: PrometheusHandle) -> eyre::Result<Self> {
        let pipeline = Pipeline::new(config)?;
        let (queue, _worker) = jobs::JobQueue::spawn(
            pipeline.clone(),
            config.queue_capacity,
            config.job_retention,
        );
        let openapi: Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or_else(|_| json!({"openapi": "3.0.3"}));
        Ok(Self {
            pipeline,
            queue,
            notifications: Arc::new(config.notifications.clone()),
            openapi: Arc::new(openapi),
            prometheus_handle,
            metrics_key: config.metrics_key.clone(),
        })
    }
}

fn router(state: AppState, auth_state: AuthState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/scans", post(run_scan))
        .route("/jobs/scans", post(enqueue_scan_job))
        .route("/jobs/{id}", get(get_job_status).delete(cancel_job))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route(
            "/marketplace/deletion-notification",
            get(deletion_challenge).post(deletion_notification),
        )
        .route(
            "/ebay/deletion-notification",
            get(deletion_challenge).post(deletion_notification),
        )
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Liveness check.
///
/// - Method: `GET`
/// - Path: `/` (also `/health`)
/// - Auth: none
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Scan a seller and return the top-scoring listings.
///
/// - Method: `POST`
/// - Path: `/scans`
/// - Auth: `Authorization: Bearer <key>` or `X-Scan-Key: <key>`
/// - Body: `ScanRequest`
/// - Response: `ScanOutcome`
async fn run_scan(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ScanRequest>,
) -> Result<Json<ScanOutcome>, AppError> {
    crate::metrics::inc_requests("/scans");
    info!(
        target = "watch_scout.api",
        caller = %context.caller,
        seller = %payload.seller_username,
        "scan invoked",
    );
    let outcome = state.pipeline.run(payload).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_scan_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<ScanRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/scans");
    if payload.seller_username.trim().is_empty() {
        return Err(PipelineError::invalid_input("fetch", "seller_username must not be empty").into());
    }
    let id = state
        .queue
        .enqueue_scan(payload, context)
        .await
        .map_err(AppError::Unavailable)?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

fn parse_job_id(id: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::parse_str(id)
        .map_err(|_| PipelineError::invalid_input("jobs", "invalid_job_id").into())
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let uuid = parse_job_id(&id)?;
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let uuid = parse_job_id(&id)?;
    state
        .queue
        .cancel(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound)
}

#[derive(Debug, Deserialize)]
struct ChallengeQuery {
    challenge_code: Option<String>,
}

/// Endpoint-validation challenge issued by the marketplace when the
/// webhook is registered.
async fn deletion_challenge(
    State(state): State<AppState>,
    Query(query): Query<ChallengeQuery>,
) -> Response {
    let Some(code) = query.challenge_code.filter(|c| !c.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                error: "missing_challenge_code".into(),
                detail: None,
            }),
        )
            .into_response();
    };
    match state.notifications.challenge_response(&code) {
        Some(hash) => Json(json!({ "challengeResponse": hash })).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError {
                error: "challenge_not_configured".into(),
                detail: Some(
                    "set EBAY_VERIFICATION_TOKEN and EBAY_NOTIFICATION_ENDPOINT".into(),
                ),
            }),
        )
            .into_response(),
    }
}

/// Account-deletion notification from the marketplace.
///
/// - Method: `POST`
/// - Path: `/marketplace/deletion-notification`
/// - Body: any JSON value
/// - Response: `{"received": true}`
async fn deletion_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    crate::metrics::inc_requests("/marketplace/deletion-notification");
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let verification = state.notifications.verify(&body, signature);
    if let Verification::Rejected(reason) = verification {
        notifications::record_rejection(reason);
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiError {
                error: "invalid_signature".into(),
                detail: Some(reason.into()),
            }),
        )
            .into_response();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: "invalid_json".into(),
                    detail: Some(err.to_string()),
                }),
            )
                .into_response();
        }
    };
    notifications::record_deletion(&payload, verification);
    Json(json!({ "received": true })).into_response()
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Unavailable(ApiError),
    NotFound,
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::Unavailable(payload) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response()
            }
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    error: "not_found".into(),
                    detail: None,
                }),
            )
                .into_response(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
