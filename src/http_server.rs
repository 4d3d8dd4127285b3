use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use anyhow::{anyhow, Result};
use log::{info, error, warn, debug};

use crate::access::AccessGate;
use crate::config::Config;
use crate::database::Database;
use crate::error::ReelError;
use crate::features;
use crate::image_gen::ImageSize;
use crate::jobs::JobOptions;
use crate::rate_limiter::RateLimiter;
use crate::upload::ProductImage;
use crate::video_gen::VideoProviderKind;
use crate::workflow::Pipeline;

const USER_HEADER: &str = "x-user-id";
const ANONYMOUS_USER: &str = "anonymous";
const JOB_LIST_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Pipeline,
    pub access: AccessGate,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, pipeline: Pipeline) -> Self {
        let access = AccessGate::new(pipeline.database().clone(), config.require_access);
        let limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
        AppState {
            config: Arc::new(config),
            pipeline,
            access,
            limiter,
        }
    }

    /// Background upkeep for the shared state; runs until aborted.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        self.limiter.spawn_pruner()
    }
}

/// Error response carrying the status derived from a `ReelError`, if any.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retry_after: None,
        }
    }

    fn rate_limited(retry_after: Duration) -> Self {
        ApiError {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "too many requests".to_string(),
            retry_after: Some(retry_after),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<ReelError>() {
            Some(ReelError::InvalidInput(_)) | Some(ReelError::NotConfigured(_)) => StatusCode::BAD_REQUEST,
            Some(ReelError::AccessRequired(_)) => StatusCode::PAYMENT_REQUIRED,
            Some(ReelError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(ReelError::Provider { .. }) | Some(ReelError::TaskFailed { .. }) => StatusCode::BAD_GATEWAY,
            Some(ReelError::TimedOut { .. }) => StatusCode::GATEWAY_TIMEOUT,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {:#}", err);
        }
        ApiError {
            status,
            message: format!("{:#}", err),
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(json!({ "error": self.message }))).into_response();
        if let Some(retry_after) = self.retry_after {
            // Round up so clients never retry early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub async fn create_server(config: Config, database: Database) -> Result<Router> {
    info!("🔧 Wiring pipeline clients");
    let pipeline = Pipeline::from_config(&config, database)?;
    let state = AppState::new(config, pipeline);
    state.spawn_maintenance();
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    // Multipart framing needs headroom over the image itself
    let body_limit = state.config.max_upload_bytes.saturating_add(64 * 1024);

    Router::new()
        .route("/", get(health_check))
        .route("/features", get(list_features))
        .route("/styles", get(list_styles))
        .route("/styles/:category", get(list_category_styles))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/events", get(get_job_events))
        .route("/jobs/:id/image", get(get_job_image))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Product reel server is running",
        "version": features::get_version(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn list_features(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "version": features::get_version(),
        "features": features::feature_status(&state.config),
    }))
}

async fn list_styles(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let catalog = state.pipeline.catalog().await?;
    Ok(Json(json!({
        "categories": catalog.categories(),
        "styles": catalog.styles(),
    })))
}

async fn list_category_styles(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let catalog = state.pipeline.catalog().await?;
    let found = catalog
        .categories()
        .iter()
        .find(|c| c.id.eq_ignore_ascii_case(&category))
        .ok_or_else(|| anyhow::Error::from(ReelError::NotFound(format!("category {}", category))))?;
    Ok(Json(json!({
        "category": found.id,
        "styles": catalog.styles_for(&found.id),
    })))
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

async fn list_jobs(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let user = user_id(&headers);
    let jobs = state.pipeline.database().list_jobs(&user, JOB_LIST_LIMIT).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = user_id(&headers);
    debug!("📥 Job request from {}", user);

    state.access.require(&user).await?;
    if let Err(retry_after) = state.limiter.check(&user) {
        warn!("Rate limit hit for {}", user);
        return Err(ApiError::rate_limited(retry_after));
    }

    let mut image = None;
    let mut product_name = None;
    let mut options = JobOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("failed to read image: {}", e)))?;
            image = Some(ProductImage::from_bytes(&filename, bytes.to_vec(), state.config.max_upload_bytes)?);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read field {}: {}", name, e)))?;
        let value = value.trim().to_string();

        match name.as_str() {
            "product_name" => product_name = Some(value),
            "style" if !value.is_empty() => options.style = Some(value),
            "video_count" => {
                options.video_count = value
                    .parse()
                    .map_err(|_| ApiError::bad_request(format!("video_count must be a number, got '{}'", value)))?;
            }
            "provider" => {
                options.provider = VideoProviderKind::from_str(&value)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown provider '{}'", value)))?;
            }
            "size" => {
                options.size = ImageSize::from_str(&value)
                    .ok_or_else(|| ApiError::bad_request(format!("unknown size '{}'", value)))?;
            }
            _ => debug!("Ignoring multipart field {}", name),
        }
    }

    let image = image.ok_or_else(|| ApiError::bad_request("an image file is required"))?;
    let product_name = product_name.unwrap_or_default();

    let job = state.pipeline.create_job(&user, &product_name, options).await?;
    let job_id = job.id.clone();

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        pipeline.run(job, image).await;
    });

    info!("🎬 Accepted job {} from {}", job_id, user);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": job_id,
            "status_url": format!("/jobs/{}", job_id),
        })),
    ))
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let job = state
        .pipeline
        .database()
        .get_job(&job_id)
        .await?
        .ok_or_else(|| anyhow::Error::from(ReelError::NotFound(format!("job {}", job_id))))?;
    let mut body = serde_json::to_value(&job).map_err(anyhow::Error::from)?;
    body["terminal"] = json!(job.stage.is_terminal());
    Ok(Json(body))
}

async fn get_job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let database = state.pipeline.database();
    if database.get_job(&job_id).await?.is_none() {
        return Err(anyhow::Error::from(ReelError::NotFound(format!("job {}", job_id))).into());
    }
    let events = database.get_events(&job_id).await?;
    Ok(Json(json!({ "id": job_id, "events": events })))
}

async fn get_job_image(State(state): State<AppState>, Path(job_id): Path<String>) -> Result<Response, ApiError> {
    let (bytes, mime) = state.pipeline.load_still(&job_id).await?;
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

pub async fn start_http_server(config: Config, database: Database) -> Result<()> {
    let port = config.http_port;
    let app = create_server(config, database).await?;

    let listener = tokio::net::TcpListener::bind(&format!("0.0.0.0:{}", port))
        .await
        .map_err(|e| anyhow!("Failed to bind to port {}: {}", port, e))?;

    info!("HTTP server starting on port {}", port);
    info!("Jobs endpoint: http://0.0.0.0:{}/jobs", port);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
