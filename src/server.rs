//! HTTP front end
//!
//! Two POST endpoints run the flood pipeline on a blocking worker and
//! return either the path of an exported GeoPackage or tile URLs. Errors
//! are reported as `{"error": "<message>"}` with a status derived from the
//! [`FloodError`] variant.

use crate::compute::GeoCompute;
use crate::config::ServerConfig;
use crate::core::display::DisplayLayers;
use crate::core::pipeline::FloodPipeline;
use crate::core::selector::{FloodParams, FloodRequest};
use crate::types::{Deadline, FloodError, FloodResult};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, get_service, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

const MAP_PAGE: &str = include_str!("../static/map.html");

/// Shared state of all handlers
pub struct AppState<C: GeoCompute> {
    pub pipeline: FloodPipeline<C>,
    pub config: ServerConfig,
}

impl<C: GeoCompute> AppState<C> {
    pub fn new(pipeline: FloodPipeline<C>, config: ServerConfig) -> Self {
        Self { pipeline, config }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

/// Error response with the `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

/// HTTP status for a pipeline error
pub fn status_for(err: &FloodError) -> StatusCode {
    match err {
        FloodError::InvalidRegion(_)
        | FloodError::InvalidPeriod(_)
        | FloodError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
        FloodError::EmptyCollection(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FloodError::RemoteCompute { .. } => StatusCode::BAD_GATEWAY,
        FloodError::RemoteComputeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<FloodError> for ApiError {
    fn from(err: FloodError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            log::error!("Request failed: {}", err);
        } else {
            log::warn!("Request rejected: {}", err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        log::warn!("Unreadable request body: {}", rejection.body_text());
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Run a pipeline call on the blocking pool, bounded by the request timeout
///
/// The task receives the request deadline and must stop producing side
/// effects once it has passed, since the worker itself cannot be cancelled.
async fn run_blocking<C, T, F>(state: &Arc<AppState<C>>, task: F) -> Result<T, ApiError>
where
    C: GeoCompute + 'static,
    T: Send + 'static,
    F: FnOnce(&AppState<C>, &Deadline) -> FloodResult<T> + Send + 'static,
{
    let worker_state = Arc::clone(state);
    let limit = state.request_timeout();
    let deadline = Deadline::after(limit);
    let handle = tokio::task::spawn_blocking(move || task(&worker_state, &deadline));

    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => result.map_err(ApiError::from),
        Ok(Err(join_error)) => Err(ApiError::internal(format!(
            "Pipeline worker failed: {}",
            join_error
        ))),
        Err(_) => {
            log::warn!("Pipeline exceeded {:?}, abandoning the request", limit);
            Err(FloodError::RemoteComputeTimeout(limit).into())
        }
    }
}

/// Decode a JSON request body whatever its `Content-Type`
fn parse_request(payload: Result<Bytes, BytesRejection>) -> Result<FloodRequest, ApiError> {
    let body = payload?;
    let params: FloodParams = serde_json::from_slice(&body).map_err(|e| {
        FloodError::InvalidParameter(format!("Malformed request body: {}", e))
    })?;
    Ok(FloodRequest::from_params(&params)?)
}

async fn map_page() -> Html<&'static str> {
    Html(MAP_PAGE)
}

/// Estimate the flood extent and export the flooded polygons
async fn flood_download<C: GeoCompute + 'static>(
    State(state): State<Arc<AppState<C>>>,
    payload: Result<Bytes, BytesRejection>,
) -> Result<Json<String>, ApiError> {
    let request = parse_request(payload)?;
    let path = run_blocking(&state, move |state, deadline| {
        state
            .pipeline
            .download(&request, &state.config.output_dir, deadline)
    })
    .await?;
    Ok(Json(path.to_string_lossy().into_owned()))
}

/// Estimate the flood extent and register display tiles
async fn flood_display<C: GeoCompute + 'static>(
    State(state): State<Arc<AppState<C>>>,
    payload: Result<Bytes, BytesRejection>,
) -> Result<Json<DisplayLayers>, ApiError> {
    let request = parse_request(payload)?;
    let layers = run_blocking(&state, move |state, deadline| {
        state.pipeline.display_request(&request, deadline)
    })
    .await?;
    Ok(Json(layers))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn create_router<C: GeoCompute + 'static>(state: Arc<AppState<C>>) -> Router {
    let static_dir = state.config.static_dir.clone();
    let output_dir = state.config.output_dir.clone();
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/", get(map_page))
        .route("/flood_download", post(flood_download::<C>))
        .route("/flood_download/", post(flood_download::<C>))
        .route("/flood_display", post(flood_display::<C>))
        .route("/flood_display/", post(flood_display::<C>))
        .nest_service("/static", get_service(ServeDir::new(static_dir)))
        .nest_service("/output", get_service(ServeDir::new(output_dir)))
        .with_state(state)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_body() {
        let body = Bytes::from_static(
            br#"{"bbox": "10.0,45.0,10.5,45.5", "init_start": "2020-01-01",
                 "init_last": "2020-01-31", "flood_start": "2020-02-01",
                 "flood_last": "2020-02-15", "flood_threshold": ""}"#,
        );
        let request = parse_request(Ok(body)).unwrap();
        assert_eq!(request.threshold, 1.25);

        let err = parse_request(Ok(Bytes::from_static(b"{ not json"))).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("Malformed request body"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&FloodError::InvalidRegion("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&FloodError::InvalidParameter("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&FloodError::EmptyCollection("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&FloodError::remote("x")), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&FloodError::RemoteComputeTimeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&FloodError::Config("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
