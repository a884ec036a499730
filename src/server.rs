use crate::clock::TimeKey;
use crate::config::AppConfig;
use crate::facade::AcquisitionFacade;
use crate::monitor::MonitorSnapshot;
use crate::region::BoundaryResource;
use crate::sampler;
use crate::types::{IntensityType, StationCatalogs, StationSource};
use crate::upstream::{KmoniClient, Upstream, UpstreamError};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use geojson::{Feature, FeatureCollection};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info, warn};

const PROXY_CACHE_CONTROL: &str = "public, s-maxage=60, maxage=60";

pub type LiveFacade = AcquisitionFacade<KmoniClient, BoundaryResource>;

pub struct AppState {
    pub facade: LiveFacade,
    pub upstream: Arc<KmoniClient>,
    pub catalogs: Arc<StationCatalogs>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Upstream { status: StatusCode, message: &'static str },
    #[error("{0}")]
    Internal(&'static str),
}

impl ApiError {
    /// Keep the provider's status code when it answered, otherwise 500.
    fn upstream(err: UpstreamError, message: &'static str) -> Self {
        warn!("{}: {}", message, err);
        let status = err
            .status()
            .and_then(|s| StatusCode::from_u16(s.as_u16()).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::Upstream { status, message }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream { status, .. } => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({ "statusCode": status.as_u16(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeParams {
    time: Option<String>,
}

impl TimeParams {
    fn key(&self) -> Result<TimeKey, ApiError> {
        let time = self.time.as_deref().ok_or_else(|| {
            ApiError::BadRequest("Time parameter is required (format: YYYYMMDDHHmmss)".to_string())
        })?;
        TimeKey::parse(time).map_err(|e| ApiError::BadRequest(e.to_string()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PointsParams {
    time: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    source: Option<String>,
}

impl PointsParams {
    fn validate(&self) -> Result<(TimeKey, IntensityType, StationSource), ApiError> {
        let key = self
            .time
            .as_deref()
            .and_then(|t| TimeKey::parse(t).ok())
            .ok_or_else(|| ApiError::BadRequest("Invalid time format (YYYYMMDDHHmmss)".to_string()))?;

        let kind = self.kind.as_deref().and_then(|k| k.parse().ok());
        let source = self.source.as_deref().and_then(|s| s.parse().ok());
        match (kind, source) {
            (Some(kind), Some(source)) => Ok((key, kind, source)),
            _ => Err(ApiError::BadRequest(format!(
                "Invalid type or source. type: {}, source: {}",
                self.kind.as_deref().unwrap_or(""),
                self.source.as_deref().unwrap_or("")
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LocationParams {
    lng: f64,
    lat: f64,
}

pub fn create_router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let proxied = Router::new()
        .route("/api/eew", get(eew_handler))
        .route("/api/realtime_points", get(realtime_points_handler))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static(PROXY_CACHE_CONTROL),
        ));

    let mut app = Router::new()
        .route("/api/latest", get(latest_handler))
        .route("/api/monitor", get(snapshot_handler))
        .route("/api/monitor/init", post(init_handler))
        .route("/api/monitor/resync", post(resync_handler))
        .route("/api/monitor/stop", post(stop_handler))
        .route("/api/region", get(region_handler))
        .route("/api/region/selected", get(selected_region_handler))
        .merge(proxied);

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

pub async fn start_server(config: &AppConfig, state: Arc<AppState>) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    let app = create_router(state, config.server.static_dir.as_deref());

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn latest_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let latest = state
        .upstream
        .latest_time()
        .await
        .map_err(|e| ApiError::upstream(e, "Failed to fetch data from K-moni"))?;
    Ok(Json(json!({ "latest_time": latest.raw })))
}

async fn eew_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TimeParams>,
) -> Result<Json<Value>, ApiError> {
    let key = params.key()?;
    let payload = state
        .upstream
        .eew(&key)
        .await
        .map_err(|e| ApiError::upstream(e, "Failed to fetch EEW data"))?;
    Ok(Json(payload))
}

async fn realtime_points_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointsParams>,
) -> Result<Json<FeatureCollection>, ApiError> {
    const FAILED: &str = "Failed to process realtime image";
    let (key, kind, source) = params.validate()?;

    let bytes = match state.upstream.raster(&key, kind, source).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Ok(Json(sampler::empty_collection())),
        Err(e) => {
            warn!("Realtime image fetch for {} failed: {}", key, e);
            return Err(ApiError::Internal(FAILED));
        }
    };

    let catalogs = Arc::clone(&state.catalogs);
    let collection = tokio::task::spawn_blocking(move || {
        sampler::sample(&bytes, catalogs.for_source(source))
    })
    .await
    .map_err(|_| ApiError::Internal(FAILED))?
    .map_err(|e| {
        warn!("Realtime image for {} could not be decoded: {}", key, e);
        ApiError::Internal(FAILED)
    })?;

    Ok(Json(collection))
}

async fn snapshot_handler(State(state): State<Arc<AppState>>) -> Json<MonitorSnapshot> {
    Json(state.facade.snapshot())
}

async fn init_handler(State(state): State<Arc<AppState>>) -> Json<MonitorSnapshot> {
    if let Err(e) = state.facade.init().await {
        warn!("Monitor init failed: {}", e);
    }
    Json(state.facade.snapshot())
}

async fn resync_handler(State(state): State<Arc<AppState>>) -> Json<MonitorSnapshot> {
    if let Err(e) = state.facade.manual_resync().await {
        warn!("Manual resync failed: {}", e);
    }
    Json(state.facade.snapshot())
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<MonitorSnapshot> {
    state.facade.stop();
    Json(state.facade.snapshot())
}

async fn region_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LocationParams>,
) -> Result<Json<Option<Feature>>, ApiError> {
    let feature = state.facade.highlight(params.lng, params.lat).await.map_err(|e| {
        error!("Region lookup failed: {:#}", anyhow::Error::from(e));
        ApiError::Internal("Failed to load region boundaries")
    })?;
    Ok(Json(feature))
}

async fn selected_region_handler(State(state): State<Arc<AppState>>) -> Json<Option<Feature>> {
    Json(state.facade.selected_region())
}
