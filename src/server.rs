//! HTTP surface over the build pipeline.

use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::build::{BuildError, BuildPipeline, CacheStats, ParamKey, ParamValue, Part};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: BuildPipeline,
    pub expose_diagnostics: bool,
}

impl AppState {
    pub fn new(pipeline: BuildPipeline) -> Self {
        Self {
            pipeline,
            expose_diagnostics: false,
        }
    }

    pub fn with_diagnostics(mut self, expose: bool) -> Self {
        self.expose_diagnostics = expose;
        self
    }
}

/// Error body returned by every endpoint.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn from_build(err: BuildError, expose_diagnostics: bool) -> Self {
        let status = match &err {
            BuildError::InvalidInvocation(_) => StatusCode::BAD_REQUEST,
            BuildError::Generation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BuildError::Infrastructure(_) | BuildError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };
        let message = match (&err, expose_diagnostics) {
            (BuildError::Generation { diagnostics, .. }, true) => {
                format!("Model generation failed: {}", diagnostics.trim())
            }
            (BuildError::Generation { .. }, false) => "Model generation failed".to_string(),
            (BuildError::Infrastructure(_), _) => "Model generator unavailable".to_string(),
            (other, _) => other.to_string(),
        };
        Self::new(status, err.kind(), message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.message, "kind": self.kind })),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct PartInfo {
    slug: &'static str,
    tag: u8,
}

#[derive(Serialize)]
struct StatsResponse {
    cache: CacheStats,
    max_concurrent_builds: usize,
    running_builds: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/parts", get(list_parts))
        .route("/api/parts/{part}", post(build_part))
        .route("/api/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState, addr: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Model server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_parts() -> impl IntoResponse {
    let parts: Vec<PartInfo> = Part::ALL
        .iter()
        .map(|p| PartInfo { slug: p.slug(), tag: p.tag() })
        .collect();
    Json(parts)
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let limiter = state.pipeline.limiter();
    Json(StatsResponse {
        cache: state.pipeline.stats(),
        max_concurrent_builds: limiter.max(),
        running_builds: limiter.in_use(),
    })
}

async fn build_part(
    State(state): State<AppState>,
    Path(part): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Response, ApiError> {
    let part = part
        .parse::<Part>()
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, "unknown_part", e.to_string()))?;

    let params = json_params(body)?;
    let key = ParamKey::new(part, params)
        .map_err(|e| ApiError::from_build(e, state.expose_diagnostics))?;
    let etag = format!("\"{}\"", key.fingerprint());

    let artifact = state
        .pipeline
        .get_or_build(key)
        .await
        .map_err(|e| ApiError::from_build(e, state.expose_diagnostics))?;

    let mut response = artifact.to_bytes().into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(artifact.content_type()));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}

/// Flattens a JSON object into parameters. `null` means unset; nested values
/// are rejected.
fn json_params(body: Map<String, Value>) -> Result<Vec<(String, ParamValue)>, ApiError> {
    body.into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::Null => ParamValue::Absent,
                Value::Bool(b) => ParamValue::Bool(b),
                Value::Number(n) => n.as_f64().map(ParamValue::Number).ok_or_else(|| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "invalid_invocation",
                        format!("parameter '{}' is not representable as a number", name),
                    )
                })?,
                Value::String(s) => ParamValue::Text(s),
                Value::Array(_) | Value::Object(_) => {
                    return Err(ApiError::new(
                        StatusCode::BAD_REQUEST,
                        "invalid_invocation",
                        format!("parameter '{}' must be a number, boolean, string or null", name),
                    ))
                }
            };
            Ok((name, value))
        })
        .collect()
}
