//! HTTP surfaces of the pipeline stages.
//!
//! One router per service. Every router answers `GET /health`, gets CORS
//! when enabled, and traces requests. Errors leave as `{error, status}`.

pub mod analyzer;
pub mod capture;
pub mod parser;
pub mod persistor;

use crate::core::{PktwatchError, Result};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

/// Error leaving a handler.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Unprocessable(String),
    BadGateway(String),
    Internal(String),
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            HttpError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PktwatchError> for HttpError {
    fn from(err: PktwatchError) -> Self {
        let message = err.to_string();
        tracing::debug!(category = err.category(), "Handler failed: {}", message);
        match err {
            PktwatchError::CaptureAlreadyRunning
            | PktwatchError::NoInterface
            | PktwatchError::Capture(_)
            | PktwatchError::Recording(_)
            | PktwatchError::InvalidRequest(_) => HttpError::BadRequest(message),
            PktwatchError::Parse { .. } | PktwatchError::Serialization(_) => HttpError::Unprocessable(message),
            PktwatchError::Forward(_) | PktwatchError::Timeout { .. } => HttpError::BadGateway(message),
            _ => HttpError::Internal(message),
        }
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        HttpError::Unprocessable(rejection.body_text())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            HttpError::BadRequest(msg)
            | HttpError::Unprocessable(msg)
            | HttpError::BadGateway(msg)
            | HttpError::Internal(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!("{} {}", status, error);
        } else {
            tracing::debug!("{} {}", status, error);
        }

        (
            status,
            Json(ErrorResponse {
                error,
                status: status.as_u16(),
            }),
        )
            .into_response()
    }
}

/// Liveness answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// `GET /health` for the named service.
pub fn health_route<S: Clone + Send + Sync + 'static>(service: &'static str) -> Router<S> {
    Router::new().route(
        "/health",
        get(move || async move {
            Json(HealthResponse {
                status: "ok".to_string(),
                service: service.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }),
    )
}

/// Request tracing, plus permissive CORS when enabled.
pub fn with_layers(router: Router, enable_cors: bool) -> Router {
    let router = router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
    if enable_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve<F>(name: &str, router: Router, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        PktwatchError::Io(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("Failed to bind {} to {}: {}", name, addr, e),
        ))
    })?;

    tracing::info!("{} listening on http://{}", name, addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| PktwatchError::Io(std::io::Error::other(format!("{} server error: {}", name, e))))?;

    tracing::info!("{} stopped", name);
    Ok(())
}
