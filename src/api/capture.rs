//! Capture control service.

use super::{health_route, HttpError};
use crate::capture::{CaptureController, CaptureRequest, CaptureStatus};
use crate::core::PktwatchError;
use axum::{
    body::Bytes,
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct StartResponse {
    status: &'static str,
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pcap: Option<String>,
}

#[derive(Debug, Serialize)]
struct StopResponse {
    status: &'static str,
}

/// Router for `/start_sniffing`, `/stop_sniffing` and `/status`.
pub fn router(controller: CaptureController) -> Router {
    Router::new()
        .route("/start_sniffing", post(start_handler))
        .route("/stop_sniffing", post(stop_handler))
        .route("/status", get(status_handler))
        .merge(health_route("capture"))
        .with_state(controller)
}

/// Fields set in a JSON body win over the query string.
fn merge(query: CaptureRequest, body: &Bytes) -> Result<CaptureRequest, HttpError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(query);
    }
    let body: CaptureRequest = serde_json::from_slice(body)
        .map_err(|e| HttpError::BadRequest(format!("invalid start request: {e}")))?;
    Ok(CaptureRequest {
        mode: body.mode.or(query.mode),
        file: body.file.or(query.file),
        filter: body.filter.or(query.filter),
        interface: body.interface.or(query.interface),
    })
}

/// POST /start_sniffing - Begin a live or replay session
async fn start_handler(
    State(controller): State<CaptureController>,
    Query(query): Query<CaptureRequest>,
    body: Bytes,
) -> Result<Json<StartResponse>, HttpError> {
    let request = merge(query, &body)?;
    let started = controller.start(&request).map_err(|e| {
        if !matches!(e, PktwatchError::CaptureAlreadyRunning) {
            tracing::warn!("Capture start rejected: {}", e);
        }
        HttpError::from(e)
    })?;

    Ok(Json(StartResponse {
        status: "started",
        mode: started.mode.to_string(),
        pcap: started.pcap,
    }))
}

/// POST /stop_sniffing - Ask the running session to stop
async fn stop_handler(State(controller): State<CaptureController>) -> Json<StopResponse> {
    Json(StopResponse {
        status: controller.stop().as_str(),
    })
}

/// GET /status - Session state and frame count
async fn status_handler(State(controller): State<CaptureController>) -> Json<CaptureStatus> {
    Json(controller.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::call;
    use crate::capture::replay::write_pcap;
    use crate::classifier::test_frames;
    use crate::core::config::CaptureConfig;
    use crate::core::types::link_type;
    use crate::forwarder::mock::MockTransport;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn controller(dir: &TempDir) -> CaptureController {
        let config = CaptureConfig {
            pcap_dir: dir.path().to_path_buf(),
            ..CaptureConfig::default()
        };
        CaptureController::new(config, Arc::new(MockTransport::default()))
    }

    #[tokio::test]
    async fn test_start_replay_from_query() {
        let dir = TempDir::new().unwrap();
        let frame = test_frames::arp_request([10, 0, 0, 5], [10, 0, 0, 1]);
        write_pcap(&dir.path().join("arp.pcap"), link_type::ETHERNET, &[(1, frame)]);
        let capture = controller(&dir);

        let (status, body) = call(router(capture.clone()), "POST", "/start_sniffing?mode=PCAP&file=arp.pcap", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "started", "mode": "PCAP", "pcap": "arp.pcap"}));

        tokio::time::timeout(Duration::from_secs(5), capture.wait_idle()).await.unwrap();
        let (_, body) = call(router(capture), "GET", "/status", None).await;
        assert_eq!(body["state"], "idle");
        assert_eq!(body["frames_emitted"], 1);
    }

    #[tokio::test]
    async fn test_start_from_json_body() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(
            router(controller(&dir)),
            "POST",
            "/start_sniffing",
            Some(json!({"mode": "PCAP", "file": "missing.pcap"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let dir = TempDir::new().unwrap();
        let (status, body) = call(router(controller(&dir)), "POST", "/stop_sniffing", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "not running"}));
    }

    #[test]
    fn test_body_overrides_query() {
        let query = CaptureRequest {
            mode: Some("LIVE".into()),
            filter: Some("tcp".into()),
            ..CaptureRequest::default()
        };
        let merged = merge(query, &Bytes::from_static(br#"{"mode": "PCAP", "file": "a.pcap"}"#)).unwrap();
        assert_eq!(merged.mode.as_deref(), Some("PCAP"));
        assert_eq!(merged.file.as_deref(), Some("a.pcap"));
        assert_eq!(merged.filter.as_deref(), Some("tcp"));
    }
}
