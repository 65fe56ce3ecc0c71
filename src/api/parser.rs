//! Classification service: accepts raw frames, forwards parsed records.

use super::{health_route, HttpError};
use crate::classifier::classify;
use crate::core::RawFrame;
use crate::forwarder::ForwardQueue;
use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};

/// One frame or a batch, as sent by the capture stage.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FrameBatch {
    Many(Vec<RawFrame>),
    One(Box<RawFrame>),
}

impl FrameBatch {
    pub fn into_frames(self) -> Vec<RawFrame> {
        match self {
            FrameBatch::Many(frames) => frames,
            FrameBatch::One(frame) => vec![*frame],
        }
    }
}

#[derive(Debug, Serialize)]
struct ParseResponse {
    status: &'static str,
    count: usize,
}

/// Router for `/parse`.
pub fn router(queue: ForwardQueue) -> Router {
    Router::new()
        .route("/parse", post(parse_handler))
        .merge(health_route("parser"))
        .with_state(queue)
}

/// POST /parse - Classify frames and queue each record for the persistor
///
/// The reply goes out once the frames are classified; delivery and its
/// retries continue on the queue's task. Under the `fail` exhaustion
/// action the reply waits for delivery instead, and a failure becomes a 502.
async fn parse_handler(
    State(queue): State<ForwardQueue>,
    payload: Result<Json<FrameBatch>, JsonRejection>,
) -> Result<Json<ParseResponse>, HttpError> {
    let Json(batch) = payload?;
    let frames = batch.into_frames();
    let wait = queue.waits_for_delivery();

    let mut pending = Vec::new();
    let mut count = 0;
    for frame in &frames {
        let record = classify(frame);
        tracing::debug!("{} {} -> {}", record.protocol, record.src_ip, record.dst_ip);
        if wait {
            pending.push(queue.submit(&record)?);
        } else {
            queue.enqueue(&record)?;
        }
        count += 1;
    }

    for delivery in pending {
        delivery.wait().await?;
    }

    Ok(Json(ParseResponse {
        status: "parsed",
        count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::call;
    use crate::classifier::test_frames;
    use crate::core::{OnExhausted, RetryPolicy};
    use crate::forwarder::mock::MockTransport;
    use crate::forwarder::RetryingForwarder;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn queue(transport: Arc<MockTransport>, on_exhausted: OnExhausted) -> ForwardQueue {
        let policy = RetryPolicy::new(2, Duration::from_millis(1)).on_exhausted(on_exhausted);
        ForwardQueue::spawn(RetryingForwarder::new(transport, policy))
    }

    #[tokio::test]
    async fn test_single_frame_from_bytes() {
        let transport = Arc::new(MockTransport::default());
        let frame = test_frames::tcp_v4([192, 168, 1, 10], 51000, [93, 184, 216, 34], 80, b"");
        let body = json!({"timestamp": "2024-03-01T12:00:00Z", "length": frame.len(), "frame_hex": hex::encode(&frame)});

        let queue = queue(transport.clone(), OnExhausted::Drop);
        let (status, response) = call(router(queue.clone()), "POST", "/parse", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response, json!({"status": "parsed", "count": 1}));
        queue.flushed().await.unwrap();

        let stored = transport.payloads.lock();
        assert_eq!(stored[0]["protocol"], "HTTP");
        assert_eq!(stored[0]["src_port"], 51000);
        assert_eq!(stored[0]["dst_port"], 80);
        assert_eq!(stored[0]["origin"], "LIVE");
    }

    #[tokio::test]
    async fn test_batch_of_producer_style_frames() {
        let transport = Arc::new(MockTransport::default());
        let body = json!([
            {"src_ip": "10.0.0.1", "dest_ip": "10.0.0.2", "protocol": "UDP", "src_port": 5353, "dest_port": 53, "source": "PCAP"},
            {"raw_proto": "ARP", "length": 42},
        ]);

        let queue = queue(transport.clone(), OnExhausted::Drop);
        let (status, response) = call(router(queue.clone()), "POST", "/parse", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["count"], 2);
        queue.flushed().await.unwrap();

        let stored = transport.payloads.lock();
        assert_eq!(stored[0]["protocol"], "DNS");
        assert_eq!(stored[0]["origin"], "PCAP");
        assert_eq!(stored[1]["protocol"], "ARP");
    }

    #[tokio::test]
    async fn test_unreachable_persistor_still_parses() {
        let transport = Arc::new(MockTransport::failing(usize::MAX));
        let queue = queue(transport.clone(), OnExhausted::Drop);

        let (status, response) = call(router(queue.clone()), "POST", "/parse", Some(json!({"raw_proto": "ARP"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["status"], "parsed");

        queue.flushed().await.unwrap();
        assert_eq!(transport.calls(), 2);
        assert_eq!(queue.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_reply_does_not_wait_for_retries() {
        let transport = Arc::new(MockTransport::failing(1));
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let queue = ForwardQueue::spawn(RetryingForwarder::new(transport.clone(), policy));

        let reply = call(router(queue.clone()), "POST", "/parse", Some(json!({"raw_proto": "ARP"})));
        let (status, _) = tokio::time::timeout(Duration::from_secs(5), reply).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        // the record is still waiting out its retry delay
        assert!(transport.calls() <= 1);
        assert_eq!(queue.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_fail_policy_maps_to_bad_gateway() {
        let transport = Arc::new(MockTransport::failing(usize::MAX));
        let (status, response) = call(
            router(queue(transport, OnExhausted::Fail)),
            "POST",
            "/parse",
            Some(json!({"raw_proto": "ARP"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(response["status"], 502);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let transport = Arc::new(MockTransport::default());
        let (status, _) = call(router(queue(transport, OnExhausted::Drop)), "POST", "/parse", Some(json!("nope"))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
