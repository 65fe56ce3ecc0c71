//! End-to-end: replay capture -> parser -> persistor -> analyzer over loopback.

mod common;

use common::{arp_request, dns_query, temp_store, write_pcap, FrameBuilder};
use pktwatch::api;
use pktwatch::capture::{CaptureController, CaptureRequest, CaptureState};
use pktwatch::core::config::{AnalyzerConfig, CaptureConfig};
use pktwatch::core::{Origin, Protocol, RetryPolicy};
use pktwatch::forwarder::{ForwardQueue, HttpTransport, RetryingForwarder, Transport};
use pktwatch::storage::{QueryService, StoreWriter};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn(router: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replay_lands_in_store() {
    let dir = TempDir::new().unwrap();
    let pool = temp_store(&dir).await;

    let persistor = spawn(api::persistor::router(StoreWriter::new(pool.clone()))).await;
    let store_transport = HttpTransport::new(format!("http://{persistor}/store"), Duration::from_secs(2)).unwrap();
    let forwarder = RetryingForwarder::new(
        Arc::new(store_transport),
        RetryPolicy::new(3, Duration::from_millis(10)),
    );
    let queue = ForwardQueue::spawn(forwarder);
    let parser = spawn(api::parser::router(queue.clone())).await;

    write_pcap(
        &dir.path().join("mixed.pcap"),
        &[
            arp_request([10, 0, 0, 5], [10, 0, 0, 1]),
            FrameBuilder::new().tcp(),
            FrameBuilder::new()
                .between([10, 0, 0, 2], [1, 1, 1, 1])
                .ports(41000, 53)
                .payload(&dns_query("rust-lang.org"))
                .udp(),
        ],
    );

    let config = CaptureConfig {
        pcap_dir: dir.path().to_path_buf(),
        parser_url: format!("http://{parser}/parse"),
        batch_size: 2,
        flush_interval: Duration::from_millis(50),
        ..CaptureConfig::default()
    };
    let parse_transport = HttpTransport::new(config.parser_url.clone(), Duration::from_secs(2)).unwrap();
    let capture = CaptureController::new(config, Arc::new(parse_transport));

    let started = capture.start(&CaptureRequest::replay("mixed.pcap")).unwrap();
    assert_eq!(started.mode, Origin::Pcap);
    tokio::time::timeout(Duration::from_secs(10), capture.wait_idle())
        .await
        .expect("replay did not finish");

    let status = capture.status();
    assert_eq!(status.state, CaptureState::Idle);
    assert_eq!(status.frames_emitted, 3);
    queue.flushed().await.unwrap();

    let queries = QueryService::new(pool.clone(), 50);
    assert_eq!(queries.count().await.unwrap(), 3);

    let stored = queries.recent(10, Some(Origin::Pcap)).await.unwrap();
    let labels: Vec<Protocol> = stored.iter().rev().map(|r| r.record.protocol).collect();
    assert_eq!(labels, vec![Protocol::Arp, Protocol::Http, Protocol::Dns]);
    assert_eq!(stored[0].record.dns_query.as_deref(), Some("rust-lang.org"));

    // read path over HTTP
    let analyzer = spawn(api::analyzer::router(queries, AnalyzerConfig::default())).await;
    let chart: serde_json::Value = reqwest::get(format!("http://{analyzer}/protocol_summary_chart"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chart["labels"], serde_json::json!(["ARP", "DNS", "HTTP"]));
    assert_eq!(chart["counts"], serde_json::json!([1, 1, 1]));
}

#[tokio::test]
async fn test_unreachable_parser_does_not_stall_replay() {
    let dir = TempDir::new().unwrap();
    write_pcap(&dir.path().join("lonely.pcap"), &[FrameBuilder::new().tcp()]);

    // nothing listens on the discard port
    let config = CaptureConfig {
        pcap_dir: dir.path().to_path_buf(),
        parser_url: "http://127.0.0.1:9/parse".to_string(),
        flush_interval: Duration::from_millis(50),
        ..CaptureConfig::default()
    };
    let transport = HttpTransport::new(config.parser_url.clone(), Duration::from_millis(200)).unwrap();
    let capture = CaptureController::new(config, Arc::new(transport));

    capture.start(&CaptureRequest::replay("lonely.pcap")).unwrap();
    tokio::time::timeout(Duration::from_secs(5), capture.wait_idle())
        .await
        .expect("replay did not finish");
    assert_eq!(capture.status().frames_emitted, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parser_replies_before_persistor_retries() {
    let persistor = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/store"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&persistor)
        .await;
    Mock::given(method("POST"))
        .and(path("/store"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&persistor)
        .await;

    // default policy: the first retry waits longer than the caller below
    let store_transport = HttpTransport::new(format!("{}/store", persistor.uri()), Duration::from_secs(2)).unwrap();
    let forwarder = RetryingForwarder::new(Arc::new(store_transport), RetryPolicy::default());
    let parser = spawn(api::parser::router(ForwardQueue::spawn(forwarder))).await;

    let caller = HttpTransport::new(format!("http://{parser}/parse"), Duration::from_secs(1)).unwrap();
    caller
        .post(&serde_json::json!([{"raw_proto": "ARP", "source": "PCAP"}]))
        .await
        .expect("parser held the reply past the caller's timeout");

    let delivered = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let seen = persistor.received_requests().await.unwrap_or_default();
            if seen.len() >= 2 {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("record never reached the persistor");

    assert_eq!(delivered.len(), 2);
    let body: serde_json::Value = serde_json::from_slice(&delivered[1].body).unwrap();
    assert_eq!(body["protocol"], "ARP");
    assert_eq!(body["origin"], "PCAP");
}
