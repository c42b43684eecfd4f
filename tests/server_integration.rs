//! End-to-end tests against a real speed-test server on an ephemeral port

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use net_speed_tester::{
    executor::ProgressEvent,
    logging::MeasurementLogger,
    types::{ProbeStatus, ReportStatus, TestPhase},
    CancelHandle, Config, HttpTransport, PayloadPool, ProbeTransport, SpeedTestServer, TestOrchestrator,
    TestPlan,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const CHUNK: u64 = 16 * 1024;

struct TestServer {
    base_url: String,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<net_speed_tester::Result<()>>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = SpeedTestServer::from_listener(listener, config).unwrap();
        let base_url = format!("http://{}", server.local_addr().unwrap());

        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = signal.await;
        }));

        Self { base_url, shutdown, handle }
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
    }
}

fn server_config() -> Config {
    Config {
        chunk_bytes: CHUNK,
        download_bytes: 8 * CHUNK,
        upload_bytes: 8 * CHUNK,
        ping_count: 3,
        ping_interval_ms: 1,
        max_transfer_bytes: 1024 * 1024,
        enable_color: false,
        ..Default::default()
    }
}

/// A request body delivered in separate pieces so the server sees each
/// piece arrive at a distinct time
fn paced_body(data: Vec<u8>, piece: usize) -> reqwest::Body {
    let pieces: Vec<Bytes> = data.chunks(piece).map(Bytes::copy_from_slice).collect();
    let stream = stream::iter(pieces).then(|piece| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<Bytes, std::io::Error>(piece)
    });
    reqwest::Body::wrap_stream(stream)
}

async fn json_of(response: reqwest::Response) -> Value {
    response.json::<Value>().await.unwrap()
}

#[tokio::test]
async fn test_echo_and_health() {
    let server = TestServer::start(server_config()).await;
    let client = reqwest::Client::new();

    let echo = client.get(server.url("/echo")).send().await.unwrap();
    assert_eq!(echo.status().as_u16(), 204);
    assert!(echo.bytes().await.unwrap().is_empty());

    let health = json_of(client.get(server.url("/health")).send().await.unwrap()).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["version"], net_speed_tester::VERSION);
    assert_eq!(health["requestsServed"], 2);
    assert!(health["uptimeSeconds"].as_f64().unwrap() >= 0.0);

    server.stop().await;
}

#[tokio::test]
async fn test_download_streams_exact_payload_then_footer() {
    let server = TestServer::start(server_config()).await;

    let response = reqwest::get(server.url("/download?bytes=262144&chunk=16384")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["content-type"], "application/octet-stream");
    assert_eq!(response.headers()["x-payload-bytes"], "262144");

    let body = response.bytes().await.unwrap();
    assert!(body.len() > 262_144);
    assert_eq!(body[262_144], b'\n');

    let footer: Value = serde_json::from_str(std::str::from_utf8(&body[262_145..]).unwrap().trim()).unwrap();
    assert_eq!(footer["status"], "Complete");
    assert_eq!(footer["bytesTransferred"], 262_144);
    assert_eq!(footer["warmupBytes"], 16_384);
    assert!(footer["downloadSpeedBitsPerSec"].as_f64().unwrap() > 0.0);
    assert!(footer["elapsedSeconds"].as_f64().unwrap() > 0.0);
    assert!(footer["timestamp"].is_string());

    server.stop().await;
}

#[tokio::test]
async fn test_download_defaults_to_configured_size() {
    let server = TestServer::start(server_config()).await;

    let response = reqwest::get(server.url("/download")).await.unwrap();
    assert_eq!(response.headers()["x-payload-bytes"], (8 * CHUNK).to_string().as_str());
    let body = response.bytes().await.unwrap();
    assert_eq!(body[(8 * CHUNK) as usize], b'\n');

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_transfer_requests_are_rejected() {
    let server = TestServer::start(server_config()).await;
    let client = reqwest::Client::new();

    for query in ["/download?bytes=-5", "/download?bytes=lots", "/download?bytes=1024&chunk=0", "/download?bytes=2097152"] {
        let response = client.get(server.url(query)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 400, "{}", query);
        let body = json_of(response).await;
        assert!(body["error"].as_str().unwrap().contains("Protocol error"), "{}", query);
    }

    let response = client.post(server.url("/upload?bytes=-1")).body("x").send().await.unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body = json_of(response).await;
    assert!(body["error"].as_str().unwrap().contains("must not be negative"));

    server.stop().await;
}

#[tokio::test]
async fn test_upload_raw_body() {
    let server = TestServer::start(server_config()).await;
    let client = reqwest::Client::new();

    let response = client.post(server.url("/upload?bytes=65536&chunk=16384"))
        .header("content-type", "application/octet-stream")
        .body(paced_body(vec![7u8; 65_536], CHUNK as usize))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let report = json_of(response).await;
    assert_eq!(report["status"], "Complete");
    assert_eq!(report["bytesTransferred"], 65_536);
    assert_eq!(report["warmupBytes"], 16_384);
    assert_eq!(report["expectedBytes"], 65_536);
    assert!(report["uploadSpeedBitsPerSec"].as_f64().unwrap() > 0.0);
    assert!(report.get("error").is_none());

    server.stop().await;
}

#[tokio::test]
async fn test_short_upload_is_reported_failed() {
    let server = TestServer::start(server_config()).await;
    let client = reqwest::Client::new();

    let response = client.post(server.url("/upload?bytes=65536&chunk=16384"))
        .body(paced_body(vec![1u8; 32_768], CHUNK as usize))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let report = json_of(response).await;
    assert_eq!(report["status"], "Failed");
    assert_eq!(report["bytesTransferred"], 32_768);
    assert!(report["uploadSpeedBitsPerSec"].is_null());
    assert!(report["error"].as_str().unwrap().contains("32768 of 65536"));

    server.stop().await;
}

#[tokio::test]
async fn test_upload_json_directive() {
    let server = TestServer::start(server_config()).await;
    let client = reqwest::Client::new();

    let directive = |declared: usize| {
        serde_json::to_vec(&serde_json::json!({
            "payloadSizeBytes": declared,
            "testData": "x".repeat(3000),
        }))
        .unwrap()
    };

    let body = directive(3000);
    let sent = body.len() as u64;
    let response = client.post(server.url("/upload?chunk=1024"))
        .header("content-type", "application/json")
        .body(paced_body(body, 1024))
        .send()
        .await
        .unwrap();
    let report = json_of(response).await;
    assert_eq!(report["status"], "Complete");
    assert_eq!(report["expectedBytes"], 3000);
    assert_eq!(report["bytesTransferred"], sent);

    let response = client.post(server.url("/upload?chunk=1024"))
        .header("content-type", "application/json")
        .body(paced_body(directive(5000), 1024))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let report = json_of(response).await;
    assert_eq!(report["status"], "Failed");
    assert_eq!(report["expectedBytes"], 5000);
    assert!(report["error"].as_str().unwrap().contains("testData has 3000 bytes"));

    let response = client.post(server.url("/upload"))
        .header("content-type", "application/json")
        .body(r#"{"payloadSizeBytes": "lots"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    server.stop().await;
}

#[tokio::test]
async fn test_ping_measures_own_echo() {
    let server = TestServer::start(server_config()).await;

    let response = reqwest::get(server.url("/ping")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let ping = json_of(response).await;
    assert_eq!(ping["status"], "Complete");
    assert_eq!(ping["sampleCount"], 3);
    assert_eq!(ping["failedCount"], 0);
    assert_eq!(ping["packetLoss"], 0.0);
    assert_eq!(ping["samples"].as_array().unwrap().len(), 3);
    assert!(ping["mean"].as_f64().unwrap() > 0.0);
    assert!(ping["minPing"].as_f64().unwrap() <= ping["maxPing"].as_f64().unwrap());

    server.stop().await;
}

fn client_config(server_url: &str) -> Config {
    Config {
        server_url: server_url.to_string(),
        ping_count: 3,
        ping_interval_ms: 1,
        download_bytes: 16 * CHUNK,
        upload_bytes: 8 * CHUNK,
        chunk_bytes: CHUNK,
        phase_timeout_seconds: 10,
        enable_color: false,
        ..Default::default()
    }
}

fn orchestrator_for(config: &Config) -> TestOrchestrator {
    let transport: Arc<dyn ProbeTransport> =
        Arc::new(HttpTransport::new(&config.server_url, Duration::from_secs(2)).unwrap());
    let payload = PayloadPool::init(1024 * 1024).unwrap();
    TestOrchestrator::new(transport, payload, TestPlan::from(config), Arc::new(MeasurementLogger::new(config)))
}

#[tokio::test]
async fn test_full_run_against_real_server() {
    let server = TestServer::start(server_config()).await;
    let config = client_config(&server.base_url);
    let orchestrator = orchestrator_for(&config);

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let report = orchestrator.run(Some(tx), CancelHandle::new()).await;

    let mut phases = Vec::new();
    while let Some(event) = rx.recv().await {
        phases.push((event.phase, event.progress_percent));
    }
    assert_eq!(phases, vec![
        (TestPhase::Ping, 20),
        (TestPhase::Download, 50),
        (TestPhase::Upload, 80),
        (TestPhase::Complete, 100),
    ]);

    assert_eq!(report.status, ReportStatus::Complete, "{:?}", report.error);

    let ping = report.ping.as_ref().unwrap();
    assert_eq!(ping.sample_count, 3);
    assert_eq!(ping.packet_loss, Some(0.0));

    let download = report.download.as_ref().unwrap();
    assert_eq!(download.status, ProbeStatus::Complete);
    let transfer = download.transfer.as_ref().unwrap();
    assert_eq!(transfer.bytes_transferred, 16 * CHUNK);
    assert_eq!(transfer.warmup_bytes, CHUNK);
    assert!(download.mean.unwrap() > 0.0);
    let footer = download.server_measurement.as_ref().unwrap();
    assert_eq!(footer.bytes_transferred, 16 * CHUNK);

    let upload = report.upload.as_ref().unwrap();
    assert_eq!(upload.status, ProbeStatus::Complete);
    assert_eq!(upload.transfer.as_ref().unwrap().bytes_transferred, 8 * CHUNK);
    assert_eq!(upload.server_measurement.as_ref().unwrap().bytes_transferred, 8 * CHUNK);

    server.stop().await;
}

#[tokio::test]
async fn test_unreachable_server_fails_the_run() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = client_config(&format!("http://{}", addr));
    let report = orchestrator_for(&config).run(None, CancelHandle::new()).await;

    assert_eq!(report.status, ReportStatus::Failed);
    assert!(report.download.is_none());
    assert!(report.upload.is_none());
    assert!(report.error.as_deref().unwrap().contains("Run aborted during"));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let server = TestServer::start(server_config()).await;
    let config = client_config(&server.base_url);

    let cancel = CancelHandle::new();
    cancel.cancel();
    let report = orchestrator_for(&config).run(None, cancel).await;

    assert_eq!(report.status, ReportStatus::Cancelled);
    assert!(report.ping.is_none());

    server.stop().await;
}
