//! Request handlers

use super::{ServerError, SharedResources};
use crate::{
    client::PAYLOAD_BYTES_HEADER,
    error::{AppError, Result},
    executor::CancelHandle,
    models::{Config, DownloadReport, HealthResponse, PingResponse, ProbeResult, UploadDirective, UploadReport},
    payload::{PayloadChunks, UploadConsumer},
    probe::{LatencyProber, TransferOutcome, TransferTally},
    types::{ProbeKind, ProbeStatus},
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::time::Instant;
use uuid::Uuid;

/// `bytes` and `chunk` query parameters, kept raw so bad values get a JSON 400
#[derive(Debug, Default, Deserialize)]
pub struct TransferQuery {
    pub bytes: Option<String>,
    pub chunk: Option<String>,
}

impl TransferQuery {
    /// Validated byte count (if given) and chunk size
    pub fn resolve(&self, config: &Config) -> Result<(Option<u64>, u64)> {
        let bytes = parse_byte_count("bytes", self.bytes.as_deref())?;
        if let Some(bytes) = bytes {
            if bytes > config.max_transfer_bytes {
                return Err(AppError::protocol(format!(
                    "bytes ({}) exceeds the server limit of {}", bytes, config.max_transfer_bytes
                )));
            }
        }

        let chunk = parse_byte_count("chunk", self.chunk.as_deref())?.unwrap_or(config.chunk_bytes);
        if chunk == 0 {
            return Err(AppError::protocol("chunk must be greater than 0"));
        }

        Ok((bytes, chunk))
    }
}

fn parse_byte_count(name: &str, raw: Option<&str>) -> Result<Option<u64>> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };

    if raw.starts_with('-') {
        return Err(AppError::protocol(format!("{} must not be negative: {}", name, raw)));
    }

    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| AppError::protocol(format!("{} must be a non-negative integer: {}", name, raw)))
}

/// Throughput is only reported for transfers that completed
fn completed_speed(result: &ProbeResult) -> Option<f64> {
    if result.is_complete() {
        result.mean
    } else {
        None
    }
}

fn transfer_totals(result: &ProbeResult) -> (u64, u64, f64) {
    result.transfer
        .as_ref()
        .map_or((0, 0, 0.0), |t| (t.bytes_transferred, t.warmup_bytes, t.elapsed_seconds))
}

pub async fn echo() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn health(State(resources): State<SharedResources>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        uptime_seconds: resources.uptime_seconds(),
        requests_served: resources.requests_served(),
    })
}

/// Run the latency prober against the ping target and report its samples
pub async fn ping(State(resources): State<SharedResources>) -> std::result::Result<Json<PingResponse>, ServerError> {
    let config = resources.config();
    let prober = LatencyProber::new(resources.ping_transport(), config.ping_timeout(), resources.measurements());

    match prober.measure_latency(config.ping_count, config.ping_interval(), &CancelHandle::new()).await {
        Ok(result) => Ok(Json(PingResponse::from(&result))),
        Err(error) => Err(resources.reject(error, "Ping probe failed").await),
    }
}

pub async fn download(
    State(resources): State<SharedResources>,
    Query(query): Query<TransferQuery>,
) -> std::result::Result<Response, ServerError> {
    let (bytes, chunk) = match query.resolve(resources.config()) {
        Ok(resolved) => resolved,
        Err(error) => return Err(resources.reject(error, "Rejected download request").await),
    };
    let bytes = bytes.unwrap_or(resources.config().download_bytes);

    resources.logger()
        .debug(&format!("Streaming {} bytes in {} byte chunks", bytes, chunk))
        .log()
        .await;

    let headers = [
        ("content-type", "application/octet-stream".to_string()),
        ("cache-control", "no-store".to_string()),
        (PAYLOAD_BYTES_HEADER, bytes.to_string()),
    ];
    let body = Body::from_stream(download_body(resources, bytes, chunk));

    Ok((StatusCode::OK, headers, body).into_response())
}

struct DownloadState {
    resources: SharedResources,
    chunks: PayloadChunks,
    tally: Option<TransferTally>,
    in_flight: Option<u64>,
}

/// Payload chunks followed by the footer line.
///
/// A chunk counts as delivered when the body is polled for the next one.
fn download_body(resources: SharedResources, bytes: u64, chunk: u64) -> impl Stream<Item = std::result::Result<Bytes, Infallible>> + Send {
    let state = DownloadState {
        chunks: resources.payload().chunks(bytes, chunk),
        tally: Some(TransferTally::new(bytes, chunk, Instant::now())),
        in_flight: None,
        resources,
    };

    stream::unfold(state, |mut state| async move {
        let tally = state.tally.as_mut()?;
        if let Some(len) = state.in_flight.take() {
            tally.record_chunk(len, Instant::now());
        }

        if let Some(chunk) = state.chunks.next() {
            state.in_flight = Some(chunk.len() as u64);
            return Some((Ok(chunk), state));
        }

        let result = state.tally.take()?.into_result(ProbeKind::Download, TransferOutcome::Finished);
        state.resources.measurements()
            .log_probe_result(&Uuid::new_v4().to_string(), &result)
            .await;

        Some((Ok(download_footer(&state.resources, &result).await), state))
    })
}

async fn download_footer(resources: &SharedResources, result: &ProbeResult) -> Bytes {
    let (bytes_transferred, warmup_bytes, elapsed_seconds) = transfer_totals(result);
    let report = DownloadReport {
        status: result.status,
        download_speed_bits_per_sec: completed_speed(result),
        bytes_transferred,
        warmup_bytes,
        elapsed_seconds,
        timestamp: Utc::now(),
    };

    match footer_line(&report) {
        Ok(footer) => footer,
        Err(error) => {
            resources.logger()
                .error("Dropping download footer")
                .error_info(&error)
                .log()
                .await;
            // A bare newline reads as "no footer" on the client
            Bytes::from_static(b"\n")
        }
    }
}

/// Newline-framed JSON line that follows the payload
fn footer_line<T: Serialize>(report: &T) -> Result<Bytes> {
    let mut footer = BytesMut::from(&b"\n"[..]);
    footer.extend_from_slice(&serde_json::to_vec(report)?);
    footer.extend_from_slice(b"\n");
    Ok(footer.freeze())
}

/// Groups incoming body frames into whole chunks so warm-up and samples use
/// the same unit as the sending client
struct ChunkCounter {
    tally: TransferTally,
    chunk_bytes: u64,
    carry: u64,
    last_frame: Option<Instant>,
}

impl ChunkCounter {
    fn new(expected_bytes: u64, chunk_bytes: u64, started: Instant) -> Self {
        Self {
            tally: TransferTally::new(expected_bytes, chunk_bytes, started),
            chunk_bytes,
            carry: 0,
            last_frame: None,
        }
    }

    fn add(&mut self, len: u64, at: Instant) {
        self.carry += len;
        self.last_frame = Some(at);
        while self.carry >= self.chunk_bytes {
            self.tally.record_chunk(self.chunk_bytes, at);
            self.carry -= self.chunk_bytes;
        }
    }

    fn finish(mut self) -> TransferTally {
        if let (true, Some(at)) = (self.carry > 0, self.last_frame) {
            self.tally.record_chunk(self.carry, at);
        }
        self.tally
    }
}

/// Count an upload body; a JSON body is additionally checked against its
/// declared payload size
pub async fn upload(
    State(resources): State<SharedResources>,
    Query(query): Query<TransferQuery>,
    headers: HeaderMap,
    body: Body,
) -> std::result::Result<Json<UploadReport>, ServerError> {
    let started = Instant::now();
    let config = resources.config();

    let (expected, chunk) = match query.resolve(config) {
        Ok(resolved) => resolved,
        Err(error) => return Err(resources.reject(error, "Rejected upload request").await),
    };

    let is_directive = headers.get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.starts_with("application/json"));

    let mut consumer = UploadConsumer::new(config.max_transfer_bytes, expected);
    let mut counter = ChunkCounter::new(expected.unwrap_or(0), chunk, started);
    let mut retained = BytesMut::new();
    let mut outcome = TransferOutcome::Finished;

    let mut frames = body.into_data_stream();
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(error) => {
                outcome = TransferOutcome::Aborted(format!("Upload body broke off: {}", error));
                break;
            }
        };

        if let Err(error) = consumer.consume(&frame) {
            return Err(resources.reject(error, "Rejected upload body").await);
        }
        if is_directive {
            retained.extend_from_slice(&frame);
        }
        counter.add(frame.len() as u64, Instant::now());
    }

    let finished = outcome == TransferOutcome::Finished;
    let mut result = counter.finish().into_result(ProbeKind::Upload, outcome);
    let mut expected_bytes = consumer.expected_bytes();

    if is_directive && finished {
        let directive: UploadDirective = match serde_json::from_slice(&retained) {
            Ok(directive) => directive,
            Err(error) => return Err(resources.reject(AppError::from(error), "Malformed upload directive").await),
        };

        let actual = directive.test_data.len() as u64;
        expected_bytes = Some(directive.payload_size_bytes);
        if actual != directive.payload_size_bytes && result.is_complete() {
            result.status = ProbeStatus::Failed;
            result.error = Some(format!(
                "testData has {} bytes but payloadSizeBytes declares {}", actual, directive.payload_size_bytes
            ));
        }
    }

    resources.measurements()
        .log_probe_result(&Uuid::new_v4().to_string(), &result)
        .await;

    let (bytes_transferred, warmup_bytes, elapsed_seconds) = transfer_totals(&result);
    Ok(Json(UploadReport {
        status: result.status,
        upload_speed_bits_per_sec: completed_speed(&result),
        bytes_transferred,
        warmup_bytes,
        elapsed_seconds,
        expected_bytes,
        timestamp: Utc::now(),
        error: result.error,
    }))
}
