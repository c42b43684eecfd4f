//! Download and upload throughput measurement
//!
//! Both directions use the same warm-up policy: the first chunk absorbs
//! connection setup and slow start and is excluded. The measurement window
//! opens the instant the first chunk completes and closes the instant the
//! last byte completes (download: last chunk received; upload: server
//! acknowledgement of the final chunk).

use crate::client::{ChunkSink, ChunkSource, ProbeTransport};
use crate::error::{AppError, Result};
use crate::executor::CancelHandle;
use crate::logging::MeasurementLogger;
use crate::models::{ProbeResult, Sample, ServerMeasurement, TransferDiagnostics};
use crate::payload::PayloadPool;
use crate::types::{ProbeKind, ProbeStatus};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// How a transfer ended, as seen by the loop that drove it
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// The transport reported the end of the transfer
    Finished,
    /// Cancellation was observed at a chunk boundary
    Cancelled,
    /// The transfer broke off or hit the phase ceiling
    Aborted(String),
}

/// Byte and time accounting for one transfer.
///
/// Chunks that complete without the clock advancing are carried forward
/// into the next sample; any carried bytes left at the end are folded into
/// the last sample, so the samples always partition the measurement window.
#[derive(Debug, Clone)]
pub struct TransferTally {
    started: Instant,
    diagnostics: TransferDiagnostics,
    window_start: Option<Instant>,
    last_mark: Option<Instant>,
    pending_bytes: u64,
    /// (bytes, seconds) behind each sample
    segments: Vec<(u64, f64)>,
    samples: Vec<Sample>,
}

impl TransferTally {
    pub fn new(requested_bytes: u64, chunk_bytes: u64, started: Instant) -> Self {
        Self {
            started,
            diagnostics: TransferDiagnostics::new(requested_bytes, chunk_bytes),
            window_start: None,
            last_mark: None,
            pending_bytes: 0,
            segments: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Account for a chunk that completed at `at`
    pub fn record_chunk(&mut self, len: u64, at: Instant) {
        self.diagnostics.bytes_transferred += len;
        self.diagnostics.chunks_transferred += 1;

        let window_start = match self.window_start {
            Some(start) => start,
            None => {
                self.diagnostics.warmup_bytes = len;
                self.window_start = Some(at);
                self.last_mark = Some(at);
                return;
            }
        };

        self.diagnostics.measured_bytes += len;
        self.diagnostics.elapsed_seconds = at.saturating_duration_since(window_start).as_secs_f64();
        self.pending_bytes += len;

        let mark = self.last_mark.unwrap_or(window_start);
        let seconds = at.saturating_duration_since(mark).as_secs_f64();
        if seconds > 0.0 {
            let sequence = self.samples.len() as u32;
            let value = self.pending_bytes as f64 * 8.0 / seconds;
            let offset = at.saturating_duration_since(self.started).as_secs_f64();

            self.samples.push(Sample::new(sequence, value, offset));
            self.segments.push((self.pending_bytes, seconds));
            self.pending_bytes = 0;
            self.last_mark = Some(at);
        }
    }

    pub fn diagnostics(&self) -> &TransferDiagnostics {
        &self.diagnostics
    }

    /// Close the tally and build the probe result
    pub fn into_result(mut self, kind: ProbeKind, outcome: TransferOutcome) -> ProbeResult {
        self.fold_pending();

        let (status, failed_count, error) = match outcome {
            TransferOutcome::Cancelled => (ProbeStatus::Cancelled, 0, None),
            TransferOutcome::Aborted(reason) => (ProbeStatus::Failed, 1, Some(reason)),
            TransferOutcome::Finished => match self.completion_error() {
                Some(reason) => (ProbeStatus::Failed, 0, Some(reason)),
                None => (ProbeStatus::Complete, 0, None),
            },
        };

        let result = ProbeResult::throughput(kind, status, self.samples, failed_count, self.diagnostics);
        match error {
            Some(error) => result.with_error(error),
            None => result,
        }
    }

    fn fold_pending(&mut self) {
        if self.pending_bytes == 0 {
            return;
        }

        if let (Some(sample), Some(segment)) = (self.samples.last_mut(), self.segments.last_mut()) {
            segment.0 += self.pending_bytes;
            sample.value = segment.0 as f64 * 8.0 / segment.1;
            self.pending_bytes = 0;
        }
    }

    fn completion_error(&self) -> Option<String> {
        let d = &self.diagnostics;
        if d.bytes_transferred < d.requested_bytes {
            return Some(format!(
                "Transfer ended after {} of {} bytes", d.bytes_transferred, d.requested_bytes
            ));
        }
        if d.measured_bytes == 0 {
            return Some("No bytes transferred in measurement window".to_string());
        }
        if d.throughput_bps().is_none() {
            return Some(format!("Too fast to measure: {} bytes in zero elapsed time", d.measured_bytes));
        }
        None
    }
}

/// Measures download and upload throughput over chunked transfers
pub struct ThroughputMeter {
    transport: Arc<dyn ProbeTransport>,
    payload: PayloadPool,
    phase_timeout: Duration,
    logger: Arc<MeasurementLogger>,
}

impl ThroughputMeter {
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        payload: PayloadPool,
        phase_timeout: Duration,
        logger: Arc<MeasurementLogger>,
    ) -> Self {
        Self {
            transport,
            payload,
            phase_timeout,
            logger,
        }
    }

    /// Receive `total_bytes` from the server in `chunk_bytes` chunks
    pub async fn measure_download(&self, total_bytes: u64, chunk_bytes: u64, cancel: &CancelHandle) -> Result<ProbeResult> {
        validate_sizes(total_bytes, chunk_bytes)?;

        let started = Instant::now();
        let deadline = started + self.phase_timeout;
        let mut tally = TransferTally::new(total_bytes, chunk_bytes, started);

        let opened = self.within(deadline, self.transport.open_download(total_bytes, chunk_bytes)).await;
        let mut source: Box<dyn ChunkSource> = match opened {
            Ok(source) => source,
            Err(error) if error.is_hard_fault() => return Err(error),
            Err(error) => return Ok(tally.into_result(ProbeKind::Download, TransferOutcome::Aborted(error.to_string()))),
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(tally.into_result(ProbeKind::Download, TransferOutcome::Cancelled));
            }

            match self.within(deadline, source.next_chunk()).await {
                Ok(Some(chunk)) => tally.record_chunk(chunk.len() as u64, Instant::now()),
                Ok(None) => break,
                Err(error) if error.is_hard_fault() => return Err(error),
                Err(error) => return Ok(tally.into_result(ProbeKind::Download, TransferOutcome::Aborted(error.to_string()))),
            }
        }

        let server_measurement = match self.within(deadline, source.finish()).await {
            Ok(measurement) => measurement,
            Err(error) => {
                self.logger.logger()
                    .warn(&format!("Ignoring server download report: {}", error))
                    .error_info(&error)
                    .log()
                    .await;
                None
            }
        };

        Ok(tally.into_result(ProbeKind::Download, TransferOutcome::Finished)
            .with_server_measurement(server_measurement))
    }

    /// Send `total_bytes` of generated payload in `chunk_bytes` chunks
    pub async fn measure_upload(&self, total_bytes: u64, chunk_bytes: u64, cancel: &CancelHandle) -> Result<ProbeResult> {
        validate_sizes(total_bytes, chunk_bytes)?;

        let started = Instant::now();
        let deadline = started + self.phase_timeout;
        let mut tally = TransferTally::new(total_bytes, chunk_bytes, started);

        let opened = self.within(deadline, self.transport.open_upload(total_bytes, chunk_bytes)).await;
        let mut sink: Box<dyn ChunkSink> = match opened {
            Ok(sink) => sink,
            Err(error) if error.is_hard_fault() => return Err(error),
            Err(error) => return Ok(tally.into_result(ProbeKind::Upload, TransferOutcome::Aborted(error.to_string()))),
        };

        let mut chunks = self.payload.chunks(total_bytes, chunk_bytes).peekable();
        while let Some(chunk) = chunks.next() {
            if cancel.is_cancelled() {
                return Ok(tally.into_result(ProbeKind::Upload, TransferOutcome::Cancelled));
            }

            let len = chunk.len() as u64;
            match self.within(deadline, sink.send_chunk(chunk)).await {
                Ok(()) => {}
                Err(error) if error.is_hard_fault() => return Err(error),
                Err(error) => return Ok(tally.into_result(ProbeKind::Upload, TransferOutcome::Aborted(error.to_string()))),
            }

            if chunks.peek().is_some() {
                tally.record_chunk(len, Instant::now());
                continue;
            }

            // The final chunk completes when the server acknowledges it
            return match self.within(deadline, sink.finish()).await {
                Ok(measurement) => {
                    tally.record_chunk(len, Instant::now());
                    let mut result = tally.into_result(ProbeKind::Upload, TransferOutcome::Finished);
                    if let (true, Some(reason)) = (result.is_complete(), server_shortfall(&measurement, total_bytes)) {
                        result.status = ProbeStatus::Failed;
                        result.error = Some(reason);
                    }
                    Ok(result.with_server_measurement(Some(measurement)))
                }
                Err(error) if error.is_hard_fault() => Err(error),
                Err(error) => Ok(tally.into_result(ProbeKind::Upload, TransferOutcome::Aborted(error.to_string()))),
            };
        }

        Ok(tally.into_result(ProbeKind::Upload, TransferOutcome::Finished))
    }

    /// Run a transport step under the phase ceiling
    async fn within<T, F>(&self, deadline: Instant, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout_at(deadline, step).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AppError::timeout(format!(
                "Phase exceeded its {}s ceiling", self.phase_timeout.as_secs_f64()
            ))),
        }
    }
}

/// The server counted fewer bytes than were sent
fn server_shortfall(measurement: &ServerMeasurement, total_bytes: u64) -> Option<String> {
    if measurement.bytes_transferred >= total_bytes {
        return None;
    }
    Some(format!(
        "Server received {} of {} bytes", measurement.bytes_transferred, total_bytes
    ))
}

fn validate_sizes(total_bytes: u64, chunk_bytes: u64) -> Result<()> {
    if chunk_bytes == 0 {
        return Err(AppError::protocol("Chunk size must be greater than 0"));
    }
    if total_bytes == 0 {
        return Err(AppError::protocol("Transfer size must be greater than 0"));
    }
    Ok(())
}
