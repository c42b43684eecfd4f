//! Measurement samples, probe results and the final speed-test report

use crate::stats::{self, SampleStatistics};
use crate::types::{ProbeKind, ProbeStatus, ReportStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One measured value: a round-trip time in milliseconds or an
/// instantaneous throughput in bits per second
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Position of the sample within its probe, starting at 0
    pub sequence: u32,
    /// Measured value, see [`ProbeKind::sample_unit`]
    pub value: f64,
    /// Seconds since the probe started, from a monotonic clock
    pub timestamp_monotonic: f64,
}

impl Sample {
    pub fn new(sequence: u32, value: f64, timestamp_monotonic: f64) -> Self {
        Self { sequence, value, timestamp_monotonic }
    }
}

/// Byte accounting for a throughput phase, kept even when the phase failed
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDiagnostics {
    pub requested_bytes: u64,
    pub chunk_bytes: u64,
    /// Every byte that crossed the wire, warm-up included
    pub bytes_transferred: u64,
    /// Bytes excluded from the measurement window
    pub warmup_bytes: u64,
    /// Bytes inside the measurement window
    pub measured_bytes: u64,
    /// Length of the measurement window
    pub elapsed_seconds: f64,
    pub chunks_transferred: u32,
}

impl TransferDiagnostics {
    pub fn new(requested_bytes: u64, chunk_bytes: u64) -> Self {
        Self {
            requested_bytes,
            chunk_bytes,
            ..Default::default()
        }
    }

    /// Aggregate throughput over the measurement window
    pub fn throughput_bps(&self) -> Option<f64> {
        stats::throughput_bps(self.measured_bytes, self.elapsed_seconds)
    }

    /// Whether every requested byte arrived
    pub fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.requested_bytes
    }
}

/// The server's own view of a transfer, taken from the download footer or
/// the upload response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMeasurement {
    pub status: ProbeStatus,
    pub bits_per_second: Option<f64>,
    pub bytes_transferred: u64,
    pub warmup_bytes: u64,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate over the samples of one test phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub status: ProbeStatus,
    /// Latency: mean round trip. Throughput: `measuredBytes * 8 / elapsedSeconds`.
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Population standard deviation; jitter for the ping phase
    pub stddev: Option<f64>,
    pub sample_count: u32,
    pub failed_count: u32,
    pub attempted_count: u32,
    pub samples: Vec<Sample>,
    /// Ping only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    /// Download and upload only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferDiagnostics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_measurement: Option<ServerMeasurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// Result of a latency probe. Statistics come from the successful
    /// samples only; failures never contribute a value.
    pub fn latency(status: ProbeStatus, samples: Vec<Sample>, failed_count: u32) -> Self {
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let sample_count = samples.len() as u32;
        let attempted_count = sample_count + failed_count;

        let mut result = Self::empty(ProbeKind::Ping, status);
        if let Some(summary) = SampleStatistics::from_values(&values) {
            result.apply_statistics(&summary);
        }
        result.sample_count = sample_count;
        result.failed_count = failed_count;
        result.attempted_count = attempted_count;
        result.packet_loss = stats::packet_loss(failed_count, attempted_count);
        result.samples = samples;
        result
    }

    /// Result of a throughput probe. `mean` is the aggregate over the
    /// measurement window, the spread comes from the per-chunk samples.
    pub fn throughput(
        kind: ProbeKind,
        status: ProbeStatus,
        samples: Vec<Sample>,
        failed_count: u32,
        transfer: TransferDiagnostics,
    ) -> Self {
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        let sample_count = samples.len() as u32;

        let mut result = Self::empty(kind, status);
        if let Some(summary) = SampleStatistics::from_values(&values) {
            result.apply_statistics(&summary);
            result.mean = transfer.throughput_bps()
                .map(|mean| stats::within_range(mean, summary.min, summary.max));
        }
        result.sample_count = sample_count;
        result.failed_count = failed_count;
        result.attempted_count = sample_count + failed_count;
        result.samples = samples;
        result.transfer = Some(transfer);
        result
    }

    /// A phase that produced no samples at all
    pub fn failed(kind: ProbeKind, error: impl Into<String>) -> Self {
        Self::empty(kind, ProbeStatus::Failed).with_error(error)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_server_measurement(mut self, measurement: Option<ServerMeasurement>) -> Self {
        self.server_measurement = measurement;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == ProbeStatus::Complete
    }

    /// Jitter is the standard deviation of the ping samples
    pub fn jitter(&self) -> Option<f64> {
        self.stddev
    }

    fn empty(kind: ProbeKind, status: ProbeStatus) -> Self {
        Self {
            kind,
            status,
            mean: None,
            min: None,
            max: None,
            stddev: None,
            sample_count: 0,
            failed_count: 0,
            attempted_count: 0,
            samples: Vec::new(),
            packet_loss: None,
            transfer: None,
            server_measurement: None,
            error: None,
        }
    }

    fn apply_statistics(&mut self, summary: &SampleStatistics) {
        self.mean = Some(summary.mean);
        self.min = Some(summary.min);
        self.max = Some(summary.max);
        self.stddev = Some(summary.std_dev);
    }
}

/// Final outcome of one test run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedTestReport {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub ping: Option<ProbeResult>,
    pub download: Option<ProbeResult>,
    pub upload: Option<ProbeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl SpeedTestReport {
    /// Results of the phases that ran, in execution order
    pub fn phases(&self) -> impl Iterator<Item = &ProbeResult> {
        [&self.ping, &self.download, &self.upload]
            .into_iter()
            .filter_map(|phase| phase.as_ref())
    }

    /// Status derived from phase outcomes when the run was neither
    /// cancelled nor stopped by a hard fault
    pub fn status_from_phases(ping: Option<&ProbeResult>, download: Option<&ProbeResult>, upload: Option<&ProbeResult>) -> ReportStatus {
        let phases = [ping, download, upload];
        let complete = phases.iter()
            .filter(|phase| phase.map_or(false, |p| p.is_complete()))
            .count();

        match complete {
            3 => ReportStatus::Complete,
            0 => ReportStatus::Failed,
            _ => ReportStatus::PartialFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(values: &[f64]) -> Vec<Sample> {
        values.iter()
            .enumerate()
            .map(|(i, v)| Sample::new(i as u32, *v, i as f64 * 0.05))
            .collect()
    }

    #[test]
    fn test_latency_result_statistics() {
        let result = ProbeResult::latency(ProbeStatus::Complete, samples(&[10.0, 20.0, 30.0]), 0);
        assert_eq!(result.mean, Some(20.0));
        assert_eq!(result.min, Some(10.0));
        assert_eq!(result.max, Some(30.0));
        assert!((result.jitter().unwrap() - 8.164_965_809).abs() < 1e-6);
        assert_eq!(result.packet_loss, Some(0.0));
    }

    #[test]
    fn test_failures_do_not_touch_statistics() {
        let result = ProbeResult::latency(ProbeStatus::Complete, samples(&[10.0, 30.0]), 2);
        assert_eq!(result.mean, Some(20.0));
        assert_eq!(result.sample_count, 2);
        assert_eq!(result.failed_count, 2);
        assert_eq!(result.attempted_count, 4);
        assert_eq!(result.packet_loss, Some(0.5));
    }

    #[test]
    fn test_no_samples_means_no_statistics() {
        let result = ProbeResult::latency(ProbeStatus::Failed, Vec::new(), 10);
        assert!(result.mean.is_none());
        assert!(result.stddev.is_none());
        assert_eq!(result.attempted_count, 10);
        assert_eq!(result.packet_loss, Some(1.0));
    }

    #[test]
    fn test_throughput_mean_is_window_aggregate() {
        let mut transfer = TransferDiagnostics::new(196_608, 65_536);
        transfer.bytes_transferred = 196_608;
        transfer.warmup_bytes = 65_536;
        transfer.measured_bytes = 131_072;
        transfer.elapsed_seconds = 0.75;
        transfer.chunks_transferred = 3;

        // 65536 bytes in 0.25s then 65536 bytes in 0.5s
        let result = ProbeResult::throughput(
            ProbeKind::Download,
            ProbeStatus::Complete,
            samples(&[2_097_152.0, 1_048_576.0]),
            0,
            transfer,
        );

        let mean = result.mean.unwrap();
        assert!((mean - 131_072.0 * 8.0 / 0.75).abs() < 1e-6);
        assert!(result.min.unwrap() <= mean && mean <= result.max.unwrap());
    }

    #[test]
    fn test_report_status_from_phases() {
        let ok = ProbeResult::latency(ProbeStatus::Complete, samples(&[1.0]), 0);
        let failed = ProbeResult::failed(ProbeKind::Download, "reset");

        assert_eq!(SpeedTestReport::status_from_phases(Some(&ok), Some(&ok), Some(&ok)), ReportStatus::Complete);
        assert_eq!(SpeedTestReport::status_from_phases(Some(&ok), Some(&failed), Some(&ok)), ReportStatus::PartialFailure);
        assert_eq!(SpeedTestReport::status_from_phases(Some(&failed), None, None), ReportStatus::Failed);
    }

    #[test]
    fn test_serialization_uses_camel_case_and_nulls() {
        let result = ProbeResult::failed(ProbeKind::Upload, "no bytes transferred in measurement window");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "Failed");
        assert!(json["mean"].is_null());
        assert_eq!(json["sampleCount"], 0);
        assert!(json.get("packetLoss").is_none());
    }
}
