//! JSON bodies exchanged between the speed-test client and server

use crate::models::metrics::{ProbeResult, ServerMeasurement};
use crate::types::ProbeStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response of `GET /ping`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub status: ProbeStatus,
    /// Successful round trips in milliseconds
    pub samples: Vec<f64>,
    pub mean: Option<f64>,
    pub jitter: Option<f64>,
    pub packet_loss: Option<f64>,
    pub min_ping: Option<f64>,
    pub max_ping: Option<f64>,
    pub sample_count: u32,
    pub failed_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl From<&ProbeResult> for PingResponse {
    fn from(result: &ProbeResult) -> Self {
        Self {
            status: result.status,
            samples: result.samples.iter().map(|s| s.value).collect(),
            mean: result.mean,
            jitter: result.stddev,
            packet_loss: result.packet_loss,
            min_ping: result.min,
            max_ping: result.max,
            sample_count: result.sample_count,
            failed_count: result.failed_count,
            timestamp: Utc::now(),
        }
    }
}

/// Footer line appended after the payload of `GET /download`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    pub status: ProbeStatus,
    pub download_speed_bits_per_sec: Option<f64>,
    pub bytes_transferred: u64,
    pub warmup_bytes: u64,
    pub elapsed_seconds: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<DownloadReport> for ServerMeasurement {
    fn from(report: DownloadReport) -> Self {
        Self {
            status: report.status,
            bits_per_second: report.download_speed_bits_per_sec,
            bytes_transferred: report.bytes_transferred,
            warmup_bytes: report.warmup_bytes,
            elapsed_seconds: report.elapsed_seconds,
            error: None,
        }
    }
}

/// Response of `POST /upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub status: ProbeStatus,
    pub upload_speed_bits_per_sec: Option<f64>,
    pub bytes_transferred: u64,
    pub warmup_bytes: u64,
    pub elapsed_seconds: f64,
    pub expected_bytes: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<UploadReport> for ServerMeasurement {
    fn from(report: UploadReport) -> Self {
        Self {
            status: report.status,
            bits_per_second: report.upload_speed_bits_per_sec,
            bytes_transferred: report.bytes_transferred,
            warmup_bytes: report.warmup_bytes,
            elapsed_seconds: report.elapsed_seconds,
            error: report.error,
        }
    }
}

/// JSON form of an upload: a declared size and a filler string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDirective {
    pub payload_size_bytes: u64,
    pub test_data: String,
}

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub requests_served: u64,
}

/// Body of every 4xx/5xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_footer_field_names() {
        let report = DownloadReport {
            status: ProbeStatus::Complete,
            download_speed_bits_per_sec: Some(8_000_000.0),
            bytes_transferred: 131_072,
            warmup_bytes: 65_536,
            elapsed_seconds: 0.065,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&report).unwrap();
        for field in ["status", "downloadSpeedBitsPerSec", "bytesTransferred", "warmupBytes", "elapsedSeconds", "timestamp"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_upload_directive_parses_original_form() {
        let directive: UploadDirective = serde_json::from_str(
            "{\"payloadSizeBytes\": 3, \"testData\": \"xxx\"}"
        ).unwrap();
        assert_eq!(directive.payload_size_bytes, 3);
        assert_eq!(directive.test_data.len(), 3);
    }

    #[test]
    fn test_failed_upload_keeps_error() {
        let report = UploadReport {
            status: ProbeStatus::Failed,
            upload_speed_bits_per_sec: None,
            bytes_transferred: 0,
            warmup_bytes: 0,
            elapsed_seconds: 0.0,
            expected_bytes: Some(1024),
            timestamp: Utc::now(),
            error: Some("no bytes transferred in measurement window".to_string()),
        };

        let measurement: ServerMeasurement = report.into();
        assert_eq!(measurement.status, ProbeStatus::Failed);
        assert!(measurement.bits_per_second.is_none());
        assert!(measurement.error.unwrap().contains("no bytes"));
    }
}
