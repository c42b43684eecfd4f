//! Data models and structures for the speed tester

pub mod config;
pub mod metrics;
pub mod wire;

// Re-export main model types
pub use config::Config;
pub use metrics::{ProbeResult, Sample, ServerMeasurement, SpeedTestReport, TransferDiagnostics};
pub use wire::{DownloadReport, ErrorBody, HealthResponse, PingResponse, UploadDirective, UploadReport};
