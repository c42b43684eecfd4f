//! Network Speed Tester
//!
//! A speed-test engine that measures latency and jitter, download throughput
//! and upload throughput from real transferred bytes and wall-clock time,
//! together with the HTTP server the measurements run against.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod models;
pub mod output;
pub mod payload;
pub mod probe;
pub mod server;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use client::{ClientFactory, HttpTransport, ProbeTransport};
pub use error::{AppError, Result};
pub use executor::{CancelHandle, ProgressEvent, TestOrchestrator, TestPlan};
pub use models::{Config, ProbeResult, Sample, SpeedTestReport, TransferDiagnostics};
pub use output::{ColoredFormatter, OutputFormatter, PlainFormatter, QualityRating};
pub use payload::{PayloadPool, UploadConsumer};
pub use probe::{LatencyProber, ThroughputMeter};
pub use server::{ServerResources, SpeedTestServer};
pub use stats::SampleStatistics;

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Build metadata set by build.rs
pub const BUILD_TIME: &str = env!("BUILD_TIME");
pub const GIT_COMMIT: &str = env!("GIT_COMMIT");
pub const TARGET_TRIPLE: &str = env!("TARGET_TRIPLE");

/// One-line version string with build metadata
pub fn build_info() -> String {
    format!("{} v{} ({}, {}, built {})", PKG_NAME, VERSION, GIT_COMMIT, TARGET_TRIPLE, BUILD_TIME)
}

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";
    pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";
    pub const DEFAULT_PING_COUNT: u32 = 10;
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(50);
    pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(2000);
    pub const DEFAULT_DOWNLOAD_BYTES: u64 = 5 * 1024 * 1024;
    pub const DEFAULT_UPLOAD_BYTES: u64 = 1024 * 1024;
    pub const DEFAULT_CHUNK_BYTES: u64 = 64 * 1024;
    pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_TRANSFER_BYTES: u64 = 1024 * 1024 * 1024;
    /// Size of the random block payloads are sliced from
    pub const PAYLOAD_BLOCK_BYTES: usize = 1024 * 1024;
    pub const DEFAULT_ENABLE_COLOR: bool = true;
}
