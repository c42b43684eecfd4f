//! Configuration data model and validation

use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main application configuration, shared by client and server mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the speed-test server the client measures against
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Address the server binds to in `--serve` mode
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Number of latency round trips per ping phase
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,

    /// Pause between consecutive latency samples
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Per-sample latency timeout
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Bytes requested in the download phase
    #[serde(default = "default_download_bytes")]
    pub download_bytes: u64,

    /// Bytes sent in the upload phase
    #[serde(default = "default_upload_bytes")]
    pub upload_bytes: u64,

    /// Chunk size used for both transfer directions
    #[serde(default = "default_chunk_bytes")]
    pub chunk_bytes: u64,

    /// Ceiling on the duration of a single phase
    #[serde(default = "default_phase_timeout_seconds")]
    pub phase_timeout_seconds: u64,

    /// Largest transfer the server accepts in either direction
    #[serde(default = "default_max_transfer_bytes")]
    pub max_transfer_bytes: u64,

    /// Base URL the server's `/ping` prober targets; its own `/echo` when unset
    #[serde(default)]
    pub ping_target: Option<String>,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Print the report as JSON instead of text
    #[serde(default)]
    pub json: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            bind_address: default_bind_address(),
            ping_count: default_ping_count(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            download_bytes: default_download_bytes(),
            upload_bytes: default_upload_bytes(),
            chunk_bytes: default_chunk_bytes(),
            phase_timeout_seconds: default_phase_timeout_seconds(),
            max_transfer_bytes: default_max_transfer_bytes(),
            ping_target: None,
            enable_color: default_enable_color(),
            json: false,
            verbose: false,
            debug: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_seconds)
    }

    /// Parsed bind address
    pub fn bind_socket_addr(&self) -> Result<SocketAddr> {
        self.bind_address.parse::<SocketAddr>()
            .map_err(|e| AppError::config(format!("Invalid bind address '{}': {}", self.bind_address, e)))
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        if self.server_url.is_empty() {
            return Err(AppError::config("Server URL cannot be empty"));
        }

        match url::Url::parse(&self.server_url) {
            Ok(parsed) => {
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(AppError::config(format!(
                        "Server URL must use http or https: {}", self.server_url
                    )));
                }
            }
            Err(e) => {
                return Err(AppError::config(format!("Invalid server URL '{}': {}", self.server_url, e)));
            }
        }

        if let Some(target) = &self.ping_target {
            if let Err(e) = url::Url::parse(target) {
                return Err(AppError::config(format!("Invalid ping target '{}': {}", target, e)));
            }
        }

        self.bind_socket_addr()?;

        if self.ping_count == 0 {
            return Err(AppError::config("Ping count must be greater than 0"));
        }

        if self.ping_count > 1000 {
            return Err(AppError::config("Ping count cannot exceed 1000"));
        }

        if self.ping_timeout_ms == 0 {
            return Err(AppError::config("Ping timeout must be greater than 0"));
        }

        if self.chunk_bytes == 0 {
            return Err(AppError::config("Chunk size must be greater than 0"));
        }

        // The first chunk is warm-up, so a measured window needs at least one more
        for (name, total) in [("Download", self.download_bytes), ("Upload", self.upload_bytes)] {
            if total < self.chunk_bytes.saturating_mul(2) {
                return Err(AppError::config(format!(
                    "{} size ({} bytes) must be at least twice the chunk size ({} bytes)",
                    name, total, self.chunk_bytes
                )));
            }

            if total > self.max_transfer_bytes {
                return Err(AppError::config(format!(
                    "{} size ({} bytes) exceeds the transfer limit ({} bytes)",
                    name, total, self.max_transfer_bytes
                )));
            }
        }

        if self.phase_timeout_seconds == 0 {
            return Err(AppError::config("Phase timeout must be greater than 0"));
        }

        if self.phase_timeout_seconds > 3600 {
            return Err(AppError::config("Phase timeout cannot exceed 3600 seconds"));
        }

        Ok(())
    }

    /// Merge environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(server_url) = std::env::var("SERVER_URL") {
            self.server_url = server_url.trim().to_string();
        }

        if let Ok(bind_address) = std::env::var("BIND_ADDRESS") {
            self.bind_address = bind_address.trim().to_string();
        }

        if let Ok(target) = std::env::var("PING_TARGET") {
            let target = target.trim();
            self.ping_target = if target.is_empty() { None } else { Some(target.to_string()) };
        }

        env_number("PING_COUNT", &mut self.ping_count)?;
        env_number("PING_INTERVAL_MS", &mut self.ping_interval_ms)?;
        env_number("PING_TIMEOUT_MS", &mut self.ping_timeout_ms)?;
        env_number("DOWNLOAD_BYTES", &mut self.download_bytes)?;
        env_number("UPLOAD_BYTES", &mut self.upload_bytes)?;
        env_number("CHUNK_BYTES", &mut self.chunk_bytes)?;
        env_number("PHASE_TIMEOUT_SECONDS", &mut self.phase_timeout_seconds)?;
        env_number("MAX_TRANSFER_BYTES", &mut self.max_transfer_bytes)?;

        if let Ok(enable_color) = std::env::var("ENABLE_COLOR") {
            self.enable_color = enable_color.trim().parse()
                .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", enable_color, e)))?;
        }

        Ok(())
    }
}

fn env_number<T>(name: &str, slot: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(value) = std::env::var(name) {
        *slot = value.trim().parse()
            .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", name, value, e)))?;
    }
    Ok(())
}

// Default value functions for serde
fn default_server_url() -> String {
    crate::defaults::DEFAULT_SERVER_URL.to_string()
}

fn default_bind_address() -> String {
    crate::defaults::DEFAULT_BIND_ADDRESS.to_string()
}

fn default_ping_count() -> u32 {
    crate::defaults::DEFAULT_PING_COUNT
}

fn default_ping_interval_ms() -> u64 {
    crate::defaults::DEFAULT_PING_INTERVAL.as_millis() as u64
}

fn default_ping_timeout_ms() -> u64 {
    crate::defaults::DEFAULT_PING_TIMEOUT.as_millis() as u64
}

fn default_download_bytes() -> u64 {
    crate::defaults::DEFAULT_DOWNLOAD_BYTES
}

fn default_upload_bytes() -> u64 {
    crate::defaults::DEFAULT_UPLOAD_BYTES
}

fn default_chunk_bytes() -> u64 {
    crate::defaults::DEFAULT_CHUNK_BYTES
}

fn default_phase_timeout_seconds() -> u64 {
    crate::defaults::DEFAULT_PHASE_TIMEOUT.as_secs()
}

fn default_max_transfer_bytes() -> u64 {
    crate::defaults::DEFAULT_MAX_TRANSFER_BYTES
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}
