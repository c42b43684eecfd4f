//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env file if it exists
    ///
    /// Variables already present in the process environment keep their value.
    pub fn load_env_file(debug: bool) -> Result<()> {
        Self::load_env_file_from(Path::new(".env"), debug)
    }

    /// Load a specific env file if it exists
    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        if path.exists() {
            dotenv::from_path(path)
                .map_err(|e| AppError::config(format!("Failed to load {}: {}", path.display(), e)))?;

            if debug {
                eprintln!("Loaded configuration from {}", path.display());
            }
        } else if debug {
            eprintln!("No {} file found, using defaults and CLI arguments", path.display());
        }

        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# Network Speed Tester Configuration
#
# Values set here are defaults for both `nst` modes. Variables already set
# in the environment win over this file; command-line flags win over both.

# Speed-test server the client measures against
# SERVER_URL=http://127.0.0.1:8080

# Address the server binds to with --serve
# BIND_ADDRESS=127.0.0.1:8080

# Base URL the server's /ping endpoint measures against (default: its own /echo)
# PING_TARGET=http://127.0.0.1:8080

# Latency phase: number of round trips, pause between them, per-sample timeout
# PING_COUNT=10
# PING_INTERVAL_MS=50
# PING_TIMEOUT_MS=2000

# Transfer sizes in bytes; the first chunk of each transfer is warm-up
# DOWNLOAD_BYTES=5242880
# UPLOAD_BYTES=1048576
# CHUNK_BYTES=65536

# Ceiling on a single phase, in seconds
# PHASE_TIMEOUT_SECONDS=30

# Largest transfer the server accepts in either direction
# MAX_TRANSFER_BYTES=1073741824

# Enable colored output (true/false)
# ENABLE_COLOR=true

# Example configurations:
#
# Quick check against a LAN server:
# SERVER_URL=http://192.168.1.10:8080
# DOWNLOAD_BYTES=1048576
# UPLOAD_BYTES=524288
#
# Fast links need bigger transfers to leave slow start:
# DOWNLOAD_BYTES=104857600
# UPLOAD_BYTES=26214400
# CHUNK_BYTES=262144
"#.to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content)
            .map_err(|e| AppError::config(format!("Failed to write example .env file: {}", e)))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "SERVER_URL" | "PING_TARGET" => {
                if key == "PING_TARGET" && value.is_empty() {
                    return Ok(());
                }
                let parsed = url::Url::parse(value)
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(AppError::config(format!("{} must use http or https: {}", key, value)));
                }
            }
            "BIND_ADDRESS" => {
                value.parse::<SocketAddr>()
                    .map_err(|e| AppError::config(format!("Invalid BIND_ADDRESS value '{}': {}", value, e)))?;
            }
            "PING_COUNT" => {
                let count: u32 = value.parse()
                    .map_err(|e| AppError::config(format!("Invalid PING_COUNT value '{}': {}", value, e)))?;
                if count == 0 || count > 1000 {
                    return Err(AppError::config(format!("PING_COUNT must be between 1 and 1000, got: {}", count)));
                }
            }
            "PING_INTERVAL_MS" => {
                value.parse::<u64>()
                    .map_err(|e| AppError::config(format!("Invalid PING_INTERVAL_MS value '{}': {}", value, e)))?;
            }
            "PING_TIMEOUT_MS" | "DOWNLOAD_BYTES" | "UPLOAD_BYTES" | "CHUNK_BYTES" | "MAX_TRANSFER_BYTES" => {
                let number: u64 = value.parse()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
                if number == 0 {
                    return Err(AppError::config(format!("{} must be greater than 0", key)));
                }
            }
            "PHASE_TIMEOUT_SECONDS" => {
                let timeout: u64 = value.parse()
                    .map_err(|e| AppError::config(format!("Invalid PHASE_TIMEOUT_SECONDS value '{}': {}", value, e)))?;
                if timeout == 0 || timeout > 3600 {
                    return Err(AppError::config(format!("PHASE_TIMEOUT_SECONDS must be between 1 and 3600, got: {}", timeout)));
                }
            }
            "ENABLE_COLOR" => {
                value.parse::<bool>()
                    .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", value, e)))?;
            }
            _ => {
                // Unknown environment variable, ignore
            }
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("SERVER_URL", "Speed-test server base URL (client mode)", "http://127.0.0.1:8080"),
            ("BIND_ADDRESS", "Server bind address (--serve)", "0.0.0.0:8080"),
            ("PING_TARGET", "Base URL the server's /ping measures against", "http://127.0.0.1:8080"),
            ("PING_COUNT", "Latency samples per ping phase (1-1000)", "10"),
            ("PING_INTERVAL_MS", "Pause between latency samples", "50"),
            ("PING_TIMEOUT_MS", "Per-sample latency timeout", "2000"),
            ("DOWNLOAD_BYTES", "Bytes requested in the download phase", "5242880"),
            ("UPLOAD_BYTES", "Bytes sent in the upload phase", "1048576"),
            ("CHUNK_BYTES", "Transfer chunk size", "65536"),
            ("PHASE_TIMEOUT_SECONDS", "Ceiling on a single phase (1-3600)", "30"),
            ("MAX_TRANSFER_BYTES", "Largest transfer the server accepts", "1073741824"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<22} {}\n", var, description));
            help.push_str(&format!("  {:<22} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Vec<String> {
        let mut warnings = Vec::new();

        for (var_name, _, _) in Self::get_supported_env_vars() {
            if let Ok(value) = std::env::var(var_name) {
                if let Err(e) = Self::validate_env_var(var_name, &value) {
                    warnings.push(format!("Warning: {}", e));
                }
            }
        }

        warnings
    }

    /// Validate the entries of an env file; `None` when it does not exist
    pub fn check_env_file(path: &Path) -> Result<Option<Vec<String>>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut warnings = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match line.split_once('=') {
                Some((key, value)) => {
                    if let Err(e) = Self::validate_env_var(key.trim(), value) {
                        warnings.push(format!("Line '{}': {}", line, e));
                    }
                }
                None => warnings.push(format!("Line '{}': expected KEY=VALUE", line)),
            }
        }

        Ok(Some(warnings))
    }
}
