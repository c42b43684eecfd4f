//! Command-line interface
//!
//! Every measurement option can also come from the environment (or a `.env`
//! file); a flag on the command line wins.

use clap::Parser;

const AFTER_HELP: &str = "\
EXAMPLES:
    nst --serve --bind 0.0.0.0:8080
    nst --server http://192.168.1.10:8080
    nst --download-bytes 50M --upload-bytes 10M --chunk-bytes 256K
    nst --json > report.json

Run `nst --env-help` for the environment variables behind each option.";

/// Network Speed Tester - real latency, download and upload measurements
#[derive(Parser, Debug, Clone)]
#[command(name = "nst")]
#[command(version, about, long_about = None)]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    /// Run the speed-test HTTP server instead of a client test
    #[arg(long)]
    pub serve: bool,

    /// Address the server binds to
    #[arg(long, env = "BIND_ADDRESS", value_name = "ADDR")]
    pub bind: Option<String>,

    /// Base URL the server's /ping measures against
    #[arg(long, env = "PING_TARGET", value_name = "URL")]
    pub ping_target: Option<String>,

    /// Speed-test server to measure against
    #[arg(long, env = "SERVER_URL", value_name = "URL")]
    pub server: Option<String>,

    /// Latency round trips in the ping phase
    #[arg(long, env = "PING_COUNT", value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub ping_count: Option<u32>,

    /// Bytes to download (suffixes K, M, G are binary multiples)
    #[arg(long, env = "DOWNLOAD_BYTES", value_parser = parse_byte_size, value_name = "BYTES")]
    pub download_bytes: Option<u64>,

    /// Bytes to upload (suffixes K, M, G are binary multiples)
    #[arg(long, env = "UPLOAD_BYTES", value_parser = parse_byte_size, value_name = "BYTES")]
    pub upload_bytes: Option<u64>,

    /// Transfer chunk size (suffixes K, M, G are binary multiples)
    #[arg(long, env = "CHUNK_BYTES", value_parser = parse_byte_size, value_name = "BYTES")]
    pub chunk_bytes: Option<u64>,

    /// Ceiling on a single phase, in seconds
    #[arg(long, env = "PHASE_TIMEOUT_SECONDS", value_parser = parse_duration, value_name = "SECONDS")]
    pub phase_timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Force colored output
    #[arg(long, conflicts_with = "no_color")]
    pub color: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// List supported environment variables and exit
    #[arg(long)]
    pub env_help: bool,

    /// Write an example .env file to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub write_env_example: Option<std::path::PathBuf>,
}

impl Cli {
    /// Validate CLI arguments for conflicts and requirements
    pub fn validate(&self) -> Result<(), String> {
        if self.serve && self.json {
            return Err("--json applies to client mode only".to_string());
        }

        if let (Some(total), Some(chunk)) = (self.download_bytes, self.chunk_bytes) {
            if total < chunk.saturating_mul(2) {
                return Err(format!(
                    "--download-bytes ({}) must be at least twice --chunk-bytes ({})", total, chunk
                ));
            }
        }

        if let (Some(total), Some(chunk)) = (self.upload_bytes, self.chunk_bytes) {
            if total < chunk.saturating_mul(2) {
                return Err(format!(
                    "--upload-bytes ({}) must be at least twice --chunk-bytes ({})", total, chunk
                ));
            }
        }

        Ok(())
    }

    /// Whether this invocation only prints information and exits
    pub fn is_info_only(&self) -> bool {
        self.env_help || self.write_env_example.is_some()
    }

    /// Colors after flags and terminal detection; `None` leaves the configured value
    pub fn color_override(&self) -> Option<bool> {
        if self.color {
            Some(true)
        } else if self.no_color || self.json || !supports_color() {
            Some(false)
        } else {
            None
        }
    }

    /// Get configuration summary for display
    pub fn get_config_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("Command-line Summary:\n");
        summary.push_str(&format!("  Mode: {}\n", if self.serve { "server" } else { "client" }));

        if let Some(ref bind) = self.bind {
            summary.push_str(&format!("  Bind address: {}\n", bind));
        }
        if let Some(ref server) = self.server {
            summary.push_str(&format!("  Server: {}\n", server));
        }
        if let Some(count) = self.ping_count {
            summary.push_str(&format!("  Ping count: {}\n", count));
        }
        if let Some(bytes) = self.download_bytes {
            summary.push_str(&format!("  Download bytes: {}\n", bytes));
        }
        if let Some(bytes) = self.upload_bytes {
            summary.push_str(&format!("  Upload bytes: {}\n", bytes));
        }
        if let Some(bytes) = self.chunk_bytes {
            summary.push_str(&format!("  Chunk bytes: {}\n", bytes));
        }
        if let Some(secs) = self.phase_timeout {
            summary.push_str(&format!("  Phase timeout: {}s\n", secs));
        }

        summary.push_str(&format!("  JSON output: {}\n", self.json));
        summary.push_str(&format!("  Verbose mode: {}\n", self.verbose));
        summary.push_str(&format!("  Debug mode: {}\n", self.debug));

        summary
    }
}

/// Parse a byte count, optionally with a binary K/M/G suffix
fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.starts_with('+') || s.starts_with('-') {
        return Err(format!("Invalid byte count: {}", s));
    }

    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(digits_end);

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        other => return Err(format!("Unknown size suffix '{}' in '{}'", other, s)),
    };

    let value: u64 = digits.parse()
        .map_err(|_| format!("Invalid byte count: {}", s))?;

    let bytes = value.checked_mul(multiplier)
        .ok_or_else(|| format!("Byte count too large: {}", s))?;

    if bytes == 0 {
        return Err("Byte count must be greater than 0".to_string());
    }

    Ok(bytes)
}

/// Parse duration from seconds string
fn parse_duration(s: &str) -> Result<u64, String> {
    if s.starts_with('+') || s.starts_with("0x") || s.starts_with("0X") {
        return Err(format!("Invalid duration: {}", s));
    }

    s.parse::<u64>()
        .map_err(|_| format!("Invalid duration: {}", s))
        .and_then(|secs| {
            if secs == 0 {
                Err("Duration must be greater than 0".to_string())
            } else if secs > 3600 {
                Err("Duration cannot exceed 3600 seconds".to_string())
            } else {
                Ok(secs)
            }
        })
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    #[cfg(target_os = "windows")]
    {
        if std::env::var("ANSICON").is_ok() || std::env::var("ConEmuANSI").is_ok() {
            return true;
        }
    }

    #[cfg(unix)]
    {
        true
    }
    #[cfg(not(unix))]
    {
        false
    }
}
