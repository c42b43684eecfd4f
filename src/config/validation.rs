//! Configuration validation utilities and rules
//!
//! [`Config::validate`] rejects configurations that cannot run. The checks
//! here accept them but point out settings likely to produce poor
//! measurements.

use crate::{
    error::Result,
    models::Config,
};
use colored::Colorize;
use std::net::SocketAddr;

const MIN_USEFUL_CHUNK_BYTES: u64 = 4 * 1024;
const MAX_USEFUL_CHUNK_BYTES: u64 = 16 * 1024 * 1024;
const MIN_MEASURED_CHUNKS: u64 = 4;
const SHORT_TRANSFER_BYTES: u64 = 1024 * 1024;

/// Configuration validator with advanced validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration with comprehensive checks
    pub fn validate_comprehensive(config: &Config) -> Result<Vec<ValidationWarning>> {
        config.validate()?;

        let mut warnings = Vec::new();
        warnings.extend(Self::validate_server_url(&config.server_url));
        warnings.extend(Self::validate_bind_address(config));
        warnings.extend(Self::validate_ping_settings(config));
        warnings.extend(Self::validate_transfer_settings(config));

        Ok(warnings)
    }

    fn validate_server_url(server_url: &str) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        let Ok(parsed) = url::Url::parse(server_url) else {
            return warnings;
        };

        if !parsed.path().is_empty() && parsed.path() != "/" {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("Server URL '{}' has path '{}'; endpoints are resolved below it", server_url, parsed.path()),
            ));
        }

        if parsed.query().is_some() {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!("Server URL '{}' has query parameters, which are sent with every probe request", server_url),
            ));
        }

        let local = match parsed.host() {
            Some(url::Host::Ipv4(ip)) => ip.is_loopback() || ip.is_private(),
            Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
            Some(url::Host::Domain(domain)) => domain == "localhost",
            None => false,
        };
        if local {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("Server '{}' is on a local network; results reflect that path only", server_url),
            ));
        }

        warnings
    }

    fn validate_bind_address(config: &Config) -> Vec<ValidationWarning> {
        match config.bind_address.parse::<SocketAddr>() {
            Ok(addr) if addr.ip().is_unspecified() => vec![ValidationWarning::new(
                ValidationLevel::Info,
                format!("Server mode binds {} and is reachable on every interface", addr),
            )],
            Ok(addr) if addr.ip().is_loopback() && config.ping_target.is_some() => vec![ValidationWarning::new(
                ValidationLevel::Info,
                "Server /ping measures a remote target while bound to loopback".to_string(),
            )],
            _ => Vec::new(),
        }
    }

    fn validate_ping_settings(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if config.ping_count < 3 {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!("Ping count of {} gives an unreliable jitter figure (recommended: >= 3)", config.ping_count),
            ));
        } else if config.ping_count > 100 {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("High ping count of {} lengthens the ping phase", config.ping_count),
            ));
        }

        let phase_ms = config.phase_timeout_seconds.saturating_mul(1000);
        if config.ping_timeout_ms >= phase_ms {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Ping timeout of {}ms is not shorter than the {}s phase ceiling",
                    config.ping_timeout_ms, config.phase_timeout_seconds
                ),
            ));
        }

        // A responsive link spends roughly one interval per sample
        let expected_ms = u64::from(config.ping_count).saturating_mul(config.ping_interval_ms);
        if expected_ms >= phase_ms {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "{} pings at {}ms intervals cannot finish within the {}s phase ceiling",
                    config.ping_count, config.ping_interval_ms, config.phase_timeout_seconds
                ),
            ));
        }

        warnings
    }

    fn validate_transfer_settings(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if config.chunk_bytes < MIN_USEFUL_CHUNK_BYTES {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!("Chunk size of {} bytes lets per-chunk overhead dominate timing", config.chunk_bytes),
            ));
        } else if config.chunk_bytes > MAX_USEFUL_CHUNK_BYTES {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!("Chunk size of {} bytes makes cancellation and progress coarse", config.chunk_bytes),
            ));
        }

        for (name, total) in [("Download", config.download_bytes), ("Upload", config.upload_bytes)] {
            let measured_chunks = (total / config.chunk_bytes.max(1)).saturating_sub(1);
            if measured_chunks < MIN_MEASURED_CHUNKS {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Warning,
                    format!("{} measures only {} chunk(s) after warm-up", name, measured_chunks),
                ));
            }

            if total < SHORT_TRANSFER_BYTES {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Info,
                    format!("{} of {} bytes may end before a fast link reaches full speed", name, total),
                ));
            }
        }

        warnings
    }
}

/// Validation warning levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Info,
    Warning,
}

impl ValidationLevel {
    /// Get display string for level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

/// Configuration validation warning
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub level: ValidationLevel,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(level: ValidationLevel, message: String) -> Self {
        Self { level, message }
    }

    /// Format warning for display
    pub fn format(&self, use_color: bool) -> String {
        let tag = format!("[{}]", self.level.as_str());
        if !use_color {
            return format!("{} {}", tag, self.message);
        }

        let tag = match self.level {
            ValidationLevel::Info => tag.blue(),
            ValidationLevel::Warning => tag.yellow(),
        };
        format!("{} {}", tag, self.message)
    }
}

/// Convenience function for comprehensive configuration validation
pub fn validate_config(config: &Config) -> Result<Vec<ValidationWarning>> {
    ConfigValidator::validate_comprehensive(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warnings_for(config: &Config) -> Vec<ValidationWarning> {
        validate_config(config).unwrap()
    }

    fn has(warnings: &[ValidationWarning], level: ValidationLevel, needle: &str) -> bool {
        warnings.iter().any(|w| w.level == level && w.message.contains(needle))
    }

    #[test]
    fn test_defaults_have_no_hard_warnings() {
        let config = Config { server_url: "http://speed.example.net".to_string(), ..Default::default() };
        let warnings = warnings_for(&config);
        assert!(warnings.iter().all(|w| w.level == ValidationLevel::Info), "{:?}", warnings);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let config = Config { ping_count: 0, ..Default::default() };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_ping_warnings() {
        let config = Config {
            ping_count: 2,
            ping_timeout_ms: 5_000,
            phase_timeout_seconds: 5,
            ..Default::default()
        };
        let warnings = warnings_for(&config);
        assert!(has(&warnings, ValidationLevel::Warning, "unreliable jitter"));
        assert!(has(&warnings, ValidationLevel::Warning, "not shorter than the 5s phase ceiling"));

        let config = Config { ping_count: 200, ping_interval_ms: 200, ..Default::default() };
        let warnings = warnings_for(&config);
        assert!(has(&warnings, ValidationLevel::Info, "High ping count"));
        assert!(has(&warnings, ValidationLevel::Warning, "cannot finish within"));
    }

    #[test]
    fn test_transfer_warnings() {
        let config = Config {
            chunk_bytes: 1024,
            download_bytes: 3 * 1024,
            upload_bytes: 64 * 1024,
            ..Default::default()
        };
        let warnings = warnings_for(&config);
        assert!(has(&warnings, ValidationLevel::Warning, "per-chunk overhead"));
        assert!(has(&warnings, ValidationLevel::Warning, "Download measures only 2 chunk(s)"));
        assert!(!has(&warnings, ValidationLevel::Warning, "Upload measures only"));
        assert!(has(&warnings, ValidationLevel::Info, "Upload of 65536 bytes"));
    }

    #[test]
    fn test_server_url_warnings() {
        let config = Config { server_url: "http://192.168.1.20:8080/speed?x=1".to_string(), ..Default::default() };
        let warnings = warnings_for(&config);
        assert!(has(&warnings, ValidationLevel::Info, "has path '/speed'"));
        assert!(has(&warnings, ValidationLevel::Warning, "query parameters"));
        assert!(has(&warnings, ValidationLevel::Info, "local network"));
    }

    #[test]
    fn test_bind_all_interfaces() {
        let config = Config { bind_address: "0.0.0.0:8080".to_string(), ..Default::default() };
        assert!(has(&warnings_for(&config), ValidationLevel::Info, "every interface"));
    }

    #[test]
    fn test_warning_format() {
        let warning = ValidationWarning::new(ValidationLevel::Warning, "check this".to_string());
        assert_eq!(warning.format(false), "[WARNING] check this");
        assert!(warning.format(true).contains("check this"));
    }
}
