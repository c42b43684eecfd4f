//! Configuration parsing from CLI arguments and environment variables

use crate::{
    cli::Cli,
    config::env::EnvManager,
    error::Result,
    models::Config,
};
use std::path::PathBuf;

/// Configuration parser that combines CLI arguments with environment variables
pub struct ConfigParser {
    cli: Cli,
    env_file: PathBuf,
}

impl ConfigParser {
    /// Create a new configuration parser with CLI arguments
    pub fn new(cli: Cli) -> Self {
        Self { cli, env_file: PathBuf::from(".env") }
    }

    /// Read a different env file instead of `./.env`
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = path.into();
        self
    }

    /// Parse and build the complete configuration
    pub fn parse(&self) -> Result<Config> {
        let mut config = Config::default();

        EnvManager::load_env_file_from(&self.env_file, self.cli.debug)?;
        config.merge_from_env()?;

        self.apply_cli_overrides(&mut config);

        config.validate()?;

        Ok(config)
    }

    /// Apply CLI argument overrides to configuration
    fn apply_cli_overrides(&self, config: &mut Config) {
        let cli = &self.cli;

        if let Some(ref server) = cli.server {
            config.server_url = server.clone();
        }
        if let Some(ref bind) = cli.bind {
            config.bind_address = bind.clone();
        }
        if let Some(ref target) = cli.ping_target {
            config.ping_target = if target.trim().is_empty() { None } else { Some(target.clone()) };
        }
        if let Some(count) = cli.ping_count {
            config.ping_count = count;
        }
        if let Some(bytes) = cli.download_bytes {
            config.download_bytes = bytes;
        }
        if let Some(bytes) = cli.upload_bytes {
            config.upload_bytes = bytes;
        }
        if let Some(bytes) = cli.chunk_bytes {
            config.chunk_bytes = bytes;
        }
        if let Some(secs) = cli.phase_timeout {
            config.phase_timeout_seconds = secs;
        }
        if let Some(enable_color) = cli.color_override() {
            config.enable_color = enable_color;
        }

        // CLI-only switches
        config.json = cli.json;
        config.verbose = cli.verbose;
        config.debug = cli.debug;

        if config.debug {
            eprintln!("Applied CLI overrides to configuration");
            eprintln!("{}", display_config_summary(config));
        }
    }
}

/// Convenience function to load complete configuration from CLI arguments
pub fn load_config(cli: Cli) -> Result<Config> {
    ConfigParser::new(cli).parse()
}

/// Display configuration summary for debug purposes
pub fn display_config_summary(config: &Config) -> String {
    let summary = [
        format!("Server URL: {}", config.server_url),
        format!("Bind Address: {}", config.bind_address),
        format!("Ping Target: {}", config.ping_target.as_deref().unwrap_or("(own /echo)")),
        format!(
            "Ping: {} samples, {}ms interval, {}ms timeout",
            config.ping_count, config.ping_interval_ms, config.ping_timeout_ms
        ),
        format!(
            "Transfers: download {} bytes, upload {} bytes, chunk {} bytes",
            config.download_bytes, config.upload_bytes, config.chunk_bytes
        ),
        format!("Phase Timeout: {}s", config.phase_timeout_seconds),
        format!("Max Transfer: {} bytes", config.max_transfer_bytes),
        format!("Color Output: {}", config.enable_color),
        format!("JSON Output: {}", config.json),
        format!("Verbose: {}", config.verbose),
        format!("Debug: {}", config.debug),
    ];

    summary.join("\n")
}
