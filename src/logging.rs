//! Structured logging for the speed tester
//!
//! Every entry names the component that emitted it, and may carry the id of
//! the test run it belongs to plus typed fields (bytes, seconds, statuses).
//! Entries go to stderr so that a report printed on stdout (for example with
//! `--json`) stays machine readable. Tests can capture rendered lines instead.

use crate::error::{AppError, Result};
use crate::models::{Config, ProbeResult, SpeedTestReport};
use crate::types::{ProbeKind, TestPhase};
use chrono::{DateTime, Utc};
use colored::{Color, Colorize};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Debug shows everything from Debug up, verbose shows Info, otherwise
    /// only problems are logged
    pub fn for_config(config: &Config) -> Self {
        if config.debug {
            LogLevel::Debug
        } else if config.verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }

    fn color(self) -> Color {
        match self {
            LogLevel::Trace => Color::White,
            LogLevel::Debug => Color::Cyan,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
            LogLevel::Fatal => Color::Magenta,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            _ => Err(AppError::parse(format!("Invalid log level: {}", s))),
        }
    }
}

/// How entries are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `time LEVEL [COMPONENT] message [run] {fields}`
    Console,
    /// One JSON object per line
    Json,
    /// `time L COMPONENT: message`
    Compact,
}

impl LogFormat {
    /// JSON lines in debug mode, console lines otherwise
    pub fn for_config(config: &Config) -> Self {
        if config.debug {
            LogFormat::Json
        } else {
            LogFormat::Console
        }
    }
}

/// Where rendered lines go
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    /// Keeps the lines in memory
    Capture(Arc<Mutex<Vec<String>>>),
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

pub struct Logger {
    component: String,
    min_level: LogLevel,
    format: LogFormat,
    use_color: bool,
    with_location: bool,
    target: LogTarget,
    /// Fields stamped on every entry, such as the session id
    shared_fields: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl Logger {
    /// Console logger at Info level
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            min_level: LogLevel::Info,
            format: LogFormat::Console,
            use_color: false,
            with_location: false,
            target: LogTarget::Stderr,
            shared_fields: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Logger whose level, format and colour follow the configuration
    pub fn with_config(component: impl Into<String>, config: &Config) -> Self {
        Self {
            min_level: LogLevel::for_config(config),
            format: LogFormat::for_config(config),
            use_color: config.enable_color,
            with_location: config.debug,
            ..Self::new(component)
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Send rendered lines to memory; returns the shared buffer
    pub fn capturing(mut self) -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        self.target = LogTarget::Capture(lines.clone());
        (self, lines)
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Stamp a field on every later entry of this logger
    pub async fn set_shared_field<T: Serialize>(&self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.shared_fields.write().await.insert(key.to_string(), value);
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        LogEntryBuilder {
            logger: self,
            entry: LogEntry {
                timestamp: Utc::now(),
                level,
                component: self.component.clone(),
                message: message.to_string(),
                run_id: None,
                fields: BTreeMap::new(),
                location: None,
            },
        }
    }

    pub fn debug(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    async fn emit(&self, mut entry: LogEntry) {
        if !self.enabled(entry.level) {
            return;
        }

        for (key, value) in self.shared_fields.read().await.iter() {
            entry.fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if !self.with_location {
            entry.location = None;
        }

        let line = self.render(&entry);
        match &self.target {
            LogTarget::Stderr => {
                let _ = writeln!(std::io::stderr(), "{}", line);
            }
            LogTarget::Capture(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }
            }
        }
    }

    fn render(&self, entry: &LogEntry) -> String {
        match self.format {
            LogFormat::Json => serde_json::to_string(entry)
                .unwrap_or_else(|e| format!("{{\"message\":\"unserializable log entry: {}\"}}", e)),
            LogFormat::Compact => format!(
                "{} {} {}: {}",
                entry.timestamp.format("%H:%M:%S"),
                &entry.level.label()[..1],
                entry.component,
                entry.message
            ),
            LogFormat::Console => self.render_console(entry),
        }
    }

    fn render_console(&self, entry: &LogEntry) -> String {
        let level = format!("{:>5}", entry.level.label());
        let level = if self.use_color {
            level.color(entry.level.color()).to_string()
        } else {
            level
        };

        let mut line = format!(
            "{} {} [{}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            entry.component,
            entry.message
        );

        if let Some(run_id) = &entry.run_id {
            line.push_str(&format!(" [{}]", run_id.get(..8).unwrap_or(run_id)));
        }
        if !entry.fields.is_empty() {
            let fields: Vec<String> = entry.fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            line.push_str(&format!(" {{{}}}", fields.join(", ")));
        }
        if let Some(location) = &entry.location {
            line.push_str(&format!(" @ {}", location));
        }

        line
    }
}

pub struct LogEntryBuilder<'a> {
    logger: &'a Logger,
    entry: LogEntry,
}

impl LogEntryBuilder<'_> {
    /// Tie the entry to one test run or request
    pub fn run_id(mut self, id: &str) -> Self {
        self.entry.run_id = Some(id.to_string());
        self
    }

    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.entry.fields.insert(key.to_string(), value);
        }
        self
    }

    pub fn location(mut self, file: &str, line: u32) -> Self {
        self.entry.location = Some(format!("{}:{}", file, line));
        self
    }

    /// Headline numbers of a probe result
    pub fn probe(self, result: &ProbeResult) -> Self {
        let builder = self
            .field("probe", result.kind)
            .field("status", result.status)
            .field("mean", result.mean)
            .field("samples", result.sample_count)
            .field("failed", result.failed_count);

        match &result.transfer {
            Some(transfer) => builder
                .field("bytes", transfer.bytes_transferred)
                .field("measured_bytes", transfer.measured_bytes)
                .field("elapsed_s", transfer.elapsed_seconds),
            None => builder.field("jitter", result.stddev).field("loss", result.packet_loss),
        }
    }

    pub fn error_info(self, error: &AppError) -> Self {
        self.field("error_category", error.category())
            .field("error_recoverable", error.is_recoverable())
            .field("hard_fault", error.is_hard_fault())
    }

    pub async fn log(self) {
        self.logger.emit(self.entry).await;
    }
}

/// Phase, probe and sample events of test runs
pub struct MeasurementLogger {
    logger: Logger,
}

impl MeasurementLogger {
    pub fn new(config: &Config) -> Self {
        Self::from_logger(Logger::with_config("MEASURE", config))
    }

    pub fn from_logger(logger: Logger) -> Self {
        Self { logger }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub async fn log_phase(&self, run_id: &str, phase: TestPhase, progress_percent: u8) {
        self.logger
            .info(&format!("{} ({}%)", phase.status_text(), progress_percent))
            .run_id(run_id)
            .field("phase", phase)
            .log()
            .await;
    }

    /// Complete probes log at Info, anything else at Warn
    pub async fn log_probe_result(&self, run_id: &str, result: &ProbeResult) {
        let level = if result.is_complete() { LogLevel::Info } else { LogLevel::Warn };
        let message = match (&result.error, result.mean) {
            (Some(error), _) => format!("{} {:?}: {}", result.kind, result.status, error),
            (None, Some(mean)) => format!("{} {:?}: {:.3} {}", result.kind, result.status, mean, result.kind.sample_unit()),
            (None, None) => format!("{} {:?}", result.kind, result.status),
        };

        self.logger.log(level, &message).run_id(run_id).probe(result).log().await;
    }

    pub async fn log_sample_failure(&self, kind: ProbeKind, sequence: u32, error: &AppError) {
        self.logger
            .debug(&format!("{} sample #{} failed: {}", kind, sequence, error))
            .field("sequence", sequence)
            .error_info(error)
            .log()
            .await;
    }

    pub async fn log_report(&self, report: &SpeedTestReport) {
        self.logger
            .info(&format!("Run finished {:?} after {:.2}s", report.status, report.duration_seconds))
            .run_id(&report.id.to_string())
            .field("status", report.status)
            .field("error", report.error.as_deref())
            .log()
            .await;
    }
}

/// Errors with the context they happened in
pub struct ErrorEventLogger {
    logger: Logger,
}

impl ErrorEventLogger {
    pub fn new(config: &Config) -> Self {
        Self { logger: Logger::with_config("ERR", config) }
    }

    pub async fn log_error(&self, error: &AppError, context: Option<&str>, run_id: Option<&str>) {
        let message = match context {
            Some(context) => format!("{}: {}", context, error),
            None => error.to_string(),
        };

        let mut builder = self.logger.error(&message).error_info(error);
        if let Some(id) = run_id {
            builder = builder.run_id(id);
        }
        builder.log().await;
    }
}

/// Hands out loggers stamped with one session id
pub struct LoggerFactory {
    config: Config,
    session_id: String,
}

impl LoggerFactory {
    pub fn new(config: Config) -> Self {
        Self { config, session_id: Uuid::new_v4().to_string() }
    }

    pub async fn create_logger(&self, component: &str) -> Logger {
        let logger = Logger::with_config(component, &self.config);
        logger.set_shared_field("session", &self.session_id).await;
        logger
    }

    pub async fn create_measurement_logger(&self) -> MeasurementLogger {
        MeasurementLogger::from_logger(self.create_logger("MEASURE").await)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($method:ident, $logger:expr, $($arg:tt)*) => {
        $logger.$method(&format!($($arg)*))
            .location(file!(), line!())
            .log()
            .await
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => { $crate::__log_at!(debug, $logger, $($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => { $crate::__log_at!(info, $logger, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => { $crate::__log_at!(warn, $logger, $($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => { $crate::__log_at!(error, $logger, $($arg)*) };
}
