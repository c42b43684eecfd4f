//! Error taxonomy shared by the client engine, the server and the CLI
//!
//! Inside a probe, transport and timeout errors become `Failed` results. They
//! only surface as `Err` when a phase cannot start at all (see
//! [`AppError::is_hard_fault`]) or outside of measurements (config, bind, I/O).

use colored::{Color, Colorize};
use std::io::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server could not be reached at all (refused, unresolvable, unroutable)
    #[error("Connection error: {0}")]
    Connect(String),

    /// An established exchange broke: reset, truncated stream, 5xx
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Malformed request, e.g. a negative byte count
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    /// Nothing measurable was collected
    #[error("Measurement error: {0}")]
    Measurement(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

macro_rules! constructors {
    ($($name:ident => $variant:ident),* $(,)?) => {
        $(
            pub fn $name(message: impl Into<String>) -> Self {
                Self::$variant(message.into())
            }
        )*
    };
}

impl AppError {
    constructors! {
        config => Config,
        connect => Connect,
        transport => Transport,
        timeout => Timeout,
        protocol => Protocol,
        validation => Validation,
        io => Io,
        parse => Parse,
        measurement => Measurement,
        internal => Internal,
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Connect(_) => "CONNECT",
            Self::Transport(_) => "TRANSPORT",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol(_) => "PROTOCOL",
            Self::Validation(_) => "VALIDATION",
            Self::Io(_) => "IO",
            Self::Parse(_) => "PARSE",
            Self::Measurement(_) => "MEASUREMENT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Config(m)
            | Self::Connect(m)
            | Self::Transport(m)
            | Self::Timeout(m)
            | Self::Protocol(m)
            | Self::Validation(m)
            | Self::Io(m)
            | Self::Parse(m)
            | Self::Measurement(m)
            | Self::Internal(m) => m,
        }
    }

    /// Same category, rewritten message
    pub fn map_message(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Self::Config(m) => Self::Config(f(m)),
            Self::Connect(m) => Self::Connect(f(m)),
            Self::Transport(m) => Self::Transport(f(m)),
            Self::Timeout(m) => Self::Timeout(f(m)),
            Self::Protocol(m) => Self::Protocol(f(m)),
            Self::Validation(m) => Self::Validation(f(m)),
            Self::Io(m) => Self::Io(f(m)),
            Self::Parse(m) => Self::Parse(f(m)),
            Self::Measurement(m) => Self::Measurement(f(m)),
            Self::Internal(m) => Self::Internal(f(m)),
        }
    }

    /// A hard fault ends the whole test run instead of just the current phase
    pub fn is_hard_fault(&self) -> bool {
        matches!(self, Self::Connect(_))
    }

    /// Whether running the test again might succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Transport(_) | Self::Timeout(_) | Self::Io(_))
    }

    /// Errors the client caused; everything else is reported as a server fault
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Validation(_) | Self::Parse(_))
    }

    /// HTTP status the server answers with
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Parse(_) => 1,
            Self::Connect(_) | Self::Transport(_) => 2,
            Self::Timeout(_) => 3,
            Self::Protocol(_) => 4,
            Self::Io(_) => 5,
            Self::Measurement(_) => 6,
            Self::Internal(_) => 99,
        }
    }

    /// What to try next, shown by the CLI in verbose mode
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Validation(_) => {
                "Check your .env file, environment variables and command line arguments (see --env-help)."
            }
            Self::Connect(_) => {
                "Check that the server is running (nst --serve) and that --server points at it."
            }
            Self::Transport(_) => "The connection broke mid-transfer. Try again or use smaller transfer sizes.",
            Self::Timeout(_) => "Increase --phase-timeout or reduce --download-bytes/--upload-bytes.",
            Self::Protocol(_) => "Byte counts must be positive and within the server limit.",
            Self::Io(_) => "Check that the bind address is free and that files are writable.",
            Self::Parse(_) => "Check the format of the value named above.",
            Self::Measurement(_) => "No data was transferred inside the measurement window.",
            Self::Internal(_) => "This is likely a bug. Please report it with the output above.",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        format!("{}\n\nSuggestion: {}", self, self.suggestion())
    }

    fn console_color(&self) -> Color {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::Parse(_) | Self::Protocol(_) => Color::Red,
            Self::Connect(_) | Self::Transport(_) => Color::Yellow,
            Self::Timeout(_) => Color::Blue,
            Self::Io(_) | Self::Measurement(_) => Color::Cyan,
            Self::Internal(_) => Color::BrightRed,
        }
    }

    /// `[CATEGORY] message`, coloured by category when enabled
    pub fn format_for_console(&self, use_color: bool) -> String {
        let text = self.to_string();
        if !use_color {
            return format!("[{}] {}", self.category(), text);
        }
        let color = self.console_color();
        format!("[{}] {}", self.category().color(color).bold(), text.color(color))
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        let message = error.to_string();
        match error.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::AddrNotAvailable => Self::Connect(message),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::Transport(message),
            ErrorKind::TimedOut => Self::Timeout(message),
            _ => Self::Io(message),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        let message = error.to_string();
        if error.is_timeout() {
            Self::Timeout(message)
        } else if error.is_connect() {
            Self::Connect(message)
        } else if error.is_status() {
            Self::Protocol(message)
        } else {
            // body, decode and request errors all mean the exchange broke
            Self::Transport(message)
        }
    }
}

impl From<url::ParseError> for AppError {
    fn from(error: url::ParseError) -> Self {
        Self::Parse(format!("URL parse error: {}", error))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(format!("JSON parse error: {}", error))
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::Config(format!("Environment file error: {}", error))
    }
}

impl From<std::num::ParseIntError> for AppError {
    fn from(error: std::num::ParseIntError) -> Self {
        Self::Parse(format!("Integer parse error: {}", error))
    }
}

impl From<std::str::ParseBoolError> for AppError {
    fn from(error: std::str::ParseBoolError) -> Self {
        Self::Parse(format!("Boolean parse error: {}", error))
    }
}

impl From<std::net::AddrParseError> for AppError {
    fn from(error: std::net::AddrParseError) -> Self {
        Self::Parse(format!("Socket address parse error: {}", error))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", error))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Prefix an error with what was being attempted, keeping its category
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    fn context(self, message: &'static str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().map_message(|message| format!("{}: {}", f(), message)))
    }

    fn context(self, message: &'static str) -> Result<T> {
        self.with_context(|| message.to_string())
    }
}

/// Prints fatal CLI errors to stderr
pub struct ErrorReporter {
    pub use_color: bool,
    pub verbose: bool,
}

impl ErrorReporter {
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    /// The console line, plus the suggestion and a retry hint in verbose mode
    pub fn render(&self, error: &AppError) -> String {
        let mut out = error.format_for_console(self.use_color);
        if !self.verbose {
            return out;
        }

        out.push_str("\n\nSuggestion: ");
        out.push_str(error.suggestion());
        if error.is_recoverable() {
            let hint = "This error might be temporary. You can try running the test again.";
            out.push_str("\n\n");
            if self.use_color {
                out.push_str(&hint.green().to_string());
            } else {
                out.push_str(hint);
            }
        }
        out
    }

    pub fn report_error(&self, error: &AppError) {
        eprintln!("{}", self.render(error));
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}
