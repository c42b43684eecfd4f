//! Output formatting and display system
//!
//! Turns a [`SpeedTestReport`] into something a person or a script can
//! read: human units, connection-quality ratings, plain or colored
//! terminal text, and JSON.

mod colored;
mod formatter;

pub use colored::{ColorScheme, ColoredFormatter, QualityRating};
pub use formatter::{
    format_bits_per_sec,
    format_bytes,
    format_duration,
    format_latency_ms,
    phase_detail,
    phase_value,
    Alignment,
    Column,
    FormattingOptions,
    OutputFormatter,
    PlainFormatter,
    RowData,
};

use crate::{
    error::Result,
    executor::ProgressEvent,
    models::{Config, SpeedTestReport},
    types::ProbeKind,
};
use serde::Serialize;

/// Output formatting factory for creating appropriate formatters
pub struct OutputFormatterFactory;

impl OutputFormatterFactory {
    /// Create a formatter based on color support and preferences
    pub fn create_formatter(enable_color: bool, verbose: bool) -> Box<dyn OutputFormatter + Send + Sync> {
        let options = FormattingOptions {
            enable_color,
            verbose_mode: verbose,
            ..Default::default()
        };

        if enable_color {
            Box::new(ColoredFormatter::new(options))
        } else {
            Box::new(PlainFormatter::new(options))
        }
    }

    /// Create a plain text formatter for scripts/logs
    pub fn create_plain_formatter() -> Box<dyn OutputFormatter + Send + Sync> {
        Self::create_formatter(false, false)
    }
}

/// Human-readable values that accompany the raw report in JSON output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub ping: String,
    pub jitter: Option<String>,
    pub download: String,
    pub upload: String,
    pub ping_quality: QualityRating,
    pub download_quality: QualityRating,
    pub upload_quality: QualityRating,
}

impl ReportSummary {
    pub fn from_report(report: &SpeedTestReport) -> Self {
        Self {
            ping: phase_value(report.ping.as_ref()),
            jitter: report.ping.as_ref().and_then(|p| p.jitter()).map(format_latency_ms),
            download: phase_value(report.download.as_ref()),
            upload: phase_value(report.upload.as_ref()),
            ping_quality: QualityRating::for_phase(ProbeKind::Ping, report.ping.as_ref()),
            download_quality: QualityRating::for_phase(ProbeKind::Download, report.download.as_ref()),
            upload_quality: QualityRating::for_phase(ProbeKind::Upload, report.upload.as_ref()),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    report: &'a SpeedTestReport,
    summary: ReportSummary,
}

/// Render the report and its formatted summary as pretty JSON
pub fn render_json(report: &SpeedTestReport) -> Result<String> {
    let document = JsonReport {
        report,
        summary: ReportSummary::from_report(report),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Main output coordinator that handles all result display
pub struct OutputCoordinator {
    formatter: Box<dyn OutputFormatter + Send + Sync>,
    verbose: bool,
    json: bool,
}

impl OutputCoordinator {
    /// Create a new output coordinator with the specified formatter
    pub fn new(formatter: Box<dyn OutputFormatter + Send + Sync>) -> Self {
        Self {
            formatter,
            verbose: false,
            json: false,
        }
    }

    /// Formatter, verbosity and JSON mode taken from the configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            formatter: OutputFormatterFactory::create_formatter(config.enable_color, config.verbose),
            verbose: config.verbose || config.debug,
            json: config.json,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    /// Display the complete report
    pub fn display_report(&self, report: &SpeedTestReport) -> Result<String> {
        if self.json {
            return render_json(report);
        }

        let mut output = String::new();

        output.push_str(&self.formatter.format_header("Network Speed Test Results")?);
        output.push_str("\n\n");

        output.push_str(&self.formatter.format_run_summary(report)?);
        output.push_str("\n\n");

        output.push_str(&self.formatter.format_results_table(report)?);

        if self.verbose {
            for phase in report.phases() {
                output.push_str("\n\n");
                output.push_str(&self.formatter.format_phase_details(phase)?);
            }
        }

        Ok(output)
    }

    /// Progress line for a transition; nothing in JSON mode
    pub fn display_progress(&self, event: &ProgressEvent) -> Result<Option<String>> {
        if self.json {
            return Ok(None);
        }
        self.formatter.format_progress(event).map(Some)
    }

    pub fn display_error(&self, error: &str) -> Result<String> {
        self.formatter.format_error(error)
    }

    pub fn display_warning(&self, warning: &str) -> Result<String> {
        self.formatter.format_warning(warning)
    }
}
