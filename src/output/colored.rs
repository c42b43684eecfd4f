//! Colored formatter implementation with terminal color support
//!
//! This module provides the connection-quality classification used by
//! every renderer and a colored output formatter built on `colored`.

use crate::{
    error::{AppError, Result},
    executor::ProgressEvent,
    models::{ProbeResult, SpeedTestReport},
    types::{ProbeKind, ReportStatus, TestPhase},
};
use super::formatter::{
    align_text, format_duration, result_rows, FormattingOptions, OutputFormatter, PlainFormatter, RESULT_COLUMNS,
};
use colored::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Connection-quality badge of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityRating {
    /// Ping below 50 ms
    Excellent,
    /// Ping below 100 ms
    Good,
    /// Ping of 100 ms or more
    Poor,
    /// Download above 50 Mbps, upload above 20 Mbps
    Fast,
    /// Download above 10 Mbps, upload above 5 Mbps
    Average,
    Slow,
    /// The phase failed or never ran
    Unavailable,
}

impl QualityRating {
    pub fn from_ping_ms(mean_ms: f64) -> Self {
        if mean_ms < 50.0 {
            Self::Excellent
        } else if mean_ms < 100.0 {
            Self::Good
        } else {
            Self::Poor
        }
    }

    pub fn from_download_bps(bits_per_sec: f64) -> Self {
        Self::from_throughput(bits_per_sec, 50.0, 10.0)
    }

    pub fn from_upload_bps(bits_per_sec: f64) -> Self {
        Self::from_throughput(bits_per_sec, 20.0, 5.0)
    }

    fn from_throughput(bits_per_sec: f64, fast_mbps: f64, average_mbps: f64) -> Self {
        let mbps = bits_per_sec / 1_000_000.0;
        if mbps > fast_mbps {
            Self::Fast
        } else if mbps > average_mbps {
            Self::Average
        } else {
            Self::Slow
        }
    }

    /// Rating of a phase result; only completed phases are rated
    pub fn for_phase(kind: ProbeKind, result: Option<&ProbeResult>) -> Self {
        let mean = match result {
            Some(result) if result.is_complete() => result.mean,
            _ => None,
        };

        match (kind, mean) {
            (_, None) => Self::Unavailable,
            (ProbeKind::Ping, Some(mean)) => Self::from_ping_ms(mean),
            (ProbeKind::Download, Some(mean)) => Self::from_download_bps(mean),
            (ProbeKind::Upload, Some(mean)) => Self::from_upload_bps(mean),
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Self::Excellent | Self::Fast => Color::Green,
            Self::Good | Self::Average => Color::Yellow,
            Self::Poor | Self::Slow => Color::Red,
            Self::Unavailable => Color::BrightBlack,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Poor => "Poor",
            Self::Fast => "Fast",
            Self::Average => "Average",
            Self::Slow => "Slow",
            Self::Unavailable => "Unavailable",
        }
    }
}

/// Color scheme configuration
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub header: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub info: Color,
    pub muted: Color,
    pub border: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            header: Color::Blue,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            info: Color::Cyan,
            muted: Color::BrightBlack,
            border: Color::BrightBlack,
        }
    }
}

/// Colored formatter implementation
pub struct ColoredFormatter {
    plain_formatter: PlainFormatter,
    options: FormattingOptions,
    color_scheme: ColorScheme,
}

impl ColoredFormatter {
    /// Create a new colored formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self::with_color_scheme(options, ColorScheme::default())
    }

    /// Create a colored formatter with custom color scheme
    pub fn with_color_scheme(options: FormattingOptions, color_scheme: ColorScheme) -> Self {
        Self {
            plain_formatter: PlainFormatter::new(options.clone()),
            options,
            color_scheme,
        }
    }

    /// Apply color to text if colors are enabled
    fn colorize(&self, text: &str, color: Color) -> ColoredString {
        if self.options.enable_color {
            text.color(color)
        } else {
            text.normal()
        }
    }

    /// Apply bold formatting if colors are enabled
    fn bold(&self, text: &str) -> ColoredString {
        if self.options.enable_color {
            text.bold()
        } else {
            text.normal()
        }
    }

    /// Bold and colored if colors are enabled
    fn emphasize(&self, text: &str, color: Color) -> ColoredString {
        if self.options.enable_color {
            text.bold().color(color)
        } else {
            text.normal()
        }
    }

    fn status_color(&self, status: ReportStatus) -> Color {
        match status {
            ReportStatus::Complete => self.color_scheme.success,
            ReportStatus::PartialFailure | ReportStatus::Cancelled => self.color_scheme.warning,
            ReportStatus::Failed => self.color_scheme.error,
        }
    }

    fn phase_icon(kind: ProbeKind) -> &'static str {
        match kind {
            ProbeKind::Ping => "📡",
            ProbeKind::Download => "⬇️ ",
            ProbeKind::Upload => "⬆️ ",
        }
    }

    fn progress_bar(&self, percent: u8, width: usize) -> String {
        let filled = (percent.min(100) as usize * width) / 100;
        let empty = width - filled;

        if self.options.enable_color {
            format!("[{}{}]", "█".repeat(filled).color(self.color_scheme.info), "░".repeat(empty).color(self.color_scheme.muted))
        } else {
            format!("[{}{}]", "=".repeat(filled), " ".repeat(empty))
        }
    }
}

impl OutputFormatter for ColoredFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let mut output = String::new();

        let decorated_title = format!("🚀 {}", title);
        let border = "═".repeat(decorated_title.chars().count() + 4);

        writeln!(output, "{}", self.colorize(&border, self.color_scheme.border))
            .map_err(|e| AppError::io(format!("Failed to format header: {}", e)))?;
        writeln!(output, "  {}  ", self.emphasize(&decorated_title, self.color_scheme.header))
            .map_err(|e| AppError::io(format!("Failed to format header: {}", e)))?;
        write!(output, "{}", self.colorize(&border, self.color_scheme.border))
            .map_err(|e| AppError::io(format!("Failed to format header: {}", e)))?;

        Ok(output)
    }

    fn format_run_summary(&self, report: &SpeedTestReport) -> Result<String> {
        let mut output = String::new();
        let status = format!("{:?}", report.status);

        writeln!(output, "🆔 Run:       {}", self.colorize(&report.id.to_string(), self.color_scheme.muted))
            .map_err(|e| AppError::io(format!("Failed to format summary: {}", e)))?;
        writeln!(output, "📋 Status:    {}", self.emphasize(&status, self.status_color(report.status)))
            .map_err(|e| AppError::io(format!("Failed to format summary: {}", e)))?;
        write!(output, "⏱️  Duration:  {}", self.colorize(&format_duration(report.duration_seconds), self.color_scheme.info))
            .map_err(|e| AppError::io(format!("Failed to format summary: {}", e)))?;

        if let Some(error) = &report.error {
            write!(output, "\n❌ Error:     {}", self.colorize(error, self.color_scheme.error))
                .map_err(|e| AppError::io(format!("Failed to format summary: {}", e)))?;
        }

        Ok(output)
    }

    fn format_results_table(&self, report: &SpeedTestReport) -> Result<String> {
        let rows = result_rows(report);
        let width = self.options.max_cell_width;

        let widths: Vec<usize> = RESULT_COLUMNS.iter()
            .enumerate()
            .map(|(idx, column)| {
                rows.iter()
                    .map(|(_, row)| row[idx].chars().count())
                    .fold(column.header.len(), usize::max)
                    .min(width)
            })
            .collect();

        let mut output = String::new();
        let header: Vec<String> = RESULT_COLUMNS.iter()
            .zip(&widths)
            .map(|(column, &w)| align_text(column.header, w, column.alignment))
            .collect();
        let rule = "─".repeat(widths.iter().sum::<usize>() + 3 * widths.len());

        writeln!(output, "   {}", self.bold(&header.join("  ")))
            .map_err(|e| AppError::io(format!("Failed to format table: {}", e)))?;
        writeln!(output, "{}", self.colorize(&rule, self.color_scheme.border))
            .map_err(|e| AppError::io(format!("Failed to format table: {}", e)))?;

        for (kind, row) in &rows {
            let result = match kind {
                ProbeKind::Ping => report.ping.as_ref(),
                ProbeKind::Download => report.download.as_ref(),
                ProbeKind::Upload => report.upload.as_ref(),
            };
            let quality = QualityRating::for_phase(*kind, result);

            let cells: Vec<String> = row.iter()
                .zip(RESULT_COLUMNS.iter().zip(&widths))
                .map(|(cell, (column, &w))| align_text(cell, w, column.alignment))
                .collect();

            writeln!(
                output,
                "{} {}  {}  {}  {}",
                Self::phase_icon(*kind),
                self.bold(&cells[0]),
                self.colorize(&cells[1], quality.color()),
                self.colorize(&cells[2], self.color_scheme.muted),
                self.colorize(&cells[3], quality.color()),
            ).map_err(|e| AppError::io(format!("Failed to format table: {}", e)))?;
        }

        Ok(output.trim_end().to_string())
    }

    fn format_phase_details(&self, result: &ProbeResult) -> Result<String> {
        let details = self.plain_formatter.format_phase_details(result)?;
        let mut lines = details.lines();

        let mut output = String::new();
        if let Some(first) = lines.next() {
            output.push_str(&self.emphasize(first, self.color_scheme.header).to_string());
        }
        for line in lines {
            output.push('\n');
            output.push_str(&self.colorize(line, self.color_scheme.muted).to_string());
        }

        Ok(output)
    }

    fn format_progress(&self, event: &ProgressEvent) -> Result<String> {
        let text = event.phase.status_text();
        let text = match event.phase {
            TestPhase::Complete => self.colorize(text, self.color_scheme.success),
            TestPhase::Failed => self.colorize(text, self.color_scheme.error),
            TestPhase::Cancelled => self.colorize(text, self.color_scheme.warning),
            _ => self.colorize(text, self.color_scheme.info),
        };

        Ok(format!("{} {:>3}% {}", self.progress_bar(event.progress_percent, 20), event.progress_percent, text))
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("❌ {}", self.colorize(error, self.color_scheme.error)))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("⚠️  {}", self.colorize(warning, self.color_scheme.warning)))
    }
}
