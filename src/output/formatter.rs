//! Core formatting traits and implementations
//!
//! This module defines the output formatting interface, the unit
//! conversions shared by every renderer, and a plain text implementation
//! with table formatting capabilities.

use crate::{
    error::{AppError, Result},
    executor::ProgressEvent,
    models::{ProbeResult, SpeedTestReport},
    types::{ProbeKind, ProbeStatus},
};
use super::colored::QualityRating;
use std::fmt::Write as _;

/// Main trait for output formatting
pub trait OutputFormatter {
    /// Format a header section
    fn format_header(&self, title: &str) -> Result<String>;

    /// Format the run summary lines above the results table
    fn format_run_summary(&self, report: &SpeedTestReport) -> Result<String>;

    /// Format the three phases as a table
    fn format_results_table(&self, report: &SpeedTestReport) -> Result<String>;

    /// Format sample counts, spread and transfer diagnostics of one phase
    fn format_phase_details(&self, result: &ProbeResult) -> Result<String>;

    /// Format a progress line
    fn format_progress(&self, event: &ProgressEvent) -> Result<String>;

    /// Format error messages
    fn format_error(&self, error: &str) -> Result<String>;

    /// Format warning messages
    fn format_warning(&self, warning: &str) -> Result<String>;
}

/// Configuration options for formatting
#[derive(Debug, Clone)]
pub struct FormattingOptions {
    /// Enable colored output
    pub enable_color: bool,
    /// Enable verbose mode with per-phase details
    pub verbose_mode: bool,
    /// Show table borders
    pub table_borders: bool,
    /// Maximum width of a table cell
    pub max_cell_width: usize,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            enable_color: true,
            verbose_mode: false,
            table_borders: true,
            max_cell_width: 48,
        }
    }
}

/// Text alignment options
#[derive(Debug, Clone, Copy)]
pub enum Alignment {
    Left,
    Right,
}

/// Column definition for table formatting
#[derive(Debug, Clone)]
pub struct Column {
    pub header: &'static str,
    pub alignment: Alignment,
}

/// Row data for table formatting
pub type RowData = Vec<String>;

pub(crate) const RESULT_COLUMNS: [Column; 4] = [
    Column { header: "Phase", alignment: Alignment::Left },
    Column { header: "Result", alignment: Alignment::Right },
    Column { header: "Detail", alignment: Alignment::Left },
    Column { header: "Quality", alignment: Alignment::Left },
];

/// Throughput in decimal units: Gbps and Mbps with two decimals, Kbps and
/// bps with none
pub fn format_bits_per_sec(bits_per_sec: f64) -> String {
    if bits_per_sec >= 1_000_000_000.0 {
        format!("{:.2} Gbps", bits_per_sec / 1_000_000_000.0)
    } else if bits_per_sec >= 1_000_000.0 {
        format!("{:.2} Mbps", bits_per_sec / 1_000_000.0)
    } else if bits_per_sec >= 1_000.0 {
        format!("{:.0} Kbps", bits_per_sec / 1_000.0)
    } else {
        format!("{:.0} bps", bits_per_sec)
    }
}

/// Latency in milliseconds; sub-10ms values keep two decimals so loopback
/// measurements do not print as zero
pub fn format_latency_ms(latency_ms: f64) -> String {
    if latency_ms >= 10.0 {
        format!("{:.0} ms", latency_ms)
    } else {
        format!("{:.2} ms", latency_ms)
    }
}

/// Byte counts in binary units
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let value = bytes as f64;
    if value >= KIB * KIB * KIB {
        format!("{:.2} GiB", value / (KIB * KIB * KIB))
    } else if value >= KIB * KIB {
        format!("{:.2} MiB", value / (KIB * KIB))
    } else if value >= KIB {
        format!("{:.1} KiB", value / KIB)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in human-readable format
pub fn format_duration(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.0}ms", seconds * 1000.0)
    } else if seconds < 60.0 {
        format!("{:.2}s", seconds)
    } else {
        let minutes = (seconds / 60.0) as u32;
        format!("{}m{:.1}s", minutes, seconds % 60.0)
    }
}

/// Format a 0..=1 ratio as a percentage
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Headline value of a phase, or why there is none
pub fn phase_value(result: Option<&ProbeResult>) -> String {
    let result = match result {
        Some(result) => result,
        None => return "not run".to_string(),
    };

    match (result.status, result.mean) {
        (ProbeStatus::Failed, _) => "failed".to_string(),
        (ProbeStatus::Cancelled, None) => "cancelled".to_string(),
        (_, None) => "n/a".to_string(),
        (_, Some(mean)) => match result.kind {
            ProbeKind::Ping => format_latency_ms(mean),
            ProbeKind::Download | ProbeKind::Upload => format_bits_per_sec(mean),
        },
    }
}

/// Secondary information shown next to the headline value
pub fn phase_detail(result: Option<&ProbeResult>) -> String {
    let result = match result {
        Some(result) => result,
        None => return String::new(),
    };

    if let Some(error) = &result.error {
        return error.clone();
    }

    match result.kind {
        ProbeKind::Ping => {
            let jitter = result.jitter().map(format_latency_ms).unwrap_or_else(|| "n/a".to_string());
            let loss = result.packet_loss.map(format_ratio).unwrap_or_else(|| "n/a".to_string());
            format!("jitter {}, loss {}", jitter, loss)
        }
        ProbeKind::Download | ProbeKind::Upload => match &result.transfer {
            Some(transfer) => format!(
                "{} in {}",
                format_bytes(transfer.measured_bytes),
                format_duration(transfer.elapsed_seconds)
            ),
            None => String::new(),
        },
    }
}

/// The three result rows in phase order
pub(crate) fn result_rows(report: &SpeedTestReport) -> Vec<(ProbeKind, RowData)> {
    [
        (ProbeKind::Ping, report.ping.as_ref()),
        (ProbeKind::Download, report.download.as_ref()),
        (ProbeKind::Upload, report.upload.as_ref()),
    ]
    .into_iter()
    .map(|(kind, result)| {
        let row = vec![
            phase_name(kind).to_string(),
            phase_value(result),
            phase_detail(result),
            QualityRating::for_phase(kind, result).description().to_string(),
        ];
        (kind, row)
    })
    .collect()
}

pub(crate) fn phase_name(kind: ProbeKind) -> &'static str {
    match kind {
        ProbeKind::Ping => "Ping",
        ProbeKind::Download => "Download",
        ProbeKind::Upload => "Upload",
    }
}

fn fmt_err(context: &str) -> impl Fn(std::fmt::Error) -> AppError + '_ {
    move |e| AppError::io(format!("Failed to format {}: {}", context, e))
}

/// Plain text formatter implementation
pub struct PlainFormatter {
    options: FormattingOptions,
}

impl PlainFormatter {
    /// Create a new plain formatter with options
    pub fn new(options: FormattingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FormattingOptions {
        &self.options
    }

    /// Create a table from column definitions and rows
    pub(crate) fn create_table(&self, columns: &[Column], rows: &[RowData]) -> String {
        if rows.is_empty() {
            return String::new();
        }

        let widths = self.calculate_column_widths(columns, rows);
        let borders = self.options.table_borders;
        let mut output = String::new();

        let headers: RowData = columns.iter().map(|c| c.header.to_string()).collect();
        if borders {
            output.push_str(&self.create_horizontal_border(&widths));
            output.push('\n');
        }
        output.push_str(&self.create_row(&headers, &widths, columns));
        output.push('\n');
        if borders {
            output.push_str(&self.create_horizontal_border(&widths));
            output.push('\n');
        }

        for row in rows {
            output.push_str(&self.create_row(row, &widths, columns));
            output.push('\n');
        }

        if borders {
            output.push_str(&self.create_horizontal_border(&widths));
        }

        output.trim_end().to_string()
    }

    fn calculate_column_widths(&self, columns: &[Column], rows: &[RowData]) -> Vec<usize> {
        columns.iter()
            .enumerate()
            .map(|(idx, column)| {
                rows.iter()
                    .filter_map(|row| row.get(idx))
                    .map(|cell| cell.chars().count())
                    .fold(column.header.len(), usize::max)
                    .min(self.options.max_cell_width)
            })
            .collect()
    }

    fn create_row(&self, data: &[String], widths: &[usize], columns: &[Column]) -> String {
        let borders = self.options.table_borders;
        let mut row = String::new();

        if borders {
            row.push('|');
        }

        for ((cell, &width), column) in data.iter().zip(widths).zip(columns) {
            if borders {
                row.push(' ');
            }
            row.push_str(&align_text(cell, width, column.alignment));
            if borders {
                row.push_str(" |");
            } else {
                row.push_str("  ");
            }
        }

        row.trim_end().to_string()
    }

    fn create_horizontal_border(&self, widths: &[usize]) -> String {
        let mut border = String::from("+");
        for &width in widths {
            border.push_str(&"-".repeat(width + 2));
            border.push('+');
        }
        border
    }
}

/// Pad or cut `text` to exactly `width` characters
pub(crate) fn align_text(text: &str, width: usize, alignment: Alignment) -> String {
    let len = text.chars().count();
    if len > width {
        let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        return cut;
    }

    let padding = " ".repeat(width - len);
    match alignment {
        Alignment::Left => format!("{}{}", text, padding),
        Alignment::Right => format!("{}{}", padding, text),
    }
}

impl OutputFormatter for PlainFormatter {
    fn format_header(&self, title: &str) -> Result<String> {
        let mut output = String::new();
        let border = "=".repeat(title.len() + 4);

        writeln!(output, "{}", border).map_err(fmt_err("header"))?;
        writeln!(output, "  {}  ", title).map_err(fmt_err("header"))?;
        write!(output, "{}", border).map_err(fmt_err("header"))?;

        Ok(output)
    }

    fn format_run_summary(&self, report: &SpeedTestReport) -> Result<String> {
        let mut output = String::new();

        writeln!(output, "Run:       {}", report.id).map_err(fmt_err("summary"))?;
        writeln!(output, "Status:    {:?}", report.status).map_err(fmt_err("summary"))?;
        write!(output, "Duration:  {}", format_duration(report.duration_seconds)).map_err(fmt_err("summary"))?;
        if let Some(error) = &report.error {
            write!(output, "\nError:     {}", error).map_err(fmt_err("summary"))?;
        }

        Ok(output)
    }

    fn format_results_table(&self, report: &SpeedTestReport) -> Result<String> {
        let rows: Vec<RowData> = result_rows(report).into_iter().map(|(_, row)| row).collect();
        Ok(self.create_table(&RESULT_COLUMNS, &rows))
    }

    fn format_phase_details(&self, result: &ProbeResult) -> Result<String> {
        let mut output = String::new();
        let name = phase_name(result.kind);
        let unit = result.kind.sample_unit();

        writeln!(output, "{} details:", name).map_err(fmt_err("details"))?;
        write!(
            output,
            "  samples {} ok / {} failed / {} attempted",
            result.sample_count, result.failed_count, result.attempted_count
        ).map_err(fmt_err("details"))?;

        if let (Some(min), Some(max), Some(stddev)) = (result.min, result.max, result.stddev) {
            write!(output, "\n  min {:.3} {unit}, max {:.3} {unit}, stddev {:.3} {unit}", min, max, stddev)
                .map_err(fmt_err("details"))?;
        }

        if let Some(transfer) = &result.transfer {
            write!(
                output,
                "\n  transferred {} of {} ({} warm-up, {} chunks of {})",
                format_bytes(transfer.bytes_transferred),
                format_bytes(transfer.requested_bytes),
                format_bytes(transfer.warmup_bytes),
                transfer.chunks_transferred,
                format_bytes(transfer.chunk_bytes)
            ).map_err(fmt_err("details"))?;
        }

        if let Some(server) = &result.server_measurement {
            let speed = server.bits_per_second.map(format_bits_per_sec).unwrap_or_else(|| "n/a".to_string());
            write!(output, "\n  server measured {} ({:?})", speed, server.status).map_err(fmt_err("details"))?;
        }

        Ok(output)
    }

    fn format_progress(&self, event: &ProgressEvent) -> Result<String> {
        Ok(format!("[{:>3}%] {}", event.progress_percent, event.phase.status_text()))
    }

    fn format_error(&self, error: &str) -> Result<String> {
        Ok(format!("ERROR: {}", error))
    }

    fn format_warning(&self, warning: &str) -> Result<String> {
        Ok(format!("WARNING: {}", warning))
    }
}
