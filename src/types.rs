//! Type definitions shared across the engine, server and formatter

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used types
pub use crate::error::{AppError, Result};

/// Which measurement a probe result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeKind {
    Ping,
    Download,
    Upload,
}

impl ProbeKind {
    /// Unit of the values recorded in this probe's samples
    pub fn sample_unit(&self) -> &'static str {
        match self {
            ProbeKind::Ping => "ms",
            ProbeKind::Download | ProbeKind::Upload => "bits/s",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Ping => write!(f, "ping"),
            ProbeKind::Download => write!(f, "download"),
            ProbeKind::Upload => write!(f, "upload"),
        }
    }
}

/// Outcome of a single probe phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    /// Phase ran to completion and produced a measurement
    Complete,
    /// Phase ran but could not produce a trustworthy measurement
    Failed,
    /// Phase stopped early at the caller's request
    Cancelled,
}

/// Outcome of a whole test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    /// Every phase completed
    Complete,
    /// At least one phase completed and at least one did not
    PartialFailure,
    /// No phase completed, or a hard transport fault ended the run
    Failed,
    /// The run was cancelled before finishing
    Cancelled,
}

/// Orchestration phase of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestPhase {
    Idle,
    Ping,
    Download,
    Upload,
    Complete,
    Failed,
    Cancelled,
}

impl TestPhase {
    /// Progress shown to the user on entering this phase; terminal
    /// failure states keep whatever was reached before
    pub fn progress_percent(&self) -> Option<u8> {
        match self {
            TestPhase::Idle => Some(0),
            TestPhase::Ping => Some(20),
            TestPhase::Download => Some(50),
            TestPhase::Upload => Some(80),
            TestPhase::Complete => Some(100),
            TestPhase::Failed | TestPhase::Cancelled => None,
        }
    }

    /// Whether the run is over once this phase is reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestPhase::Complete | TestPhase::Failed | TestPhase::Cancelled)
    }

    /// Status line for progress displays
    pub fn status_text(&self) -> &'static str {
        match self {
            TestPhase::Idle => "Ready to test",
            TestPhase::Ping => "Testing ping...",
            TestPhase::Download => "Testing download speed...",
            TestPhase::Upload => "Testing upload speed...",
            TestPhase::Complete => "Test complete!",
            TestPhase::Failed => "Test failed",
            TestPhase::Cancelled => "Test cancelled",
        }
    }
}

impl From<ProbeKind> for TestPhase {
    fn from(kind: ProbeKind) -> Self {
        match kind {
            ProbeKind::Ping => TestPhase::Ping,
            ProbeKind::Download => TestPhase::Download,
            ProbeKind::Upload => TestPhase::Upload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_follows_phase_order() {
        let order = [TestPhase::Idle, TestPhase::Ping, TestPhase::Download, TestPhase::Upload, TestPhase::Complete];
        let percents: Vec<u8> = order.iter().filter_map(|p| p.progress_percent()).collect();
        assert_eq!(percents, vec![0, 20, 50, 80, 100]);
        assert!(TestPhase::Failed.progress_percent().is_none());
    }

    #[test]
    fn test_terminal_phases() {
        assert!(TestPhase::Complete.is_terminal());
        assert!(TestPhase::Failed.is_terminal());
        assert!(TestPhase::Cancelled.is_terminal());
        assert!(!TestPhase::Download.is_terminal());
    }

    #[test]
    fn test_status_serializes_verbatim() {
        assert_eq!(serde_json::to_string(&ProbeStatus::Failed).unwrap(), "\"Failed\"");
        assert_eq!(serde_json::to_string(&ReportStatus::PartialFailure).unwrap(), "\"PartialFailure\"");
    }
}
