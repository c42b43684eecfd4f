//! Test orchestration
//!
//! A run moves through `Idle -> Ping -> Download -> Upload -> Complete`.
//! A phase that fails is recorded and the run moves on; a hard transport
//! fault ends the run as `Failed` at once; cancellation ends it as
//! `Cancelled` with whatever was gathered. Every transition is announced
//! once on the progress channel.

pub mod cancel;

pub use cancel::CancelHandle;

use crate::{
    client::ProbeTransport,
    error::{AppError, Result},
    logging::MeasurementLogger,
    models::{Config, ProbeResult, SpeedTestReport},
    payload::PayloadPool,
    probe::{LatencyProber, ThroughputMeter},
    types::{ProbeKind, ProbeStatus, ReportStatus, TestPhase},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use uuid::Uuid;

/// Sizes and timings for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub ping_count: u32,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub download_bytes: u64,
    pub upload_bytes: u64,
    pub chunk_bytes: u64,
    pub phase_timeout: Duration,
}

impl Default for TestPlan {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for TestPlan {
    fn from(config: &Config) -> Self {
        Self {
            ping_count: config.ping_count,
            ping_interval: config.ping_interval(),
            ping_timeout: config.ping_timeout(),
            download_bytes: config.download_bytes,
            upload_bytes: config.upload_bytes,
            chunk_bytes: config.chunk_bytes,
            phase_timeout: config.phase_timeout(),
        }
    }
}

/// Announcement of a state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub phase: TestPhase,
    pub progress_percent: u8,
    pub timestamp: DateTime<Utc>,
}

/// Transient state of a run, owned by the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct TestRunState {
    pub phase: TestPhase,
    pub progress_percent: u8,
    pub cancel_requested: bool,
}

impl TestRunState {
    pub fn new() -> Self {
        Self {
            phase: TestPhase::Idle,
            progress_percent: 0,
            cancel_requested: false,
        }
    }

    /// Move to `phase`; terminal failure states keep the last percentage
    fn transition(&mut self, phase: TestPhase) {
        self.phase = phase;
        if let Some(percent) = phase.progress_percent() {
            self.progress_percent = percent;
        }
        if phase == TestPhase::Cancelled {
            self.cancel_requested = true;
        }
    }
}

impl Default for TestRunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run bookkeeping: state, progress channel and gathered results
struct RunContext {
    id: Uuid,
    state: TestRunState,
    progress: Option<UnboundedSender<ProgressEvent>>,
    ping: Option<ProbeResult>,
    download: Option<ProbeResult>,
    upload: Option<ProbeResult>,
}

impl RunContext {
    fn transition(&mut self, phase: TestPhase) {
        self.state.transition(phase);

        if let Some(sender) = &self.progress {
            let event = ProgressEvent {
                run_id: self.id,
                phase,
                progress_percent: self.state.progress_percent,
                timestamp: Utc::now(),
            };
            // A caller that stopped listening does not stop the run
            if sender.send(event).is_err() {
                self.progress = None;
            }
        }
    }

    fn store(&mut self, result: ProbeResult) {
        match result.kind {
            ProbeKind::Ping => self.ping = Some(result),
            ProbeKind::Download => self.download = Some(result),
            ProbeKind::Upload => self.upload = Some(result),
        }
    }
}

/// Sequences the probes of a speed test and aggregates their results
pub struct TestOrchestrator {
    plan: TestPlan,
    prober: LatencyProber,
    meter: ThroughputMeter,
    logger: Arc<MeasurementLogger>,
}

impl TestOrchestrator {
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        payload: PayloadPool,
        plan: TestPlan,
        logger: Arc<MeasurementLogger>,
    ) -> Self {
        let prober = LatencyProber::new(transport.clone(), plan.ping_timeout, logger.clone());
        let meter = ThroughputMeter::new(transport, payload, plan.phase_timeout, logger.clone());

        Self {
            plan,
            prober,
            meter,
            logger,
        }
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    /// Run ping, download and upload in order and build the report
    pub async fn run(&self, progress: Option<UnboundedSender<ProgressEvent>>, cancel: CancelHandle) -> SpeedTestReport {
        let started = Instant::now();
        let mut run = RunContext {
            id: Uuid::new_v4(),
            state: TestRunState::new(),
            progress,
            ping: None,
            download: None,
            upload: None,
        };
        let run_id = run.id.to_string();

        let mut outcome: Option<(ReportStatus, Option<String>)> = None;

        for kind in [ProbeKind::Ping, ProbeKind::Download, ProbeKind::Upload] {
            if cancel.is_cancelled() {
                run.transition(TestPhase::Cancelled);
                outcome = Some((ReportStatus::Cancelled, None));
                break;
            }

            run.transition(kind.into());
            self.logger.log_phase(&run_id, kind.into(), run.state.progress_percent).await;

            match self.run_phase(kind, &cancel).await {
                Ok(result) => {
                    self.logger.log_probe_result(&run_id, &result).await;
                    let cancelled = result.status == ProbeStatus::Cancelled;
                    run.store(result);

                    if cancelled {
                        run.transition(TestPhase::Cancelled);
                        outcome = Some((ReportStatus::Cancelled, None));
                        break;
                    }
                }
                Err(error) => {
                    let result = ProbeResult::failed(kind, error.to_string());
                    self.logger.log_probe_result(&run_id, &result).await;
                    run.store(result);
                    run.transition(TestPhase::Failed);
                    outcome = Some((ReportStatus::Failed, Some(Self::fatal_message(kind, &error))));
                    break;
                }
            }
        }

        let (status, error) = match outcome {
            Some(outcome) => outcome,
            None => {
                let status = SpeedTestReport::status_from_phases(run.ping.as_ref(), run.download.as_ref(), run.upload.as_ref());
                let phase = if status == ReportStatus::Failed { TestPhase::Failed } else { TestPhase::Complete };
                run.transition(phase);
                (status, None)
            }
        };

        let report = SpeedTestReport {
            id: run.id,
            generated_at: Utc::now(),
            status,
            ping: run.ping,
            download: run.download,
            upload: run.upload,
            error,
            duration_seconds: started.elapsed().as_secs_f64(),
        };

        self.logger.log_report(&report).await;
        report
    }

    async fn run_phase(&self, kind: ProbeKind, cancel: &CancelHandle) -> Result<ProbeResult> {
        match kind {
            ProbeKind::Ping => {
                self.prober.measure_latency(self.plan.ping_count, self.plan.ping_interval, cancel).await
            }
            ProbeKind::Download => {
                self.meter.measure_download(self.plan.download_bytes, self.plan.chunk_bytes, cancel).await
            }
            ProbeKind::Upload => {
                self.meter.measure_upload(self.plan.upload_bytes, self.plan.chunk_bytes, cancel).await
            }
        }
    }

    fn fatal_message(kind: ProbeKind, error: &AppError) -> String {
        if error.is_hard_fault() {
            format!("Run aborted during {} phase: {}", kind, error)
        } else {
            format!("{} phase could not run: {}", kind, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::{RoundTrip, ScriptedTransport, TransferScript};
    use tokio::sync::mpsc;

    const CHUNK: u64 = 65_536;

    fn plan() -> TestPlan {
        TestPlan {
            ping_count: 3,
            ping_interval: Duration::from_millis(50),
            ping_timeout: Duration::from_millis(2000),
            download_bytes: 4 * CHUNK,
            upload_bytes: 4 * CHUNK,
            chunk_bytes: CHUNK,
            phase_timeout: Duration::from_secs(30),
        }
    }

    fn healthy_transport() -> ScriptedTransport {
        ScriptedTransport {
            download: TransferScript::default().delay(1, Duration::from_millis(10)).delay(3, Duration::from_millis(10)),
            upload: TransferScript { finish_delay: Duration::from_millis(20), ..Default::default() },
            ..Default::default()
        }
    }

    fn orchestrator(transport: ScriptedTransport) -> TestOrchestrator {
        let logger = Arc::new(MeasurementLogger::new(&Config::default()));
        TestOrchestrator::new(Arc::new(transport), PayloadPool::init(CHUNK as usize).unwrap(), plan(), logger)
    }

    fn phases(receiver: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<(TestPhase, u8)> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push((event.phase, event.progress_percent));
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_run_emits_each_transition_once() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let report = orchestrator(healthy_transport()).run(Some(sender), CancelHandle::new()).await;

        assert_eq!(report.status, ReportStatus::Complete);
        assert!(report.ping.is_some() && report.download.is_some() && report.upload.is_some());
        assert!(report.error.is_none());
        assert_eq!(phases(&mut receiver), vec![
            (TestPhase::Ping, 20),
            (TestPhase::Download, 50),
            (TestPhase::Upload, 80),
            (TestPhase::Complete, 100),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_failure_continues_to_next_phase() {
        let mut transport = healthy_transport();
        transport.download = TransferScript { reset_after: Some(2), ..Default::default() };

        let report = orchestrator(transport).run(None, CancelHandle::new()).await;

        assert_eq!(report.status, ReportStatus::PartialFailure);
        assert_eq!(report.download.as_ref().unwrap().status, ProbeStatus::Failed);
        assert_eq!(report.upload.as_ref().unwrap().status, ProbeStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_fault_stops_the_run() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let transport = ScriptedTransport::refusing();

        let report = orchestrator(transport).run(Some(sender), CancelHandle::new()).await;

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.ping.as_ref().unwrap().status, ProbeStatus::Failed);
        assert!(report.download.is_none());
        assert!(report.upload.is_none());
        assert!(report.error.unwrap().contains("ping"));
        assert_eq!(phases(&mut receiver), vec![(TestPhase::Ping, 20), (TestPhase::Failed, 20)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_phases_failing_is_failed() {
        let transport = ScriptedTransport {
            round_trips: vec![RoundTrip::Fail],
            fail_downloads: true,
            upload: TransferScript { reset_after: Some(0), ..Default::default() },
            ..Default::default()
        };

        let report = orchestrator(transport).run(None, CancelHandle::new()).await;

        assert_eq!(report.status, ReportStatus::Failed);
        assert_eq!(report.phases().count(), 3);
        assert!(report.phases().all(|p| p.status == ProbeStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let cancel = CancelHandle::new();
        cancel.cancel();

        let report = orchestrator(healthy_transport()).run(Some(sender), cancel).await;

        assert_eq!(report.status, ReportStatus::Cancelled);
        assert_eq!(report.phases().count(), 0);
        assert_eq!(phases(&mut receiver), vec![(TestPhase::Cancelled, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_inside_download_keeps_gathered_results() {
        let cancel = CancelHandle::new();
        let mut transport = healthy_transport();
        transport.download.cancel_during = Some((1, cancel.clone()));

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let report = orchestrator(transport).run(Some(sender), cancel).await;

        assert_eq!(report.status, ReportStatus::Cancelled);
        assert_eq!(report.ping.as_ref().unwrap().status, ProbeStatus::Complete);
        let download = report.download.as_ref().unwrap();
        assert_eq!(download.status, ProbeStatus::Cancelled);
        assert_eq!(download.transfer.as_ref().unwrap().bytes_transferred, 2 * CHUNK);
        assert!(report.upload.is_none());
        assert_eq!(phases(&mut receiver).last(), Some(&(TestPhase::Cancelled, 50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_is_ignored() {
        let (sender, receiver) = mpsc::unbounded_channel();
        drop(receiver);

        let report = orchestrator(healthy_transport()).run(Some(sender), CancelHandle::new()).await;
        assert_eq!(report.status, ReportStatus::Complete);
    }

    #[test]
    fn test_run_state_transitions() {
        let mut state = TestRunState::new();
        state.transition(TestPhase::Download);
        assert_eq!(state.progress_percent, 50);

        state.transition(TestPhase::Cancelled);
        assert_eq!(state.progress_percent, 50);
        assert!(state.cancel_requested);
    }

    #[test]
    fn test_plan_from_config() {
        let config = Config { ping_count: 7, chunk_bytes: 1024, ..Default::default() };
        let plan = TestPlan::from(&config);
        assert_eq!(plan.ping_count, 7);
        assert_eq!(plan.chunk_bytes, 1024);
        assert_eq!(plan.phase_timeout, Duration::from_secs(30));
    }
}
