//! Round-trip latency and jitter measurement

use crate::client::ProbeTransport;
use crate::error::{AppError, Result};
use crate::executor::CancelHandle;
use crate::logging::MeasurementLogger;
use crate::models::{ProbeResult, Sample};
use crate::types::{ProbeKind, ProbeStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

/// Measures round-trip time with repeated minimal exchanges
pub struct LatencyProber {
    transport: Arc<dyn ProbeTransport>,
    per_sample_timeout: Duration,
    logger: Arc<MeasurementLogger>,
}

impl LatencyProber {
    pub fn new(transport: Arc<dyn ProbeTransport>, per_sample_timeout: Duration, logger: Arc<MeasurementLogger>) -> Self {
        Self {
            transport,
            per_sample_timeout,
            logger,
        }
    }

    /// Run `sample_count` round trips, pausing `inter_sample_delay` between
    /// them.
    ///
    /// A round trip that errors or exceeds the per-sample timeout counts as a
    /// failure and contributes no value. If no round trip succeeds the result
    /// is `Failed`; if every attempt failed because no connection could be
    /// established, the connect error is returned instead.
    pub async fn measure_latency(
        &self,
        sample_count: u32,
        inter_sample_delay: Duration,
        cancel: &CancelHandle,
    ) -> Result<ProbeResult> {
        if sample_count == 0 {
            return Err(AppError::protocol("Latency sample count must be greater than 0"));
        }

        let probe_start = Instant::now();
        let mut samples = Vec::with_capacity(sample_count as usize);
        let mut failed_count = 0u32;
        let mut connect_failures = 0u32;
        let mut last_error: Option<AppError> = None;

        for sequence in 0..sample_count {
            if cancel.is_cancelled() {
                return Ok(ProbeResult::latency(ProbeStatus::Cancelled, samples, failed_count));
            }

            let dispatched = Instant::now();
            let outcome = match timeout(self.per_sample_timeout, self.transport.round_trip()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AppError::timeout(format!(
                    "Round trip exceeded {}ms", self.per_sample_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(()) => {
                    let rtt_ms = dispatched.elapsed().as_secs_f64() * 1000.0;
                    let offset = dispatched.duration_since(probe_start).as_secs_f64();
                    samples.push(Sample::new(sequence, rtt_ms, offset));
                }
                Err(error) => {
                    failed_count += 1;
                    if error.is_hard_fault() {
                        connect_failures += 1;
                    }
                    self.logger.log_sample_failure(ProbeKind::Ping, sequence, &error).await;
                    last_error = Some(error);
                }
            }

            if sequence + 1 < sample_count && !inter_sample_delay.is_zero() {
                tokio::select! {
                    _ = sleep(inter_sample_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        if samples.is_empty() {
            if connect_failures == sample_count {
                return Err(last_error.unwrap_or_else(|| AppError::connect("No connection could be established")));
            }

            let reason = last_error
                .map(|error| format!("All {} round trips failed; last error: {}", sample_count, error))
                .unwrap_or_else(|| format!("All {} round trips failed", sample_count));
            return Ok(ProbeResult::latency(ProbeStatus::Failed, samples, failed_count).with_error(reason));
        }

        Ok(ProbeResult::latency(ProbeStatus::Complete, samples, failed_count))
    }
}
