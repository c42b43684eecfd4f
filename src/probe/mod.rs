//! Latency and throughput probes

pub mod latency;
pub mod throughput;

pub use latency::LatencyProber;
pub use throughput::{ThroughputMeter, TransferOutcome, TransferTally};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport for exercising probes without a network

    use crate::client::{ChunkSink, ChunkSource, ProbeTransport};
    use crate::error::{AppError, Result};
    use crate::executor::CancelHandle;
    use crate::models::ServerMeasurement;
    use crate::types::ProbeStatus;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Behaviour of one round trip
    #[derive(Debug, Clone, Copy)]
    pub enum RoundTrip {
        Reply(Duration),
        Fail,
        Hang,
    }

    /// Behaviour of one transfer direction
    #[derive(Debug, Clone, Default)]
    pub struct TransferScript {
        /// Sleep before the chunk with this index completes
        pub delays: HashMap<u32, Duration>,
        /// Reset the connection once this many chunks went through
        pub reset_after: Option<u32>,
        /// End the stream early after this many chunks
        pub end_after: Option<u32>,
        /// Request cancellation while this chunk is in flight
        pub cancel_during: Option<(u32, CancelHandle)>,
        /// Delay of the final acknowledgement
        pub finish_delay: Duration,
        /// Bytes the server's upload count comes up short by
        pub server_shortfall: u64,
    }

    impl TransferScript {
        pub fn delay(mut self, chunk: u32, delay: Duration) -> Self {
            self.delays.insert(chunk, delay);
            self
        }
    }

    pub struct ScriptedTransport {
        pub round_trips: Vec<RoundTrip>,
        pub download: TransferScript,
        pub upload: TransferScript,
        pub refuse_connections: bool,
        pub fail_downloads: bool,
        pub(crate) calls: AtomicUsize,
    }

    impl Default for ScriptedTransport {
        fn default() -> Self {
            Self {
                round_trips: vec![RoundTrip::Reply(Duration::from_millis(10))],
                download: TransferScript::default(),
                upload: TransferScript::default(),
                refuse_connections: false,
                fail_downloads: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ScriptedTransport {
        pub fn refusing() -> Self {
            Self { refuse_connections: true, ..Default::default() }
        }

        pub fn with_round_trips(round_trips: Vec<RoundTrip>) -> Self {
            Self { round_trips, ..Default::default() }
        }

        pub fn round_trip_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn refused() -> AppError {
            AppError::connect("Connection refused (os error 111)")
        }
    }

    #[async_trait]
    impl ProbeTransport for ScriptedTransport {
        async fn round_trip(&self) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse_connections {
                return Err(Self::refused());
            }

            match self.round_trips[call % self.round_trips.len()] {
                RoundTrip::Reply(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
                RoundTrip::Fail => Err(AppError::transport("connection reset by peer")),
                RoundTrip::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }

        async fn open_download(&self, total_bytes: u64, chunk_bytes: u64) -> Result<Box<dyn ChunkSource>> {
            if self.refuse_connections {
                return Err(Self::refused());
            }
            if self.fail_downloads {
                return Err(AppError::protocol("Server rejected request (400): bytes too large"));
            }

            Ok(Box::new(ScriptedSource {
                script: self.download.clone(),
                remaining: total_bytes,
                chunk_bytes,
                index: 0,
                total_bytes,
            }))
        }

        async fn open_upload(&self, total_bytes: u64, _chunk_bytes: u64) -> Result<Box<dyn ChunkSink>> {
            if self.refuse_connections {
                return Err(Self::refused());
            }

            Ok(Box::new(ScriptedSink {
                script: self.upload.clone(),
                index: 0,
                received: 0,
                expected: total_bytes,
            }))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    struct ScriptedSource {
        script: TransferScript,
        remaining: u64,
        chunk_bytes: u64,
        index: u32,
        total_bytes: u64,
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
            if self.remaining == 0 || self.script.end_after == Some(self.index) {
                return Ok(None);
            }
            if self.script.reset_after == Some(self.index) {
                return Err(AppError::transport("connection reset by peer"));
            }

            if let Some((chunk, handle)) = &self.script.cancel_during {
                if *chunk == self.index {
                    handle.cancel();
                }
            }
            if let Some(delay) = self.script.delays.get(&self.index) {
                tokio::time::sleep(*delay).await;
            }

            let size = self.remaining.min(self.chunk_bytes);
            self.remaining -= size;
            self.index += 1;
            Ok(Some(Bytes::from(vec![0u8; size as usize])))
        }

        async fn finish(&mut self) -> Result<Option<ServerMeasurement>> {
            tokio::time::sleep(self.script.finish_delay).await;
            Ok(Some(ServerMeasurement {
                status: ProbeStatus::Complete,
                bits_per_second: Some(1.0),
                bytes_transferred: self.total_bytes - self.remaining,
                warmup_bytes: self.chunk_bytes,
                elapsed_seconds: 1.0,
                error: None,
            }))
        }
    }

    struct ScriptedSink {
        script: TransferScript,
        index: u32,
        received: u64,
        expected: u64,
    }

    #[async_trait]
    impl ChunkSink for ScriptedSink {
        async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
            if self.script.reset_after == Some(self.index) {
                return Err(AppError::transport("connection reset by peer"));
            }
            if let Some((index, handle)) = &self.script.cancel_during {
                if *index == self.index {
                    handle.cancel();
                }
            }
            if let Some(delay) = self.script.delays.get(&self.index) {
                tokio::time::sleep(*delay).await;
            }

            self.received += chunk.len() as u64;
            self.index += 1;
            Ok(())
        }

        async fn finish(&mut self) -> Result<ServerMeasurement> {
            tokio::time::sleep(self.script.finish_delay).await;
            let counted = self.received.saturating_sub(self.script.server_shortfall);
            let (status, error) = if counted == self.expected {
                (ProbeStatus::Complete, None)
            } else {
                (ProbeStatus::Failed, Some(format!("Received {} of {} bytes", counted, self.expected)))
            };
            Ok(ServerMeasurement {
                status,
                bits_per_second: None,
                bytes_transferred: counted,
                warmup_bytes: 0,
                elapsed_seconds: 0.0,
                error,
            })
        }
    }
}
