//! Chunked reading of a download response

use super::ChunkSource;
use crate::error::{AppError, Result};
use crate::models::{DownloadReport, ServerMeasurement};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;

/// Upper bound on what may follow the payload
const MAX_FOOTER_BYTES: usize = 64 * 1024;

/// Re-frames network frames into fixed-size payload chunks.
///
/// The response body is `payload_bytes` of payload followed by an optional
/// newline-prefixed JSON footer. Frames arrive in whatever sizes the network
/// produces; chunks are cut at exact `chunk_bytes` boundaries so byte
/// accounting does not depend on framing.
pub struct HttpChunkSource {
    stream: BoxStream<'static, Result<Bytes>>,
    buffer: BytesMut,
    payload_remaining: u64,
    payload_bytes: u64,
    chunk_bytes: u64,
}

impl HttpChunkSource {
    pub fn new(stream: BoxStream<'static, Result<Bytes>>, payload_bytes: u64, chunk_bytes: u64) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            payload_remaining: payload_bytes,
            payload_bytes,
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    fn received_payload(&self) -> u64 {
        self.payload_bytes - self.payload_remaining
    }
}

#[async_trait]
impl ChunkSource for HttpChunkSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.payload_remaining == 0 {
            return Ok(None);
        }

        let wanted = self.payload_remaining.min(self.chunk_bytes) as usize;

        while self.buffer.len() < wanted {
            match self.stream.next().await {
                Some(Ok(frame)) => self.buffer.extend_from_slice(&frame),
                Some(Err(error)) => return Err(error),
                None => {
                    return Err(AppError::transport(format!(
                        "Download ended after {} of {} payload bytes",
                        self.received_payload() + self.buffer.len() as u64,
                        self.payload_bytes
                    )));
                }
            }
        }

        self.payload_remaining -= wanted as u64;
        Ok(Some(self.buffer.split_to(wanted).freeze()))
    }

    async fn finish(&mut self) -> Result<Option<ServerMeasurement>> {
        while let Some(frame) = self.stream.next().await {
            self.buffer.extend_from_slice(&frame?);
            if self.buffer.len() > MAX_FOOTER_BYTES {
                return Err(AppError::protocol("Download footer exceeds 64 KiB"));
            }
        }

        let footer = trim_ascii_whitespace(&self.buffer);
        if footer.is_empty() {
            return Ok(None);
        }

        let report: DownloadReport = serde_json::from_slice(footer)?;
        Ok(Some(report.into()))
    }
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeStatus;

    fn source_from(frames: Vec<Result<Bytes>>, payload: u64, chunk: u64) -> HttpChunkSource {
        HttpChunkSource::new(futures::stream::iter(frames).boxed(), payload, chunk)
    }

    async fn drain(source: &mut HttpChunkSource) -> Vec<usize> {
        let mut sizes = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
        }
        sizes
    }

    #[tokio::test]
    async fn test_reframes_odd_frames_into_chunks() {
        let frames = vec![
            Ok(Bytes::from(vec![1u8; 7])),
            Ok(Bytes::from(vec![2u8; 3])),
            Ok(Bytes::from(vec![3u8; 12])),
        ];
        let mut source = source_from(frames, 22, 8);

        assert_eq!(drain(&mut source).await, vec![8, 8, 6]);
        assert!(source.finish().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_footer_is_parsed_after_payload() {
        let footer = serde_json::json!({
            "status": "Complete",
            "downloadSpeedBitsPerSec": 1_000_000.0,
            "bytesTransferred": 16,
            "warmupBytes": 8,
            "elapsedSeconds": 0.001,
            "timestamp": "2026-01-01T00:00:00Z",
        });
        let mut body = vec![0u8; 16];
        body.push(b'\n');
        body.extend_from_slice(footer.to_string().as_bytes());

        let frames = body.chunks(5).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        let mut source = source_from(frames, 16, 8);

        assert_eq!(drain(&mut source).await, vec![8, 8]);
        let measurement = source.finish().await.unwrap().unwrap();
        assert_eq!(measurement.status, ProbeStatus::Complete);
        assert_eq!(measurement.bytes_transferred, 16);
        assert_eq!(measurement.bits_per_second, Some(1_000_000.0));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_transport_error() {
        let frames = vec![Ok(Bytes::from(vec![0u8; 10]))];
        let mut source = source_from(frames, 32, 8);

        assert!(source.next_chunk().await.unwrap().is_some());
        let error = source.next_chunk().await.unwrap_err();
        assert_eq!(error.category(), "TRANSPORT");
        assert!(error.to_string().contains("10 of 32"));
    }

    #[tokio::test]
    async fn test_stream_error_is_propagated() {
        let frames = vec![
            Ok(Bytes::from(vec![0u8; 8])),
            Err(AppError::transport("connection reset")),
        ];
        let mut source = source_from(frames, 32, 8);

        assert!(source.next_chunk().await.unwrap().is_some());
        assert!(source.next_chunk().await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_footer_is_parse_error() {
        let frames = vec![Ok(Bytes::from_static(b"12345678\n{not json"))];
        let mut source = source_from(frames, 8, 8);

        assert_eq!(drain(&mut source).await, vec![8]);
        assert_eq!(source.finish().await.unwrap_err().category(), "PARSE");
    }

    #[test]
    fn test_trim_ascii_whitespace() {
        assert_eq!(trim_ascii_whitespace(b"\n {}\n"), b"{}");
        assert_eq!(trim_ascii_whitespace(b" \n"), b"");
    }
}
