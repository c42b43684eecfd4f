//! Payload generation and upload consumption
//!
//! The server streams pseudo-random bytes so that compression anywhere on the
//! path cannot inflate the measured throughput. One random block is
//! allocated when the pool is initialised and every payload is a view into
//! it, so producing a chunk costs O(1) regardless of its content.

use crate::error::{AppError, Result};
use bytes::{Bytes, BytesMut};
use rand::{Rng, RngCore};

/// Shared block of random bytes payloads are sliced from
#[derive(Debug, Clone)]
pub struct PayloadPool {
    block: Bytes,
}

impl PayloadPool {
    /// Allocate and fill the random block
    pub fn init(block_bytes: usize) -> Result<Self> {
        if block_bytes == 0 {
            return Err(AppError::config("Payload block size must be greater than 0"));
        }

        let mut block = vec![0u8; block_bytes];
        rand::thread_rng().fill_bytes(&mut block);

        Ok(Self { block: Bytes::from(block) })
    }

    /// Size of the random block
    pub fn block_len(&self) -> usize {
        self.block.len()
    }

    /// Return `byte_count` bytes of pseudo-random content.
    ///
    /// The length is always exact. Content starts at a random offset in the
    /// block; payloads longer than the block repeat it.
    pub fn generate(&self, byte_count: u64) -> Bytes {
        let len = self.block.len();
        let wanted = byte_count as usize;

        if wanted == 0 {
            return Bytes::new();
        }

        if wanted <= len {
            let offset = rand::thread_rng().gen_range(0..=len - wanted);
            return self.block.slice(offset..offset + wanted);
        }

        let mut buffer = BytesMut::with_capacity(wanted);
        let mut offset = rand::thread_rng().gen_range(0..len);
        while buffer.len() < wanted {
            let take = (wanted - buffer.len()).min(len - offset);
            buffer.extend_from_slice(&self.block[offset..offset + take]);
            offset = 0;
        }
        buffer.freeze()
    }

    /// Split `total` bytes into chunks of `chunk` bytes; the last may be shorter
    pub fn chunks(&self, total: u64, chunk: u64) -> PayloadChunks {
        PayloadChunks {
            pool: self.clone(),
            remaining: total,
            chunk: chunk.max(1),
        }
    }

    /// Tear down the block, returning how many bytes were released.
    ///
    /// Outstanding `Bytes` handed out earlier keep their slice alive until
    /// they are dropped.
    pub fn release(self) -> usize {
        let len = self.block.len();
        drop(self.block);
        len
    }
}

/// Iterator over payload chunks
#[derive(Debug)]
pub struct PayloadChunks {
    pool: PayloadPool,
    remaining: u64,
    chunk: u64,
}

impl Iterator for PayloadChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining == 0 {
            return None;
        }

        let size = self.remaining.min(self.chunk);
        self.remaining -= size;
        Some(self.pool.generate(size))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.remaining.div_ceil(self.chunk) as usize;
        (count, Some(count))
    }
}

/// Counts an incoming upload without inspecting its content
#[derive(Debug, Clone)]
pub struct UploadConsumer {
    max_bytes: u64,
    expected_bytes: Option<u64>,
    bytes_received: u64,
    chunks_received: u64,
}

impl UploadConsumer {
    pub fn new(max_bytes: u64, expected_bytes: Option<u64>) -> Self {
        Self {
            max_bytes,
            expected_bytes,
            bytes_received: 0,
            chunks_received: 0,
        }
    }

    /// Account for one incoming chunk. Fails once the upload exceeds the
    /// configured maximum.
    pub fn consume(&mut self, chunk: &[u8]) -> Result<()> {
        let next = self.bytes_received + chunk.len() as u64;
        if next > self.max_bytes {
            return Err(AppError::protocol(format!(
                "Upload exceeds the maximum of {} bytes", self.max_bytes
            )));
        }

        self.bytes_received = next;
        self.chunks_received += 1;
        Ok(())
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn chunks_received(&self) -> u64 {
        self.chunks_received
    }

    pub fn expected_bytes(&self) -> Option<u64> {
        self.expected_bytes
    }

    /// Whether fewer bytes arrived than the client announced
    pub fn is_short(&self) -> bool {
        self.expected_bytes.map_or(false, |expected| self.bytes_received < expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_length_exact() {
        let pool = PayloadPool::init(4096).unwrap();
        for size in [0u64, 1, 100, 4096, 4097, 10_000] {
            assert_eq!(pool.generate(size).len() as u64, size);
        }
    }

    #[test]
    fn test_generate_within_block_is_a_view() {
        let pool = PayloadPool::init(1024).unwrap();
        let payload = pool.generate(512);

        let block = &pool.block[..];
        let found = block.windows(512).any(|window| window == &payload[..]);
        assert!(found);
    }

    #[test]
    fn test_zero_block_rejected() {
        let error = PayloadPool::init(0).unwrap_err();
        assert_eq!(error.category(), "CONFIG");
    }

    #[test]
    fn test_chunks_cover_total() {
        let pool = PayloadPool::init(65_536).unwrap();
        let chunks: Vec<Bytes> = pool.chunks(200_000, 65_536).collect();

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 65_536);
        assert_eq!(chunks[3].len(), 200_000 - 3 * 65_536);
        assert_eq!(chunks.iter().map(|c| c.len() as u64).sum::<u64>(), 200_000);
    }

    #[test]
    fn test_chunks_size_hint() {
        let pool = PayloadPool::init(1024).unwrap();
        let chunks = pool.chunks(16 * 1024, 1024);
        assert_eq!(chunks.size_hint(), (16, Some(16)));
        assert_eq!(chunks.map(|c| c.len() as u64).sum::<u64>(), 16 * 1024);
    }

    #[test]
    fn test_release_reports_block_size() {
        let pool = PayloadPool::init(2048).unwrap();
        let outstanding = pool.generate(16);
        assert_eq!(pool.release(), 2048);
        assert_eq!(outstanding.len(), 16);
    }

    #[test]
    fn test_upload_consumer_counts_bytes() {
        let mut consumer = UploadConsumer::new(1024, Some(300));
        consumer.consume(&[0u8; 100]).unwrap();
        consumer.consume(&[1u8; 100]).unwrap();

        assert_eq!(consumer.bytes_received(), 200);
        assert_eq!(consumer.chunks_received(), 2);
        assert!(consumer.is_short());

        consumer.consume(&[2u8; 100]).unwrap();
        assert!(!consumer.is_short());
    }

    #[test]
    fn test_upload_consumer_enforces_limit() {
        let mut consumer = UploadConsumer::new(150, None);
        consumer.consume(&[0u8; 100]).unwrap();
        let error = consumer.consume(&[0u8; 100]).unwrap_err();

        assert!(error.is_client_error());
        assert_eq!(consumer.bytes_received(), 100);
    }
}
