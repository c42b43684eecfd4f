//! Streaming upload through a request body fed chunk by chunk

use super::{check_status, ChunkSink};
use crate::error::{AppError, Result};
use crate::models::{ServerMeasurement, UploadReport};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{stream, SinkExt, Stream, StreamExt};
use reqwest::{Body, Client, Url};
use tokio::task::JoinHandle;

type BodyFrame = std::result::Result<Bytes, std::io::Error>;

/// Body side of the upload.
///
/// Each chunk handed to the connection is acknowledged when the body is
/// polled again, i.e. once the connection has taken it and asks for more.
struct BodyFeed {
    chunks: mpsc::Receiver<Bytes>,
    taken: mpsc::UnboundedSender<()>,
    handed_out: bool,
}

fn body_stream(feed: BodyFeed) -> impl Stream<Item = BodyFrame> + Send + 'static {
    stream::unfold(feed, |mut feed| async move {
        if feed.handed_out {
            // Nobody waiting means the sink is gone; the request is being torn down
            let _ = feed.taken.unbounded_send(());
        }

        let chunk = feed.chunks.next().await?;
        feed.handed_out = true;
        Some((Ok(chunk), feed))
    })
}

/// Upload whose request body is fed from a channel.
///
/// The request runs on its own task. `send_chunk` returns once the body
/// has been polled past the chunk, so nothing counts as sent while the
/// connection is still being set up or is not draining.
pub struct HttpChunkSink {
    sender: Option<mpsc::Sender<Bytes>>,
    taken: mpsc::UnboundedReceiver<()>,
    request: Option<JoinHandle<Result<UploadReport>>>,
}

impl HttpChunkSink {
    /// Start the request; nothing is sent until the first chunk
    pub fn start(client: Client, url: Url) -> Self {
        let (sender, chunks) = mpsc::channel::<Bytes>(0);
        let (taken_tx, taken) = mpsc::unbounded();
        let feed = BodyFeed {
            chunks,
            taken: taken_tx,
            handed_out: false,
        };

        let request = tokio::spawn(async move {
            let response = client.post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::wrap_stream(body_stream(feed)))
                .send()
                .await?;

            let response = check_status(response).await?;
            let report = response.json::<UploadReport>().await?;
            Ok(report)
        });

        Self {
            sender: Some(sender),
            taken,
            request: Some(request),
        }
    }

    /// Outcome of the request task once the body channel has been closed
    async fn request_outcome(&mut self) -> Result<UploadReport> {
        self.sender = None;

        match self.request.take() {
            Some(handle) => handle.await
                .map_err(|e| AppError::internal(format!("Upload task failed: {}", e)))?,
            None => Err(AppError::internal("Upload already finished")),
        }
    }

    /// The body went away before all chunks were taken
    async fn ended_early(&mut self) -> Result<()> {
        match self.request_outcome().await {
            Err(error) => Err(error),
            Ok(_) => Err(AppError::transport("Server closed the upload before all bytes were sent")),
        }
    }
}

#[async_trait]
impl ChunkSink for HttpChunkSink {
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let queued = match self.sender.as_mut() {
            Some(sender) => sender.send(chunk).await.is_ok(),
            None => return Err(AppError::internal("Upload already finished")),
        };
        if !queued {
            return self.ended_early().await;
        }

        match self.taken.next().await {
            Some(()) => Ok(()),
            None => self.ended_early().await,
        }
    }

    async fn finish(&mut self) -> Result<ServerMeasurement> {
        let report = self.request_outcome().await?;
        Ok(report.into())
    }
}

impl Drop for HttpChunkSink {
    fn drop(&mut self) {
        if let Some(handle) = self.request.take() {
            handle.abort();
        }
    }
}
