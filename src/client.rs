//! Probe transport: the seam between the measurement engine and the network
//!
//! The probers only ever talk to a [`ProbeTransport`]. The HTTP
//! implementation speaks to the speed-test server's `/echo`, `/download`
//! and `/upload` endpoints; tests substitute scripted transports.

pub mod download;
pub mod upload;


use crate::{
    error::{AppError, ErrorContext, Result},
    models::{Config, ErrorBody, ServerMeasurement},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Response, Url};
use std::time::Duration;

pub use download::HttpChunkSource;
pub use upload::HttpChunkSink;

/// Header carrying the number of payload bytes in a download response
pub const PAYLOAD_BYTES_HEADER: &str = "x-payload-bytes";

/// Network operations the probers need
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// One minimal request/response exchange; returns once the response
    /// body has been fully received
    async fn round_trip(&self) -> Result<()>;

    /// Start a download of `total_bytes`, delivered in `chunk_bytes` pieces
    async fn open_download(&self, total_bytes: u64, chunk_bytes: u64) -> Result<Box<dyn ChunkSource>>;

    /// Start an upload of `total_bytes`
    async fn open_upload(&self, total_bytes: u64, chunk_bytes: u64) -> Result<Box<dyn ChunkSink>>;

    /// Human readable description of the peer
    fn describe(&self) -> String;
}

/// Receiving end of a download
#[async_trait]
pub trait ChunkSource: Send {
    /// Next payload chunk, `None` once the payload is complete. Every chunk
    /// is exactly the requested chunk size except possibly the last.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Drain whatever follows the payload and return the server's own
    /// measurement, if it sent one
    async fn finish(&mut self) -> Result<Option<ServerMeasurement>>;
}

/// Sending end of an upload
#[async_trait]
pub trait ChunkSink: Send {
    /// Hand one chunk to the connection; returns once the connection has
    /// taken it and asks for the next one
    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()>;

    /// Close the upload and wait for the server's acknowledgement
    async fn finish(&mut self) -> Result<ServerMeasurement>;
}

/// reqwest-backed transport talking to an `nst --serve` instance
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport for the server at `base_url`
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::validation(format!("Invalid server URL '{}': {}", base_url, e)))?;

        match base_url.scheme() {
            "http" | "https" => {}
            scheme => return Err(AppError::validation(format!("Unsupported URL scheme: {}", scheme))),
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(format!("{}/{}", crate::PKG_NAME, crate::VERSION))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an endpoint path against the base URL
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", base_path, path.trim_start_matches('/')));
        Ok(url)
    }
}

#[async_trait]
impl ProbeTransport for HttpTransport {
    async fn round_trip(&self) -> Result<()> {
        let url = self.endpoint("echo")?;
        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        response.bytes().await?;
        Ok(())
    }

    async fn open_download(&self, total_bytes: u64, chunk_bytes: u64) -> Result<Box<dyn ChunkSource>> {
        let mut url = self.endpoint("download")?;
        url.query_pairs_mut()
            .append_pair("bytes", &total_bytes.to_string())
            .append_pair("chunk", &chunk_bytes.to_string());

        let response = self.client.get(url).send().await.context("Opening download stream")?;
        let response = check_status(response).await?;

        let payload_bytes = response.headers()
            .get(PAYLOAD_BYTES_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(total_bytes);

        let stream = response.bytes_stream()
            .map(|frame| frame.map_err(AppError::from))
            .boxed();

        Ok(Box::new(HttpChunkSource::new(stream, payload_bytes, chunk_bytes)))
    }

    async fn open_upload(&self, total_bytes: u64, chunk_bytes: u64) -> Result<Box<dyn ChunkSink>> {
        let mut url = self.endpoint("upload")?;
        url.query_pairs_mut()
            .append_pair("bytes", &total_bytes.to_string())
            .append_pair("chunk", &chunk_bytes.to_string());

        Ok(Box::new(HttpChunkSink::start(self.client.clone(), url)))
    }

    fn describe(&self) -> String {
        self.base_url.to_string()
    }
}

/// Turn error statuses into errors, keeping the server's message for 4xx
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown status").to_string(),
    };

    if status.is_client_error() {
        Err(AppError::protocol(format!("Server rejected request ({}): {}", status.as_u16(), message)))
    } else {
        Err(AppError::transport(format!("Server error ({}): {}", status.as_u16(), message)))
    }
}

/// Builds transports from configuration
pub struct ClientFactory {
    config: Config,
}

impl ClientFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Transport for the configured speed-test server
    pub fn create_transport(&self) -> Result<HttpTransport> {
        HttpTransport::new(&self.config.server_url, self.config.ping_timeout())
    }

    /// Transport for an arbitrary base URL, e.g. the server's ping target
    pub fn create_transport_for(&self, base_url: &str) -> Result<HttpTransport> {
        HttpTransport::new(base_url, self.config.ping_timeout())
    }
}
