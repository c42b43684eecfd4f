//! HTTP speed-test server
//!
//! Serves the endpoints the client probes run against. Process-wide state
//! lives in [`ServerResources`], created once the listener is bound and
//! released after graceful shutdown; each transfer keeps its own counters.

pub mod error;
pub mod routes;

pub use error::ServerError;

use crate::{
    client::{HttpTransport, ProbeTransport},
    defaults::PAYLOAD_BLOCK_BYTES,
    error::{AppError, Result},
    logging::{ErrorEventLogger, Logger, MeasurementLogger},
    models::Config,
    payload::PayloadPool,
};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::any::Any;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::cors::{Any as AnyOrigin, CorsLayer};

pub type SharedResources = Arc<ServerResources>;

/// State shared by every request
pub struct ServerResources {
    config: Config,
    payload: PayloadPool,
    ping_transport: Arc<dyn ProbeTransport>,
    requests_served: AtomicU64,
    started: Instant,
    logger: Logger,
    measurements: Arc<MeasurementLogger>,
    errors: ErrorEventLogger,
}

impl ServerResources {
    /// Allocate the payload pool and the `/ping` transport.
    ///
    /// `local_addr` is where the server is reachable; `/ping` measures
    /// against its own `/echo` there unless a ping target is configured.
    pub fn init(config: Config, local_addr: SocketAddr) -> Result<Self> {
        let block_bytes = PAYLOAD_BLOCK_BYTES.max(config.chunk_bytes as usize);
        let payload = PayloadPool::init(block_bytes)?;

        let ping_url = match &config.ping_target {
            Some(target) => target.clone(),
            None => format!("http://{}", reachable_addr(local_addr)),
        };
        let ping_transport: Arc<dyn ProbeTransport> = Arc::new(HttpTransport::new(&ping_url, config.ping_timeout())?);

        Ok(Self {
            logger: Logger::with_config("SERVER", &config),
            measurements: Arc::new(MeasurementLogger::new(&config)),
            errors: ErrorEventLogger::new(&config),
            config,
            payload,
            ping_transport,
            requests_served: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn payload(&self) -> &PayloadPool {
        &self.payload
    }

    pub fn ping_transport(&self) -> Arc<dyn ProbeTransport> {
        self.ping_transport.clone()
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn measurements(&self) -> Arc<MeasurementLogger> {
        self.measurements.clone()
    }

    pub fn record_request(&self) -> u64 {
        self.requests_served.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Turn a handler failure into a response, logging server-side causes
    pub async fn reject(&self, error: AppError, context: &str) -> ServerError {
        if error.is_client_error() {
            self.logger.debug(&format!("{}: {}", context, error))
                .error_info(&error)
                .log()
                .await;
        } else {
            self.errors.log_error(&error, Some(context), None).await;
        }
        ServerError::from(error)
    }

    /// Release the payload pool; returns the bytes freed
    pub fn shutdown(self) -> usize {
        self.payload.release()
    }
}

/// An unspecified bind address is reached through loopback
fn reachable_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port()),
        _ => addr,
    }
}

/// Turns a handler panic into the generic 500 and logs the cause
#[derive(Clone)]
pub struct PanicResponder {
    resources: SharedResources,
}

impl PanicResponder {
    pub fn new(resources: SharedResources) -> Self {
        Self { resources }
    }
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = axum::body::Body;

    fn response_for_panic(&mut self, panic: Box<dyn Any + Send + 'static>) -> Response {
        let detail = panic.downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| panic.downcast_ref::<&str>().copied())
            .unwrap_or("unknown panic")
            .to_string();

        let resources = self.resources.clone();
        tokio::spawn(async move {
            resources.errors.log_error(&AppError::internal(detail), Some("Handler panicked"), None).await;
        });

        ServerError::internal_response()
    }
}

pub fn build_router(resources: SharedResources) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/echo", get(routes::echo))
        .route("/ping", get(routes::ping))
        .route("/download", get(routes::download))
        .route("/upload", post(routes::upload))
        .route("/health", get(routes::health))
        .layer(middleware::from_fn_with_state(resources.clone(), count_requests))
        .layer(DefaultBodyLimit::disable())
        .layer(CatchPanicLayer::custom(PanicResponder::new(resources.clone())))
        .layer(cors)
        .with_state(resources)
}

async fn count_requests(State(resources): State<SharedResources>, request: Request, next: Next) -> Response {
    resources.record_request();
    next.run(request).await
}

/// A bound server, ready to run
pub struct SpeedTestServer {
    listener: TcpListener,
    resources: SharedResources,
}

impl SpeedTestServer {
    /// Bind the configured address and initialise shared resources
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = config.bind_socket_addr()?;
        let listener = TcpListener::bind(addr).await
            .map_err(|e| AppError::io(format!("Failed to bind {}: {}", addr, e)))?;
        Self::from_listener(listener, config)
    }

    /// Use an already bound listener, e.g. one on an ephemeral port
    pub fn from_listener(listener: TcpListener, config: Config) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let resources = Arc::new(ServerResources::init(config, local_addr)?);
        Ok(Self { listener, resources })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn resources(&self) -> SharedResources {
        self.resources.clone()
    }

    /// Serve until `shutdown` resolves, then release shared resources
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = self.local_addr()?;
        let router = build_router(self.resources.clone());

        self.resources.logger()
            .info(&format!("Speed-test server listening on http://{}", local_addr))
            .field("bind_address", local_addr.to_string())
            .field("build", crate::build_info())
            .log()
            .await;

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AppError::io(format!("Server error: {}", e)))?;

        let served = self.resources.requests_served();
        match Arc::try_unwrap(self.resources) {
            Ok(resources) => {
                resources.logger()
                    .info(&format!("Server stopped after {} requests", served))
                    .field("payload_block_bytes", resources.payload().block_len())
                    .log()
                    .await;
                resources.shutdown();
            }
            Err(resources) => {
                resources.logger()
                    .warn("Server stopped while shared state was still referenced")
                    .field("requests_served", served)
                    .log()
                    .await;
            }
        }

        Ok(())
    }
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspecified_bind_maps_to_loopback() {
        let any: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(reachable_addr(any), "127.0.0.1:8080".parse::<SocketAddr>().unwrap());

        let any6: SocketAddr = "[::]:9000".parse().unwrap();
        assert_eq!(reachable_addr(any6), "[::1]:9000".parse::<SocketAddr>().unwrap());

        let fixed: SocketAddr = "192.168.1.5:80".parse().unwrap();
        assert_eq!(reachable_addr(fixed), fixed);
    }

    #[tokio::test]
    async fn test_resources_lifecycle() {
        let config = Config { chunk_bytes: 4096, ..Default::default() };
        let resources = ServerResources::init(config, "127.0.0.1:0".parse().unwrap()).unwrap();

        assert_eq!(resources.record_request(), 1);
        assert_eq!(resources.record_request(), 2);
        assert_eq!(resources.requests_served(), 2);
        assert_eq!(resources.ping_transport().describe(), "http://127.0.0.1:0/");
        assert_eq!(resources.shutdown(), PAYLOAD_BLOCK_BYTES);
    }

    async fn explode() -> &'static str {
        panic!("handler blew up")
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let resources = Arc::new(ServerResources::init(Config::default(), "127.0.0.1:0".parse().unwrap()).unwrap());
        let router = Router::new()
            .route("/explode", get(explode))
            .layer(CatchPanicLayer::custom(PanicResponder::new(resources)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let response = reqwest::get(format!("http://{}/explode", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], error::INTERNAL_ERROR_MESSAGE);

        // The server keeps serving after the panic
        let again = reqwest::get(format!("http://{}/explode", addr)).await.unwrap();
        assert_eq!(again.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_ping_target_overrides_self() {
        let config = Config { ping_target: Some("http://10.1.2.3:8080".to_string()), ..Default::default() };
        let resources = ServerResources::init(config, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(resources.ping_transport().describe(), "http://10.1.2.3:8080/");
    }
}
