//! HTTP and SSE surface for the gopad playground.
//!
//! The server is a thin collaborator around the execution core: it accepts
//! submissions, streams per-session output as Server-Sent Events, forwards
//! browser-supplied stdin lines, and exposes health, formatting, and
//! robots endpoints. SSE keeps the transport plain HTTP and lets the
//! browser resume reading with nothing more than an `EventSource`.

pub mod error;
pub mod handlers;
pub mod limit;
pub mod sse;

pub use error::{Result, ServerError};
pub use limit::RateLimiter;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use gopad_core::{config::MAX_CODE_SIZE, Playground};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Configuration for the playground server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable permissive CORS
    pub enable_cors: bool,
    /// Maximum request body size in bytes. Must leave headroom above the
    /// submission cap: JSON escaping can nearly double the source text, and
    /// the gate enforces the real limit on the decoded `code` string.
    pub max_body_size: usize,
    /// Keep-alive interval for SSE connections
    pub sse_keepalive_interval: Duration,
    /// Per-client request budget
    pub requests_per_minute: u32,
    /// Enable request logging
    pub enable_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8088".parse().expect("default bind address"),
            enable_cors: true,
            max_body_size: 2 * MAX_CODE_SIZE + 1024,
            sse_keepalive_interval: Duration::from_secs(15),
            requests_per_minute: 500,
            enable_logging: true,
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address: {}", e)))?;
        Ok(self)
    }

    /// Enable or disable CORS.
    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    /// Set the per-client request budget.
    pub fn with_requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    /// Set the SSE keep-alive interval.
    pub fn with_sse_keepalive(mut self, interval: Duration) -> Self {
        self.sse_keepalive_interval = interval;
        self
    }

    /// Enable or disable request logging.
    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Playground>,
    pub limiter: Arc<RateLimiter>,
    pub config: ServerConfig,
}

/// The playground HTTP server.
pub struct PlaygroundServer {
    core: Arc<Playground>,
    config: ServerConfig,
}

impl PlaygroundServer {
    /// Create a server with the default configuration.
    pub fn new(core: Playground) -> Self {
        Self::with_config(core, ServerConfig::default())
    }

    /// Create a server with custom configuration.
    pub fn with_config(core: Playground, config: ServerConfig) -> Self {
        Self {
            core: Arc::new(core),
            config,
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            core: self.core.clone(),
            limiter: Arc::new(RateLimiter::new(self.config.requests_per_minute)),
            config: self.config.clone(),
        };

        let mut router = Router::new()
            .route("/run", post(handlers::run))
            .route("/program-output", get(handlers::program_output))
            .route("/send-input", post(handlers::send_input))
            .route("/health", get(handlers::health))
            .route("/save", post(handlers::save))
            .route("/robots.txt", get(handlers::robots))
            .layer(DefaultBodyLimit::max(self.config.max_body_size))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(axum::middleware::from_fn(log_request));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the server and listen for connections.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown support.
    ///
    /// The server will shut down when the provided shutdown signal resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!("gopad server starting on {}", self.config.bind_addr);
        log::info!("Run endpoint: http://{}/run", self.config.bind_addr);
        log::info!(
            "Output stream: http://{}/program-output",
            self.config.bind_addr
        );
        log::info!("Health check: http://{}/health", self.config.bind_addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("gopad server shut down gracefully");
        Ok(())
    }
}

async fn log_request(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    static NEXT_REQUEST_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let request_id = NEXT_REQUEST_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
    let method = request.method().clone();
    let uri = request.uri().clone();
    log::info!("Request {} {} {}", request_id, method, uri);

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    log::info!("Response {} completed in {:?}", request_id, start.elapsed());

    response
}

/// Utility function to create a shutdown signal from Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use gopad_core::{Sandbox, SandboxConfig};
    use tower::ServiceExt; // for `oneshot`

    const HELLO: &str = r#"package main

import "fmt"

func main() {
	fmt.Println("hi")
}
"#;

    fn test_server() -> Option<PlaygroundServer> {
        let sandbox = Sandbox::new(SandboxConfig::default()).ok()?;
        Some(PlaygroundServer::new(Playground::new(sandbox)))
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn robots_txt_is_served() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/robots.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"User-agent: *\nDisallow: /private/");
    }

    #[tokio::test]
    async fn run_rejects_blocklisted_source() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        let code = "package main\n\nimport \"os/exec\"\n\nfunc main() {}\n";
        let response = app
            .oneshot(json_request("/run", serde_json::json!({ "code": code })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"invalid or potentially unsafe Go code");
    }

    #[tokio::test]
    async fn run_rejects_unanalyzable_source() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        let response = app
            .oneshot(json_request(
                "/run",
                serde_json::json!({ "code": "package main\n\nfunc main() {\n" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_rejects_oversized_source_through_the_gate() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        let oversized = format!("package main\n// {}", "x".repeat(MAX_CODE_SIZE));
        let response = app
            .oneshot(json_request("/run", serde_json::json!({ "code": oversized })))
            .await
            .unwrap();

        // The transport limit has headroom, so the gate produces the
        // rejection and its message reaches the client.
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("maximum size"));
    }

    #[tokio::test]
    async fn run_accepts_near_boundary_source_despite_json_escaping() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        // Newlines and quotes double in size once JSON-escaped; the cap
        // applies to the decoded source, not the wire body.
        let mut code = String::from("package main\n\nfunc main() {}\n");
        let filler = "// \"quoted\" padding line\n";
        while code.len() + filler.len() < MAX_CODE_SIZE {
            code.push_str(filler);
        }

        let response = app
            .oneshot(json_request("/run", serde_json::json!({ "code": code })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["sessionId"].as_u64().is_some());
    }

    #[tokio::test]
    async fn run_applies_rate_limit_per_client() {
        let Some(sandbox) = Sandbox::new(SandboxConfig::default()).ok() else {
            return;
        };
        let server = PlaygroundServer::with_config(
            Playground::new(sandbox),
            ServerConfig::new().with_requests_per_minute(1),
        );
        let app = server.build_router();

        let first = app
            .clone()
            .oneshot(json_request("/run", serde_json::json!({ "code": HELLO })))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(json_request("/run", serde_json::json!({ "code": HELLO })))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/program-output?sessionId=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(json_request(
                "/send-input?sessionId=42",
                serde_json::json!({ "input": "hello" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submission_round_trip_streams_terminal_record() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        // Accepted submission; the sandbox was never ensured, so execution
        // fails fast and the stream carries exactly one terminal record.
        let response = app
            .clone()
            .oneshot(json_request("/run", serde_json::json!({ "code": HELLO })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let session_id = body["sessionId"].as_u64().unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/program-output?sessionId={}", session_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("\"done\":true"));
        assert!(text.contains("error"));
    }

    #[tokio::test]
    async fn second_output_reader_conflicts() {
        let Some(server) = test_server() else { return };
        let app = server.build_router();

        let response = app
            .clone()
            .oneshot(json_request("/run", serde_json::json!({ "code": HELLO })))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let session_id = body["sessionId"].as_u64().unwrap();

        let uri = format!("/program-output?sessionId={}", session_id);
        let first = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        // The driver may have already finished and unregistered the session.
        assert!(matches!(
            second.status(),
            StatusCode::CONFLICT | StatusCode::NOT_FOUND
        ));
    }
}
