//! HTTP handlers for the playground endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gopad_core::{InputError, ValidationError};
use serde::{Deserialize, Serialize};

use crate::sse;
use crate::AppState;

/// Header naming the caller's previous session for preemption.
pub const PREVIOUS_SESSION_HEADER: &str = "x-previous-session";

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct InputRequest {
    pub input: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: u64,
}

/// `POST /run` — accept a submission and start executing it.
pub async fn run(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<CodeRequest>,
) -> Response {
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));
    if !state.limiter.allow(&ip) {
        log::warn!("rate limit exceeded for {}", ip);
        return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
    }

    let previous_session = headers
        .get(PREVIOUS_SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    match state.core.submit(request.code, previous_session) {
        Ok(session_id) => Json(SessionResponse { session_id }).into_response(),
        Err(err @ ValidationError::TooLarge) => {
            (StatusCode::PAYLOAD_TOO_LARGE, err.to_string()).into_response()
        }
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

/// `GET /program-output?sessionId=N` — stream a session's output as SSE.
pub async fn program_output(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Response {
    let Some(session) = state.core.session(query.session_id) else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };
    let Some(output_rx) = session.take_output() else {
        return (StatusCode::CONFLICT, "Output stream already consumed").into_response();
    };

    let stream = sse::record_stream(session, output_rx);
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(state.config.sse_keepalive_interval)
                .text("keep-alive"),
        )
        .into_response()
}

/// `POST /send-input?sessionId=N` — forward one stdin line to a session.
pub async fn send_input(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(request): Json<InputRequest>,
) -> Response {
    let Some(session) = state.core.session(query.session_id) else {
        return (StatusCode::NOT_FOUND, "Session not found").into_response();
    };

    match session.send_input(request.input).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err @ InputError::Closed) => (StatusCode::GONE, err.to_string()).into_response(),
        Err(err @ InputError::Timeout) => {
            (StatusCode::REQUEST_TIMEOUT, err.to_string()).into_response()
        }
    }
}

/// `GET /health` — engine-level liveness of the sandbox container.
pub async fn health(State(state): State<AppState>) -> Response {
    match state.core.health().await {
        Ok(()) => (StatusCode::OK, "OK\n").into_response(),
        Err(err) => {
            log::warn!("health check failed: {}", err);
            (StatusCode::SERVICE_UNAVAILABLE, "Container not healthy").into_response()
        }
    }
}

/// `POST /save` — format source with the sandboxed gofmt.
pub async fn save(State(state): State<AppState>, Json(request): Json<CodeRequest>) -> Response {
    match state.core.format(&request.code).await {
        Ok(code) => Json(serde_json::json!({ "code": code })).into_response(),
        Err(err) => {
            log::warn!("formatting failed: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error formatting code").into_response()
        }
    }
}

/// `GET /robots.txt`
pub async fn robots() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain")],
        "User-agent: *\nDisallow: /private/",
    )
}

/// Client address for throttling: first hop of `X-Forwarded-For` when
/// present, otherwise the socket peer.
fn client_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    addr.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
