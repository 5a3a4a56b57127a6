//! Request logging middleware

use super::super::state::ServerState;
use axum::extract::State;
use axum::{
    body::{Body, Bytes},
    http::{header::HeaderMap, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};
use std::time::Instant;
use tracing::{error, info};

#[derive(PartialEq, PartialOrd, Clone, Debug, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    Path,
    Headers,
    Body,
}

impl Default for RequestsLoggingLevel {
    fn default() -> Self {
        Self::Path
    }
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

const MAX_LOGGABLE_BODY_LENGTH: usize = 1024;

/// Headers whose values are never written to the log.
const REDACTED_HEADERS: &[&str] = &["x-key"];

#[derive(Debug, PartialEq)]
enum LoggableBody {
    /// Declared length small enough to buffer and print.
    Small(usize),
    TooBig(usize),
    Unknown(&'static str),
}

fn classify_body(headers: &HeaderMap) -> LoggableBody {
    let Some(value) = headers.get("content-length") else {
        return LoggableBody::Unknown("content-length not set");
    };
    let Ok(text) = value.to_str() else {
        return LoggableBody::Unknown("unreadable content-length");
    };
    match text.parse::<usize>() {
        Ok(size) if size < MAX_LOGGABLE_BODY_LENGTH => LoggableBody::Small(size),
        Ok(size) => LoggableBody::TooBig(size),
        Err(_) => LoggableBody::Unknown("unparsable content-length"),
    }
}

fn log_headers(label: &str, headers: &HeaderMap) {
    info!("  {} headers:", label);
    for (name, value) in headers.iter() {
        if REDACTED_HEADERS.contains(&name.as_str()) {
            info!("    {}: <redacted>", name);
        } else {
            info!("    {}: {:?}", name, value);
        }
    }
}

/// Buffers a small body so it can be printed and handed on unchanged.
/// Bodies that are large or of unknown size are left as they are.
async fn log_body(label: &str, headers: &HeaderMap, body: Body) -> Result<Body, StatusCode> {
    match classify_body(headers) {
        LoggableBody::Small(size) => {
            let bytes: Bytes = axum::body::to_bytes(body, size).await.map_err(|err| {
                error!("Failed to buffer {} body: {:?}", label, err);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
            info!("  {} body:\n{}", label, String::from_utf8_lossy(&bytes));
            Ok(Body::from(bytes))
        }
        LoggableBody::TooBig(size) => {
            info!("  {} body: too big to log ({:#})", label, byte_unit::Byte::from(size));
            Ok(body)
        }
        LoggableBody::Unknown(reason) => {
            info!("  {} body: {}", label, reason);
            Ok(body)
        }
    }
}

pub async fn log_requests(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let level = state.config.requests_logging_level.clone();
    if level == RequestsLoggingLevel::None {
        return next.run(request).await;
    }

    let start = Instant::now();
    info!(">>> {} {}", request.method(), request.uri());

    let request = if level >= RequestsLoggingLevel::Headers {
        log_headers("Req", request.headers());
        let (parts, body) = request.into_parts();
        let body = if level >= RequestsLoggingLevel::Body {
            match log_body("Req", &parts.headers, body).await {
                Ok(body) => body,
                Err(status) => return status.into_response(),
            }
        } else {
            body
        };
        Request::from_parts(parts, body)
    } else {
        request
    };

    let mut response: Response<Body> = next.run(request).await;

    if level >= RequestsLoggingLevel::Headers {
        log_headers("Resp", response.headers());
        if level >= RequestsLoggingLevel::Body {
            let (parts, body) = response.into_parts();
            let body = match log_body("Resp", &parts.headers, body).await {
                Ok(body) => body,
                Err(status) => return status.into_response(),
            };
            response = Response::from_parts(parts, body);
        }
    }

    info!(
        "<<< {} {} ({}ms)",
        response.status().as_u16(),
        reason_phrase(response.status()),
        start.elapsed().as_millis()
    );
    response
}

fn reason_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("")
}
