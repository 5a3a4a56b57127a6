//! Range-capable streaming of files under the managed root.

use super::state::{GuardedPathGuard, ServerState};
use axum::{
    body::Body,
    extract::{FromRequestParts, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, SeekFrom},
};
use tokio_util::io::ReaderStream;
use tracing::debug;

const HEADER_BYTE_RANGE: &str = "Range";
const SNIFF_LEN: usize = 8192;
const STREAM_CHUNK_SIZE: usize = 4096 * 16;

/// A parsed `Range: bytes=a-b` header. A missing start with a present end
/// means "the last `end` bytes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim();
        let v = v.strip_prefix("bytes=")?;
        // Only the first range of a multi-range request is honored.
        let v = v.split(',').next()?.trim();
        let (start, end) = v.split_once('-')?;

        Some(ByteRange {
            start_inclusive: start.trim().parse::<u64>().ok(),
            end_inclusive: end.trim().parse::<u64>().ok(),
        })
    }

    /// Inclusive `(start, end)` offsets within a file of `length` bytes, or
    /// `None` if the range cannot be satisfied.
    fn resolve(&self, length: u64) -> Option<(u64, u64)> {
        if length == 0 {
            return None;
        }
        let last = length - 1;
        match (self.start_inclusive, self.end_inclusive) {
            (None, None) => Some((0, last)),
            (None, Some(suffix)) => {
                if suffix == 0 {
                    None
                } else {
                    Some((length.saturating_sub(suffix), last))
                }
            }
            (Some(start), end) => {
                if start > last {
                    return None;
                }
                let end = end.unwrap_or(last).min(last);
                if end < start {
                    None
                } else {
                    Some((start, end))
                }
            }
        }
    }
}

pub struct ByteRangeExtractionError {}

impl IntoResponse for ByteRangeExtractionError {
    fn into_response(self) -> Response {
        StatusCode::BAD_REQUEST.into_response()
    }
}

impl FromRequestParts<ServerState> for Option<ByteRange> {
    type Rejection = ByteRangeExtractionError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        Ok(parts
            .headers
            .get(HEADER_BYTE_RANGE)
            .and_then(|x| x.to_str().ok())
            .and_then(ByteRange::parse))
    }
}

#[derive(Deserialize, Debug)]
pub struct StreamQuery {
    file: Option<String>,
}

async fn sniff_content_type(file: &mut File) -> std::io::Result<&'static str> {
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let read = file.read(&mut head[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    head.truncate(filled);
    Ok(infer::get(&head)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream"))
}

pub async fn stream_file(
    byte_range: Option<ByteRange>,
    State(path_guard): State<GuardedPathGuard>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let Some(path) = query.file.as_deref().and_then(|f| path_guard.resolve(f)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !path.is_file() {
        return StatusCode::NOT_FOUND.into_response();
    }
    debug!("Streaming file from path {}", path.display());

    let mut file = match File::open(&path).await {
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
        Ok(x) => x,
    };
    let file_length = match file.metadata().await {
        Ok(x) => x.len(),
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    let content_type = match sniff_content_type(&mut file).await {
        Ok(x) => x,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let (status_code, start, end) = match byte_range {
        None
        | Some(ByteRange {
            start_inclusive: None,
            end_inclusive: None,
        }) => (StatusCode::OK, 0, file_length.saturating_sub(1)),
        Some(range) => match range.resolve(file_length) {
            Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end),
            None => {
                return Response::builder()
                    .status(StatusCode::RANGE_NOT_SATISFIABLE)
                    .header(header::CONTENT_RANGE, format!("bytes */{}", file_length))
                    .body(Body::empty())
                    .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response());
            }
        },
    };

    if file.seek(SeekFrom::Start(start)).await.is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let chunk_size = if file_length == 0 { 0 } else { end - start + 1 };
    let stream = ReaderStream::with_capacity(file.take(chunk_size), STREAM_CHUNK_SIZE);

    let mut builder = Response::builder()
        .status(status_code)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, chunk_size);
    if status_code == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, file_length),
        );
    }

    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
