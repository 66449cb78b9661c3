//! Progress-aware streaming proxy.
//!
//! Torrent clients pre-allocate files at full size, so a plain file server
//! returns zeros for regions that are not downloaded yet and video players
//! treat them as corruption. The paced proxy never forwards bytes past the
//! safe-byte frontier: it serves what is downloaded, pauses while the
//! download catches up, and gives up after two minutes without progress.
//! Seeks beyond the frontier (ffprobe reading the moov atom) are allowed
//! through unpaced when every covering piece is already present.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use stremthru_config::TunnelType;
use stremthru_core::{StoreError, StoreResult};

use crate::tunnel::TunnelClientPool;

const COPY_CHUNK: usize = 64 * 1024;

/// Progress oracle for the file being streamed.
#[async_trait]
pub trait StreamProgress: Send + Sync {
    /// `(safe_bytes, file_size, done)` — safe bytes are a lower bound.
    async fn safe_bytes(&self) -> (i64, i64, bool);

    /// Whether every piece covering `[start, end]` is downloaded.
    async fn is_range_available(&self, start: i64, end: i64) -> bool;
}

/// Pacing knobs; the defaults match the production behavior.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub poll_interval: Duration,
    pub stall_timeout: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            stall_timeout: Duration::from_secs(120),
        }
    }
}

/// Parse `bytes=START-END`. Returns `(start, end)` with `end == -1` for an
/// unbounded range. Suffix ranges (`bytes=-N`) and anything malformed
/// return `None`; multi-range requests collapse to the first range.
#[must_use]
pub fn parse_byte_range(range_header: &str) -> Option<(i64, i64)> {
    let spec = range_header.strip_prefix("bytes=")?;
    let spec = spec.split(',').next()?;
    if spec.starts_with('-') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let start: i64 = start.parse().ok()?;
    let end: i64 = if end.is_empty() { -1 } else { end.parse().ok()? };
    Some((start, end))
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn leaks_client_ip(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "x-client-ip"
            | "x-forwarded-for"
            | "cf-connecting-ip"
            | "do-connecting-ip"
            | "fastly-client-ip"
            | "true-client-ip"
            | "x-real-ip"
            | "x-cluster-client-ip"
            | "x-forwarded"
            | "forwarded-for"
            | "forwarded"
            | "x-appengine-user-ip"
            | "cf-pseudo-ipv4"
    )
}

fn copy_request_headers(src: &HeaderMap) -> HeaderMap {
    let mut dest = HeaderMap::new();
    for (name, value) in src {
        if is_hop_by_hop(name) || leaks_client_ip(name) || name == header::HOST {
            continue;
        }
        dest.append(name.clone(), value.clone());
    }
    dest
}

fn bad_gateway(message: &str, err: reqwest::Error) -> StoreError {
    StoreError::service_unavailable(message)
        .with_status(502)
        .with_cause(err)
}

fn range_not_satisfiable(file_size: i64) -> StoreResult<Response> {
    let content_range = format!("bytes */{file_size}");
    Response::builder()
        .status(StatusCode::RANGE_NOT_SATISFIABLE)
        .header(header::CONTENT_RANGE, content_range)
        .body(Body::empty())
        .map_err(|err| StoreError::internal("failed to build response").with_cause(err))
}

/// Proxy `url` to the client.
///
/// With `progress` set, Range requests beyond the frontier are first checked
/// at the piece level (and streamed unpaced when verified), otherwise the
/// request waits for the download to catch up; the body copy is paced so no
/// byte beyond the frontier is ever forwarded.
///
/// # Errors
///
/// Upstream connection failures and response construction failures. Pacing
/// stalls terminate the body stream, not the response.
pub async fn proxy_response(
    pool: &TunnelClientPool,
    tunnel: TunnelType,
    method: Method,
    request_headers: &HeaderMap,
    url: &str,
    progress: Option<Arc<dyn StreamProgress>>,
    pacing: Pacing,
) -> StoreResult<Response> {
    let headers = copy_request_headers(request_headers);
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_byte_range);

    let mut range_verified = false;
    let mut range_start: i64 = 0;

    if let (Some(progress), Some((start, end))) = (progress.as_deref(), range) {
        range_start = start;
        let (mut safe_bytes, mut file_size, mut done) = progress.safe_bytes().await;
        if start >= safe_bytes && !done {
            // The range begins past the sequential frontier. The pieces may
            // still be there (firstLastPiecePrio fetches the tail early).
            let range_end = if end < 0 { file_size - 1 } else { end };
            if progress.is_range_available(start, range_end).await {
                debug!(start, range_end, "range verified available at piece level");
                range_verified = true;
            } else {
                let deadline = Instant::now() + pacing.stall_timeout;
                while start >= safe_bytes && !done && Instant::now() < deadline {
                    sleep(pacing.poll_interval).await;
                    (safe_bytes, file_size, done) = progress.safe_bytes().await;
                }
                if start >= safe_bytes && !done {
                    return range_not_satisfiable(file_size);
                }
            }
        }
    }

    let is_head = method == Method::HEAD;
    let client = pool.client(tunnel);
    let upstream = client
        .request(
            reqwest::Method::from_bytes(method.as_str().as_bytes())
                .unwrap_or(reqwest::Method::GET),
            url,
        )
        .headers(reqwest_headers(&headers))
        .send()
        .await
        .map_err(|err| bad_gateway("failed to request url", err))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) else {
                continue;
            };
            if is_hop_by_hop(&name) {
                continue;
            }
            if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
                response_headers.append(name, value);
            }
        }
    }

    let body = if is_head {
        Body::empty()
    } else if let (Some(progress), false) = (progress, range_verified) {
        paced_body(upstream, progress, range_start, pacing)
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    builder
        .body(body)
        .map_err(|err| StoreError::internal("failed to build response").with_cause(err))
}

fn reqwest_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let Ok(name) = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()) else {
            continue;
        };
        if let Ok(value) = reqwest::header::HeaderValue::from_bytes(value.as_bytes()) {
            out.append(name, value);
        }
    }
    out
}

/// Paced copy: forward at most `safe_bytes - position` at a time, sleeping
/// while the player is ahead of the download. The task ends when the client
/// disconnects (send fails), the upstream ends, or progress stalls past the
/// deadline.
fn paced_body(
    upstream: reqwest::Response,
    progress: Arc<dyn StreamProgress>,
    range_start: i64,
    pacing: Pacing,
) -> Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);

    tokio::spawn(async move {
        let mut stream = upstream.bytes_stream();
        let mut pending = Bytes::new();
        let mut bytes_written: i64 = 0;
        let mut last_safe: i64 = 0;
        let mut stall_deadline = Instant::now() + pacing.stall_timeout;

        loop {
            if pending.is_empty() {
                match stream.next().await {
                    Some(Ok(chunk)) => pending = chunk,
                    Some(Err(err)) => {
                        let _ = tx
                            .send(Err(std::io::Error::other(err)))
                            .await;
                        return;
                    }
                    None => return,
                }
            }

            let (safe_bytes, _, done) = progress.safe_bytes().await;
            if safe_bytes > last_safe {
                last_safe = safe_bytes;
                stall_deadline = Instant::now() + pacing.stall_timeout;
            }

            let position = range_start + bytes_written;
            let available = safe_bytes - position;

            if available <= 0 && !done {
                if Instant::now() > stall_deadline {
                    warn!(position, "download stalled, terminating stream");
                    let _ = tx
                        .send(Err(std::io::Error::other(format!(
                            "download stalled: no progress for {:?}",
                            pacing.stall_timeout
                        ))))
                        .await;
                    return;
                }
                sleep(pacing.poll_interval).await;
                continue;
            }

            let take = if done {
                pending.len().min(COPY_CHUNK)
            } else {
                pending
                    .len()
                    .min(COPY_CHUNK)
                    .min(usize::try_from(available).unwrap_or(usize::MAX))
            };
            let chunk = pending.split_to(take);
            bytes_written += chunk.len() as i64;
            if tx.send(Ok(chunk)).await.is_err() {
                // Client disconnected.
                return;
            }
        }
    });

    Body::from_stream(ReceiverStream::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_boundaries() {
        assert_eq!(parse_byte_range("bytes=0-0"), Some((0, 0)));
        assert_eq!(parse_byte_range("bytes=100-"), Some((100, -1)));
        assert_eq!(parse_byte_range("bytes=0-1023"), Some((0, 1023)));
        assert_eq!(parse_byte_range("bytes=-500"), None);
        assert_eq!(parse_byte_range(""), None);
        assert_eq!(parse_byte_range("items=0-1"), None);
        assert_eq!(parse_byte_range("bytes=a-b"), None);
        // Multi-range collapses to the first.
        assert_eq!(parse_byte_range("bytes=0-99,200-299"), Some((0, 99)));
    }

    #[test]
    fn request_header_copy_strips_ip_leaks_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        headers.insert("true-client-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert(header::HOST, HeaderValue::from_static("st.example.com"));
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));

        let copied = copy_request_headers(&headers);
        assert!(copied.get("x-forwarded-for").is_none());
        assert!(copied.get("true-client-ip").is_none());
        assert!(copied.get("transfer-encoding").is_none());
        assert!(copied.get(header::HOST).is_none());
        assert_eq!(copied.get(header::RANGE).unwrap(), "bytes=0-");
        assert_eq!(copied.get("x-custom").unwrap(), "kept");
    }
}
