//! qBittorrent upstream error translation.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use stremthru_core::{ErrorCode, StoreError};
use stremthru_store::StoreName;

/// Raw WebUI failure, preserved as the cause of the normalized error.
#[derive(Debug)]
pub(crate) struct QbitError {
    pub(crate) status_code: u16,
    pub(crate) message: String,
}

impl QbitError {
    pub(crate) fn new(status_code: u16, body: &[u8]) -> Self {
        let message = String::from_utf8_lossy(body).trim().to_string();
        let message = if message.is_empty() {
            status_text(status_code).to_string()
        } else {
            message
        };
        Self {
            status_code,
            message,
        }
    }
}

impl Display for QbitError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "qbittorrent upstream {}: {}", self.status_code, self.message)
    }
}

impl Error for QbitError {}

fn status_text(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Upstream Error",
    }
}

/// qBittorrent's status-code translation table. A 403 means the session
/// cookie is gone, which is an identity problem, not a permission one.
#[must_use]
pub const fn translate_status_code(status: u16) -> ErrorCode {
    match status {
        403 => ErrorCode::Unauthorized,
        404 => ErrorCode::NotFound,
        409 => ErrorCode::Conflict,
        500..=599 => ErrorCode::ServiceUnavailable,
        400..=499 => ErrorCode::BadRequest,
        _ => ErrorCode::Unknown,
    }
}

/// Wrap a WebUI failure into the normalized store error.
pub(crate) fn upstream_error(status: u16, body: &[u8]) -> StoreError {
    let qbit = QbitError::new(status, body);
    let code = translate_status_code(qbit.status_code);
    StoreError {
        store_name: Some(StoreName::Qbittorrent.as_str().to_string()),
        code,
        status_code: qbit.status_code,
        message: qbit.message.clone(),
        cause: Some(Box::new(qbit)),
    }
}

/// Wrap a transport-level failure (no upstream status available).
pub(crate) fn upstream_error_with_cause(
    message: impl Into<String>,
    cause: impl Error + Send + Sync + 'static,
) -> StoreError {
    StoreError::new(ErrorCode::Unknown, message)
        .with_store(StoreName::Qbittorrent.as_str())
        .with_cause(cause)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_table() {
        assert_eq!(translate_status_code(403), ErrorCode::Unauthorized);
        assert_eq!(translate_status_code(404), ErrorCode::NotFound);
        assert_eq!(translate_status_code(409), ErrorCode::Conflict);
        assert_eq!(translate_status_code(500), ErrorCode::ServiceUnavailable);
        assert_eq!(translate_status_code(503), ErrorCode::ServiceUnavailable);
        assert_eq!(translate_status_code(400), ErrorCode::BadRequest);
        assert_eq!(translate_status_code(422), ErrorCode::BadRequest);
        assert_eq!(translate_status_code(200), ErrorCode::Unknown);
        assert_eq!(translate_status_code(301), ErrorCode::Unknown);
    }

    #[test]
    fn empty_body_falls_back_to_status_text() {
        let err = QbitError::new(500, b"");
        assert_eq!(err.message, "Internal Server Error");
    }

    #[test]
    fn upstream_error_preserves_status_and_store() {
        let err = upstream_error(403, b"Forbidden");
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.status_code, 403);
        assert_eq!(err.store_name.as_deref(), Some("qbittorrent"));
        assert!(err.source().is_some());
    }
}
