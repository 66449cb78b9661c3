//! # Design
//!
//! - One normalized error type (`StoreError`) for every store-facing failure.
//! - Backend adapters translate their upstream status codes into `ErrorCode`
//!   and wrap the raw upstream error as the cause.
//! - The HTTP layer maps `StoreError` to the response envelope without
//!   inspecting backend specifics.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Result alias for store-facing operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Uniform error kinds shared by every backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    Conflict,
    TooManyRequests,
    UnavailableForLegalReasons,
    PaymentRequired,
    StoreLimitExceeded,
    StoreServerDown,
    ServiceUnavailable,
    NotImplemented,
    Unknown,
}

impl ErrorCode {
    /// HTTP status this error kind maps to in responses.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::PaymentRequired => 402,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::TooManyRequests | Self::StoreLimitExceeded => 429,
            Self::UnavailableForLegalReasons => 451,
            Self::BadRequest => 400,
            Self::NotImplemented => 501,
            Self::StoreServerDown | Self::ServiceUnavailable => 503,
            Self::Unknown => 500,
        }
    }

    /// Default translation from an upstream HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            404 => Self::NotFound,
            409 => Self::Conflict,
            429 => Self::TooManyRequests,
            451 => Self::UnavailableForLegalReasons,
            500..=599 => Self::ServiceUnavailable,
            400..=499 => Self::BadRequest,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Conflict => "conflict",
            Self::TooManyRequests => "too_many_requests",
            Self::UnavailableForLegalReasons => "unavailable_for_legal_reasons",
            Self::PaymentRequired => "payment_required",
            Self::StoreLimitExceeded => "store_limit_exceeded",
            Self::StoreServerDown => "store_server_down",
            Self::ServiceUnavailable => "service_unavailable",
            Self::NotImplemented => "not_implemented",
            Self::Unknown => "unknown",
        }
    }
}

/// Normalized error for store operations.
///
/// `status_code` is the HTTP status the API layer should respond with;
/// `cause` preserves the upstream failure for diagnostics without leaking it
/// into the response body.
#[derive(Debug)]
pub struct StoreError {
    pub store_name: Option<String>,
    pub code: ErrorCode,
    pub status_code: u16,
    pub message: String,
    pub cause: Option<Box<dyn Error + Send + Sync>>,
}

impl StoreError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            store_name: None,
            code,
            status_code: code.http_status(),
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    /// Build an upstream error from a backend HTTP status using the default
    /// translation table. Adapters with bespoke tables construct directly.
    #[must_use]
    pub fn upstream(store_name: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let code = ErrorCode::from_status(status);
        Self {
            store_name: Some(store_name.into()),
            code,
            status_code: status,
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store_name: impl Into<String>) -> Self {
        self.store_name = Some(store_name.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl Display for StoreError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match &self.store_name {
            Some(store) => write!(formatter, "[{store}] {}: {}", self.code.as_str(), self.message),
            None => write!(formatter, "{}: {}", self.code.as_str(), self.message),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_status_round_trip() {
        assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
        assert_eq!(ErrorCode::from_status(403), ErrorCode::Unauthorized);
        assert_eq!(ErrorCode::from_status(404), ErrorCode::NotFound);
        assert_eq!(ErrorCode::from_status(409), ErrorCode::Conflict);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::ServiceUnavailable);
        assert_eq!(ErrorCode::from_status(422), ErrorCode::BadRequest);
        assert_eq!(ErrorCode::from_status(301), ErrorCode::Unknown);
    }

    #[test]
    fn store_error_display_includes_store() {
        let err = StoreError::not_found("torrent not found").with_store("qbittorrent");
        assert_eq!(
            err.to_string(),
            "[qbittorrent] not_found: torrent not found"
        );
        assert_eq!(err.status_code, 404);
    }

    #[test]
    fn upstream_error_preserves_status() {
        let err = StoreError::upstream("alldebrid", 451, "blocked");
        assert_eq!(err.code, ErrorCode::UnavailableForLegalReasons);
        assert_eq!(err.status_code, 451);
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = StoreError::service_unavailable("upstream down").with_cause(cause);
        assert!(err.source().is_some());
    }
}
