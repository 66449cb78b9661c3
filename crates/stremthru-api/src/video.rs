//! Static explanatory videos for playback failures.
//!
//! When a player follows a playback URL that cannot be served, redirecting
//! to a short video explaining why beats an opaque error page.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};

use stremthru_core::{ErrorCode, StoreError};

const VIDEO_BASE_URL: &str = "https://videos.stremthru.dev";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoName {
    Unauthorized,
    Forbidden,
    NotFound,
    TooManyRequests,
    UnavailableForLegalReasons,
    NoMatchingFile,
    Downloading,
    DownloadFailed,
    StoreLimitExceeded,
    PaymentRequired,
    Internal,
}

impl VideoName {
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Unauthorized => "401",
            Self::Forbidden => "403",
            Self::NotFound => "404",
            Self::TooManyRequests => "429",
            Self::UnavailableForLegalReasons => "451",
            Self::NoMatchingFile => "no_matching_file",
            Self::Downloading => "downloading",
            Self::DownloadFailed => "download_failed",
            Self::StoreLimitExceeded => "store_limit_exceeded",
            Self::PaymentRequired => "payment_required",
            Self::Internal => "500",
        }
    }

    #[must_use]
    pub fn url(self) -> String {
        format!("{VIDEO_BASE_URL}/{}.mp4", self.slug())
    }

    #[must_use]
    pub fn for_error(error: &StoreError) -> Self {
        match error.code {
            ErrorCode::Unauthorized => Self::Unauthorized,
            ErrorCode::Forbidden => Self::Forbidden,
            ErrorCode::NotFound => Self::NotFound,
            ErrorCode::TooManyRequests => Self::TooManyRequests,
            ErrorCode::UnavailableForLegalReasons => Self::UnavailableForLegalReasons,
            ErrorCode::StoreLimitExceeded => Self::StoreLimitExceeded,
            ErrorCode::PaymentRequired => Self::PaymentRequired,
            _ => Self::Internal,
        }
    }
}

/// 302 to the explanatory video.
#[must_use]
pub fn redirect(video: VideoName) -> Response {
    let mut response = Redirect::temporary(&video.url()).into_response();
    *response.status_mut() = StatusCode::FOUND;
    response
}
