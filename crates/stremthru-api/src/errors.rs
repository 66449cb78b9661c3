//! Response envelopes: `{"data": …}` on success, `{"error": {...}}` on
//! failure.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use stremthru_core::StoreError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Success envelope.
pub struct Data<T>(pub T);

#[derive(Serialize)]
struct DataBody<T> {
    data: T,
}

impl<T: Serialize> IntoResponse for Data<T> {
    fn into_response(self) -> Response {
        Json(DataBody { data: self.0 }).into_response()
    }
}

/// Failure envelope wrapping the normalized store error.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
    message: &'a str,
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    store_name: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = &self.0;
        tracing::debug!(error = %error, "request failed");
        let status =
            StatusCode::from_u16(error.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: ErrorDetail {
                kind: if error.store_name.is_some() {
                    "store_error"
                } else {
                    "api_error"
                },
                code: error.code.as_str(),
                message: &error.message,
                status_code: error.status_code,
                store_name: error.store_name.as_deref(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_envelope_shape() {
        let response =
            ApiError(StoreError::not_found("torrent not found").with_store("qbittorrent"))
                .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["error"]["code"], "not_found");
        assert_eq!(value["error"]["status_code"], 404);
        assert_eq!(value["error"]["type"], "store_error");
        assert_eq!(value["error"]["store_name"], "qbittorrent");
    }

    #[tokio::test]
    async fn data_envelope_shape() {
        let response = Data(serde_json::json!({"id": "x"})).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["data"]["id"], "x");
    }
}
