//! Data-layer error type.

use thiserror::Error;

pub type DataResult<T> = std::result::Result<T, DataError>;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("database query failed: {operation}")]
    QueryFailed {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to encode record: {operation}")]
    Encode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DataError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::QueryFailed { operation, source }
    }

    pub(crate) fn encode(operation: &'static str) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| Self::Encode { operation, source }
    }
}
