//! Error responses for the HTTP API.

use crate::storage::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP API error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Missing or malformed request data
    #[error("{0}")]
    BadRequest(String),

    /// No live entry under the key
    #[error("{0}")]
    NotFound(String),

    /// Key already exists
    #[error("{0}")]
    Conflict(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

impl From<StoreError> for HttpError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AlreadyExists(_) => HttpError::Conflict(e.to_string()),
            StoreError::NotFound(_) => HttpError::NotFound(e.to_string()),
            StoreError::InvalidArgument(_) => HttpError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let cases = [
            (StoreError::AlreadyExists("k".into()), StatusCode::CONFLICT),
            (StoreError::NotFound("k".into()), StatusCode::NOT_FOUND),
            (StoreError::InvalidArgument("bad".into()), StatusCode::BAD_REQUEST),
        ];

        for (err, status) in cases {
            assert_eq!(HttpError::from(err).status(), status);
        }
    }
}
