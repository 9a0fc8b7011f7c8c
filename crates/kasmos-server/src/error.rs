use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kasmos_store::StoreError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("{resource} already exists")]
    Conflict { resource: String },
    #[error("invalid request: {message}")]
    BadRequest { message: String },
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl From<StoreError> for WebError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, key } => Self::NotFound {
                resource: format!("{kind}: {key}"),
            },
            StoreError::AlreadyExists { kind, key } => Self::Conflict {
                resource: format!("{kind}: {key}"),
            },
            StoreError::Unreachable { cause } => Self::Unavailable { message: cause },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::NotFound { .. } => StatusCode::NOT_FOUND,
            WebError::Conflict { .. } => StatusCode::CONFLICT,
            WebError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            WebError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WebError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
