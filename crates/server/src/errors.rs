use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use multiclient_core::engine::{DispatchError, EngineFailure, PoolError};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<&'a [EngineFailure]>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Dispatch(DispatchError::PoolEmpty | DispatchError::Cancelled) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Dispatch(DispatchError::AllEnginesFailed { .. }) => StatusCode::BAD_GATEWAY,
            Self::Pool(PoolError::NotFound(_)) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Pool(PoolError::Full(_) | PoolError::AtMinimum(_)) | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::Pool(PoolError::Connect { .. }) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Dispatch(e) => e.as_str(),
            Self::Pool(PoolError::NotFound(_)) | Self::NotFound(_) => "not_found",
            Self::Pool(PoolError::Full(_)) => "pool_full",
            Self::Pool(PoolError::AtMinimum(_)) => "pool_at_minimum",
            Self::Pool(PoolError::Connect { .. }) => "connect_failed",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let failures = match &self {
            Self::Dispatch(DispatchError::AllEnginesFailed { failures }) => {
                Some(failures.as_slice())
            }
            _ => None,
        };
        let body = ErrorBody { kind: self.kind(), message: self.to_string(), failures };

        (self.status(), Json(body)).into_response()
    }
}
