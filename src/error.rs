use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

use crate::db::PoolFailure;
use crate::tracking::TrackingError;

pub type AppResult<T> = Result<T, AppError>;

pub const LINK_UNAVAILABLE: &str = "link no longer valid";

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, message)
    }

    /// What an end viewer sees for both unknown and revoked links.
    pub fn link_unavailable() -> Self {
        Self::gone(LINK_UNAVAILABLE)
    }

    /// Logs the detail and answers with a generic message.
    pub fn internal<E: Display>(error: E) -> Self {
        error!(error = %error, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Viewer endpoints must not reveal whether a token never existed or was revoked.
    pub fn for_viewer(err: TrackingError) -> Self {
        match err {
            TrackingError::NotFound(_) | TrackingError::Gone => Self::link_unavailable(),
            other => other.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<TrackingError> for AppError {
    fn from(value: TrackingError) -> Self {
        match value {
            TrackingError::Validation(message) => AppError::bad_request(message),
            TrackingError::NotFound(what) => {
                AppError::new(StatusCode::NOT_FOUND, format!("{what} not found"))
            }
            TrackingError::Gone => AppError::gone("distribution is no longer available"),
            TrackingError::Ownership(_) => AppError::forbidden("forbidden"),
            other => AppError::internal(other),
        }
    }
}

impl From<PoolFailure> for AppError {
    fn from(value: PoolFailure) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}
