//! JSON envelope shared by every API endpoint.
//!
//! `{"status": "success" | "error", "message": ..., "data": ...}`

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::CACHE_CONTROL},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

const DEFAULT_SUCCESS_MESSAGE: &str = "Operation successful";
const GENERIC_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    status: &'static str,
    message: &'a str,
    data: &'a Value,
}

fn envelope(code: StatusCode, status: &'static str, message: &str, data: &Value) -> Response {
    let mut response = (
        code,
        Json(Envelope {
            status,
            message,
            data,
        }),
    )
        .into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Successful handler output.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    message: String,
    data: Value,
}

impl Reply {
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            message: DEFAULT_SUCCESS_MESSAGE.to_string(),
            data,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        envelope(StatusCode::OK, "success", &self.message, &self.data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unauthorized: please log in")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// Handler-chosen status; clamped into 400..=599.
    #[error("{message}")]
    Status { code: u16, message: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Status { code, .. } => clamp_error_status(*code),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the error envelope; internal details only leave the process in debug mode.
    #[must_use]
    pub fn into_response_with(self, debug: bool) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(err) => {
                error!("Internal error: {err:#}");
                if debug {
                    format!("{err:#}")
                } else {
                    GENERIC_ERROR_MESSAGE.to_string()
                }
            }
            other => other.to_string(),
        };
        warn!(status = status.as_u16(), "API error: {message}");
        envelope(status, "error", &message, &Value::Null)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}

/// Error codes outside 400..=599 become 400.
pub(crate) fn clamp_error_status(code: u16) -> StatusCode {
    if (400..=599).contains(&code) {
        StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
    } else {
        StatusCode::BAD_REQUEST
    }
}
