//! HTTP error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use qers_core::GapError;

/// Error returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    Gap(GapError),
    /// The request body was not a valid `BatchRequest`.
    BadRequest(String),
}

/// JSON body returned on error.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Gap(e) => status_for_error(e),
        }
    }
}

fn status_for_error(e: &GapError) -> StatusCode {
    match e {
        GapError::BatchConfig(_) => StatusCode::BAD_REQUEST,
        GapError::UnknownProfile(_) | GapError::UnknownBatch(_) | GapError::BatchNotReady { .. } => {
            StatusCode::NOT_FOUND
        }
        GapError::Evaluation(_) | GapError::InconsistentMetrics { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Gap(e) => {
                if status.is_server_error() {
                    tracing::error!(error = %e, "request failed");
                }
                e.to_string()
            }
        };
        (status, axum::Json(ErrorBody { error })).into_response()
    }
}

impl From<GapError> for ApiError {
    fn from(e: GapError) -> Self {
        ApiError::Gap(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}
