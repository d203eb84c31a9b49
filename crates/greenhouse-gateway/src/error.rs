use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use greenhouse_common::Error;
use serde_json::json;
use tracing::warn;

/// An [`Error`] rendered as `{"error": "..."}` with a status to match.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(Error::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::UpstreamOpen(_) | Error::UpstreamStream(_) => StatusCode::BAD_GATEWAY,
            Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let message = match self.0 {
            Error::Validation(msg) | Error::Unauthorized(msg) => msg,
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
