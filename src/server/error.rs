use crate::error::AppError;
use crate::models::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Body of every 5xx response; the cause stays in the server log
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Error returned from a handler
#[derive(Debug)]
pub struct ServerError(pub AppError);

impl ServerError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// The 500 response used for unexpected errors and caught panics
    pub fn internal_response() -> Response {
        let body = ErrorBody { error: INTERNAL_ERROR_MESSAGE.to_string() };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

impl From<AppError> for ServerError {
    fn from(error: AppError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            return Self::internal_response();
        }

        let body = ErrorBody { error: self.0.to_string() };
        (status, Json(body)).into_response()
    }
}
