//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notify::NotifyError;
use orders::OrderError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client (malformed header, body, or path).
    BadRequest(String),
    /// Application error from the order or catalog services.
    App(OrderError),
    /// Error from the notification consumer side.
    Notify(NotifyError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::App(err) => order_error_to_response(err),
            ApiError::Notify(err) => notify_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    match &err {
        OrderError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        OrderError::Authorization(_) => (StatusCode::FORBIDDEN, err.to_string()),
        OrderError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        OrderError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
        OrderError::BusinessRule(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        OrderError::Serialization(_) | OrderError::Internal(_) => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn notify_error_to_response(err: NotifyError) -> (StatusCode, String) {
    match &err {
        NotifyError::Malformed(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        NotifyError::Store(_) => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::App(err)
    }
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        ApiError::Notify(err)
    }
}
