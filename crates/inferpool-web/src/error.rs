//! HTTP error envelope.
//!
//! Every failure leaves the edge as an OpenAI-style error object:
//!
//! ```json
//! {"error": {"message": "...", "type": "...", "param": null, "code": "..."}}
//! ```
//!
//! so OpenAI client libraries pointed at this dispatcher surface readable
//! errors without special casing.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use inferpool_kernel::DispatchError;

/// An error response carrying its HTTP status and envelope fields.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    error_type: &'static str,
    param: Option<String>,
    code: &'static str,
}

impl ApiError {
    /// 401 — credential parse failure, unknown user, ban, or secret mismatch.
    pub fn invalid_token() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "invalid or expired token".into(),
            error_type: "authentication_error",
            param: None,
            code: "invalid_token",
        }
    }

    /// 400 — unknown model id or worker metadata mismatch.
    pub fn invalid_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            status: StatusCode::BAD_REQUEST,
            message: format!("model not supported: {model}"),
            error_type: "invalid_request_error",
            param: Some("model".into()),
            code: "invalid_model",
        }
    }

    /// 404 — submit for a task that is unknown or already settled.
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "task not found".into(),
            error_type: "invalid_request_error",
            param: None,
            code: "not_found",
        }
    }

    /// 408 — the dispatch deadline passed without a result.
    pub fn timeout() -> Self {
        Self {
            status: StatusCode::REQUEST_TIMEOUT,
            message: "request timed out waiting for a compute provider".into(),
            error_type: "timeout_error",
            param: None,
            code: "timeout",
        }
    }

    /// 400 — a required request field was absent.
    pub fn missing_field(field: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: format!("missing field: {field}"),
            error_type: "invalid_request_error",
            param: Some(field.into()),
            code: "missing_field",
        }
    }

    /// 500 — store or queue failure; the request rolls back, the process
    /// keeps running.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            error_type: "api_error",
            param: None,
            code: "internal_error",
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::InvalidToken => Self::invalid_token(),
            DispatchError::InvalidModel { model } => Self::invalid_model(model),
            DispatchError::TaskNotFound { .. } => Self::not_found(),
            DispatchError::Timeout { .. } => Self::timeout(),
            DispatchError::MissingField { field } => Self::missing_field(field),
            DispatchError::QueuePoisoned(e) => {
                tracing::error!(error = %e, "queue failure surfaced to the edge");
                Self::internal("internal queue error")
            }
            DispatchError::Store(e) => {
                tracing::error!(error = %e, "store failure surfaced to the edge");
                Self::internal("internal storage error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "message": self.message,
                "type": self.error_type,
                "param": self.param,
                "code": self.code,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
