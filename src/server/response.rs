use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::error::{Error, Result};

/// Success envelope on the admin surface.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    #[must_use]
    pub fn success(data: T) -> Self {
        Self { data }
    }
}

/// Status code for an error on either surface.
#[must_use]
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) | Error::TableNotFound(_) => StatusCode::NOT_FOUND,
        Error::NotReady(_) | Error::TableExists(_) | Error::Conflict(_) => StatusCode::CONFLICT,
        Error::NoCode | Error::CompileError(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::QueryTimeout => StatusCode::REQUEST_TIMEOUT,
        Error::Timeout(_)
        | Error::Interrupted(_)
        | Error::HandlerError(_)
        | Error::Database(_)
        | Error::Io(_)
        | Error::Config(_)
        | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_internal(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_)
    )
}

/// Admin surface error, rendered as `{"code": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::NotFound(_) => "not_found",
            Error::TableNotFound(_) => "table_not_found",
            Error::TableExists(_) => "table_exists",
            Error::NotReady(_) => "not_ready",
            Error::NoCode => "no_code",
            Error::CompileError(_) => "compile_error",
            Error::InvalidInput(_) => "invalid_input",
            Error::Forbidden(_) => "forbidden",
            Error::Conflict(_) => "conflict",
            Error::QueryTimeout => "query_timeout",
            Error::Timeout(_) => "timeout",
            Error::Interrupted(_) => "interrupted",
            Error::HandlerError(_) => "handler_error",
            Error::Database(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => "internal",
        };
        if is_internal(&err) {
            tracing::error!(error = %err, "admin request failed");
            return Self::internal("Internal server error");
        }
        Self::new(status_for(&err), code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "code": self.code, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

/// Runtime surface error, rendered as `{"error": ...}`.
///
/// Compile failures and internal errors are replaced by fixed messages so
/// that nothing about the deployed source or the host leaks to app clients.
#[derive(Debug)]
pub struct RuntimeError {
    pub status: StatusCode,
    pub message: String,
}

impl RuntimeError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<Error> for RuntimeError {
    fn from(err: Error) -> Self {
        let message = match &err {
            Error::CompileError(_) => "VM not available".to_string(),
            Error::NoCode => "no code deployed for this workspace".to_string(),
            _ if is_internal(&err) => {
                tracing::error!(error = %err, "runtime request failed");
                "internal error".to_string()
            }
            _ => err.to_string(),
        };
        Self {
            status: status_for(&err),
            message,
        }
    }
}

impl IntoResponse for RuntimeError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// `Json` for the runtime surface: a malformed body becomes a 400 in the
/// `{ "error": ... }` shape instead of axum's plain-text rejection.
pub struct RuntimeJson<T>(pub T);

impl<T, S> FromRequest<S> for RuntimeJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = RuntimeError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(RuntimeError::bad_request(rejection.body_text())),
        }
    }
}

/// Extension for Option types from store operations.
pub trait StoreOptionExt<T> {
    fn or_not_found(self, message: &'static str) -> std::result::Result<T, ApiError>;
}

impl<T> StoreOptionExt<T> for Option<T> {
    fn or_not_found(self, message: &'static str) -> std::result::Result<T, ApiError> {
        self.ok_or_else(|| ApiError::not_found(message))
    }
}

/// Runs a blocking store call off the async workers.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
}
