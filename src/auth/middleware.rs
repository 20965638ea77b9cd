use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{TokenExtractError, extract_app_token, extract_bearer_token};
use super::token::{digest_token, digests_match};
use crate::server::AppState;

/// Extractor that requires the operator token on the admin surface.
pub struct RequireAdmin;

/// The end-user session token from `X-App-Token`, if any.
///
/// Never rejects: whether a missing token matters is up to row-level
/// security.
pub struct AppToken(pub Option<String>);

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    NotConfigured,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "unauthorized", "Authentication required"),
            AuthError::InvalidScheme => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Invalid authorization scheme",
            ),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "unauthorized", "Invalid token"),
            AuthError::NotConfigured => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Admin access is not configured",
            ),
        };

        let mut response = (status, Json(json!({ "code": code, "message": message }))).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"tenant-runtime\""),
            );
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let expected = state
            .admin_token_hash
            .as_deref()
            .ok_or(AuthError::NotConfigured)?;

        let token = extract_bearer_token(&parts.headers)
            .map_err(|e| match e {
                TokenExtractError::InvalidScheme => AuthError::InvalidScheme,
                TokenExtractError::Empty => AuthError::InvalidToken,
            })?
            .ok_or(AuthError::MissingAuth)?;

        if !digests_match(&digest_token(&token), expected) {
            return Err(AuthError::InvalidToken);
        }

        Ok(RequireAdmin)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AppToken {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(AppToken(extract_app_token(&parts.headers)))
    }
}
