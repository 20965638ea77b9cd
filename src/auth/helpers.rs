use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

/// Header carrying an end-user session token on the runtime surface.
pub const APP_TOKEN_HEADER: &str = "x-app-token";

#[derive(Debug, PartialEq, Eq)]
pub enum TokenExtractError {
    InvalidScheme,
    Empty,
}

/// Extracts a token from an `Authorization: Bearer` header.
/// Returns `None` when the header is absent.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<String>, TokenExtractError> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let header = header.to_str().map_err(|_| TokenExtractError::InvalidScheme)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(TokenExtractError::InvalidScheme)?
        .trim();
    if token.is_empty() {
        return Err(TokenExtractError::Empty);
    }
    Ok(Some(token.to_string()))
}

/// Reads the app session token, ignoring blank or non-ASCII values.
#[must_use]
pub fn extract_app_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(APP_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
