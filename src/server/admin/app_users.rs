use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use super::require_workspace;
use crate::auth::{RequireAdmin, generate_session_token};
use crate::server::AppState;
use crate::server::dto::{CreateAppUserRequest, CreateSessionRequest, SessionResponse};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt};
use crate::types::{AppSession, AppUser};

pub async fn create_app_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateAppUserRequest>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;

    let email = req.email.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("a valid email is required"));
    }
    let attributes = req.attributes.unwrap_or_else(|| json!({}));
    if !attributes.is_object() {
        return Err(ApiError::bad_request("attributes must be an object"));
    }

    let user = AppUser {
        id: Uuid::new_v4().to_string(),
        workspace_id: id,
        email,
        attributes,
        created_at: Utc::now(),
    };
    state.meta.create_app_user(&user)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(user))))
}

/// Issues a session token for an app user. The raw token is only ever
/// returned here.
pub async fn create_session(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
    req: Option<Json<CreateSessionRequest>>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    let user = state
        .meta
        .get_app_user(&id, &user_id)?
        .or_not_found("App user not found")?;

    let req = req.map(|Json(r)| r).unwrap_or_default();
    let now = Utc::now();
    let expires_at = match req.expires_in_seconds {
        Some(secs) if secs <= 0 => {
            return Err(ApiError::bad_request("expires_in_seconds must be positive"));
        }
        Some(secs) => Some(
            Duration::try_seconds(secs)
                .and_then(|ttl| now.checked_add_signed(ttl))
                .ok_or_else(|| ApiError::bad_request("expires_in_seconds is too large"))?,
        ),
        None => None,
    };

    let (token, token_hash) = generate_session_token();
    state.meta.create_session(&AppSession {
        token_hash,
        app_user_id: user.id,
        workspace_id: id,
        created_at: now,
        expires_at,
    })?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(SessionResponse { token, expires_at })),
    ))
}
