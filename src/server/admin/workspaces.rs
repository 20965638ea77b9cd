use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::{Value, json};

use super::require_workspace;
use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{DeployCodeRequest, DeployCodeResponse, UpsertWorkspaceRequest};
use crate::server::response::{ApiError, ApiResponse};
use crate::types::Workspace;
use crate::validation::{validate_slug, validate_workspace_id};

pub async fn upsert_workspace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpsertWorkspaceRequest>,
) -> impl IntoResponse {
    validate_workspace_id(&id).map_err(ApiError::bad_request)?;
    validate_slug(&req.slug).map_err(ApiError::bad_request)?;

    let settings = req.settings.unwrap_or_else(|| json!({}));
    if !settings.is_object() {
        return Err(ApiError::bad_request("settings must be an object"));
    }

    let existing = state.meta.get_workspace(&id)?;
    let now = Utc::now();
    let ws = Workspace {
        id: id.clone(),
        slug: req.slug,
        app_status: req.app_status,
        settings,
        created_at: existing.as_ref().map_or(now, |w| w.created_at),
        updated_at: now,
    };

    state.meta.upsert_workspace(&ws)?;
    state.tenants.workspace(&ws.id)?;

    if let Some(previous) = &existing {
        state.resolver.forget(&previous.slug);
    }
    state.resolver.forget(&ws.slug);

    let status = if existing.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::success(ws))))
}

pub async fn get_workspace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let ws = require_workspace(&state, &id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(ws)))
}

/// Stores new source and drops the running VM so the next request loads it.
pub async fn deploy_code(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DeployCodeRequest>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;

    let code = state.meta.put_code(&id, &req.source)?;
    state.pool.invalidate(&id);
    state.audit.record(&id, "code.deploy", &code.hash, Value::Null);

    Ok::<_, ApiError>(Json(ApiResponse::success(DeployCodeResponse {
        hash: code.hash,
        updated_at: code.updated_at,
    })))
}

pub async fn vm_status(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(state.pool.status(&id))))
}

pub async fn invalidate_vm(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    state.pool.invalidate(&id);
    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
