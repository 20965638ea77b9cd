use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::require_workspace;
use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{CreatePolicyRequest, UpdatePolicyRequest};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt};
use crate::types::RlsPolicy;
use crate::validation::validate_identifier;

pub async fn list_policies(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    let policies = state.meta.list_policies(&id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(policies)))
}

/// Creates a policy on an existing table column.
pub async fn create_policy(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreatePolicyRequest>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    validate_identifier(&req.table_name, "Table").map_err(ApiError::bad_request)?;
    validate_identifier(&req.column_name, "Column").map_err(ApiError::bad_request)?;
    if req.match_field.trim().is_empty() {
        return Err(ApiError::bad_request("match_field is required"));
    }

    let schema = state.tenants.get_schema(&id, &req.table_name)?;
    let Some(column) = schema.column(&req.column_name) else {
        return Err(ApiError::bad_request(format!(
            "table {} has no column {}",
            schema.name, req.column_name
        )));
    };

    let policy = RlsPolicy {
        id: Uuid::new_v4().to_string(),
        workspace_id: id.clone(),
        table_name: schema.name.clone(),
        column_name: column.name.clone(),
        match_field: req.match_field.trim().to_string(),
        active: req.active,
        created_at: Utc::now(),
    };
    state.meta.create_policy(&policy)?;
    state.audit.record(
        &id,
        "policy.create",
        &policy.table_name,
        json!({ "policy_id": policy.id, "column": policy.column_name }),
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::success(policy))))
}

pub async fn update_policy(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, policy_id)): Path<(String, String)>,
    Json(req): Json<UpdatePolicyRequest>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    if !state.meta.set_policy_active(&id, &policy_id, req.active)? {
        return Err(ApiError::not_found("Policy not found"));
    }
    let policy = state
        .meta
        .get_policy(&id, &policy_id)?
        .or_not_found("Policy not found")?;
    state.audit.record(
        &id,
        "policy.update",
        &policy.table_name,
        json!({ "policy_id": policy.id, "active": policy.active }),
    );
    Ok(Json(ApiResponse::success(policy)))
}
