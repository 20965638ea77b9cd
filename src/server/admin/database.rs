use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::require_workspace;
use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::{ExecuteSqlRequest, ExecuteSqlResponse};
use crate::server::response::{ApiError, ApiResponse};
use crate::store::PolicyStore;
use crate::types::value::params_from_json;
use crate::types::{AlterTable, BlobEncoding, TableDef, rows_to_json};

const POLICY_CONFLICT: &str =
    "column is referenced by an active RLS policy; disable the policy first";

pub async fn list_tables(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    let tables = state.tenants.list_tables(&id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(tables)))
}

pub async fn create_table(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(def): Json<TableDef>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    state.tenants.create_table(&id, &def)?;
    let schema = state.tenants.get_schema(&id, &def.name)?;
    state.audit.record(&id, "table.create", &def.name, json!({}));
    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(schema))))
}

pub async fn get_table(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, table)): Path<(String, String)>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    let schema = state.tenants.get_schema(&id, &table)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(schema)))
}

pub async fn alter_table(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, table)): Path<(String, String)>,
    Json(change): Json<AlterTable>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;

    let active = state.meta.list_active_policies(&id, &table)?;
    let touched = match &change {
        AlterTable::AddColumn { .. } => None,
        AlterTable::RenameColumn { from, .. } => Some(from.as_str()),
        AlterTable::RetypeColumn { name, .. } | AlterTable::DropColumn { name } => {
            Some(name.as_str())
        }
        AlterTable::RenameTable { .. } => {
            if !active.is_empty() {
                return Err(ApiError::conflict(
                    "table has active RLS policies; disable them first",
                ));
            }
            None
        }
    };
    if let Some(column) = touched {
        if active
            .iter()
            .any(|p| p.column_name.eq_ignore_ascii_case(column))
        {
            return Err(ApiError::conflict(POLICY_CONFLICT));
        }
    }

    state.tenants.alter_table(&id, &table, &change)?;
    let current = match &change {
        AlterTable::RenameTable { name } => name.as_str(),
        _ => table.as_str(),
    };
    let schema = state.tenants.get_schema(&id, current)?;
    state.audit.record(&id, "table.alter", &table, json!({ "change": change }));
    Ok(Json(ApiResponse::success(schema)))
}

pub async fn drop_table(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((id, table)): Path<(String, String)>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    if !state.meta.list_active_policies(&id, &table)?.is_empty() {
        return Err(ApiError::conflict(
            "table has active RLS policies; disable them first",
        ));
    }
    state.tenants.drop_table(&id, &table)?;
    state.audit.record(&id, "table.drop", &table, json!({}));
    Ok(StatusCode::NO_CONTENT)
}

/// Runs one statement through the allow-list.
pub async fn execute_query(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ExecuteSqlRequest>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    let params = params_from_json(&req.params)?;
    let result = state.tenants.execute_sql(&id, &req.sql, &params)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(ExecuteSqlResponse {
        rows: rows_to_json(&result.columns, &result.rows, BlobEncoding::Base64),
        columns: result.columns,
        affected_rows: result.affected_rows,
        last_insert_id: result.last_insert_id,
    })))
}

pub async fn stats(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    require_workspace(&state, &id)?;
    let stats = state.tenants.stats(&id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(stats)))
}
