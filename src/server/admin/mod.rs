mod app_users;
mod database;
mod policies;
mod workspaces;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post, put},
};

use crate::server::AppState;
use crate::server::response::{ApiError, StoreOptionExt};
use crate::types::Workspace;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // Workspace routes
        .route(
            "/workspaces/{id}",
            put(workspaces::upsert_workspace).get(workspaces::get_workspace),
        )
        .route("/workspaces/{id}/code", put(workspaces::deploy_code))
        .route("/workspaces/{id}/vm", get(workspaces::vm_status))
        .route("/workspaces/{id}/vm/invalidate", post(workspaces::invalidate_vm))
        // Tenant database routes
        .route(
            "/workspaces/{id}/database/tables",
            get(database::list_tables).post(database::create_table),
        )
        .route(
            "/workspaces/{id}/database/tables/{table}",
            get(database::get_table)
                .patch(database::alter_table)
                .delete(database::drop_table),
        )
        .route("/workspaces/{id}/database/query", post(database::execute_query))
        .route("/workspaces/{id}/database/stats", get(database::stats))
        // Policy routes
        .route(
            "/workspaces/{id}/policies",
            get(policies::list_policies).post(policies::create_policy),
        )
        .route(
            "/workspaces/{id}/policies/{policy_id}",
            patch(policies::update_policy),
        )
        // App user routes
        .route("/workspaces/{id}/app-users", post(app_users::create_app_user))
        .route(
            "/workspaces/{id}/app-users/{user_id}/sessions",
            post(app_users::create_session),
        )
}

fn require_workspace(state: &AppState, id: &str) -> Result<Workspace, ApiError> {
    state
        .meta
        .get_workspace(id)?
        .or_not_found("Workspace not found")
}
