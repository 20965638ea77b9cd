//! Public runtime surface: `/runtime/{slug}/api/*` forwards to the
//! workspace's JavaScript routes, `/runtime/{slug}/data/{table}` is the
//! generic tabular API under row-level security.

mod api;
mod data;
mod hooks;

use std::sync::Arc;

use axum::{
    Router,
    routing::{any, get},
};

use crate::server::AppState;
use crate::server::response::{RuntimeError, blocking};
use crate::types::Workspace;

pub fn runtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/runtime/{slug}/api", any(api::dispatch_root))
        .route("/runtime/{slug}/api/", any(api::dispatch_root))
        .route("/runtime/{slug}/api/{*path}", any(api::dispatch))
        .route(
            "/runtime/{slug}/data/{table}",
            get(data::list_rows)
                .post(data::insert_row)
                .put(data::update_row)
                .delete(data::delete_rows),
        )
}

/// Resolves a published workspace by slug.
async fn published(state: &Arc<AppState>, slug: String) -> Result<Workspace, RuntimeError> {
    if slug.trim().is_empty() {
        return Err(RuntimeError::bad_request("workspace slug is required"));
    }
    let state = state.clone();
    Ok(blocking(move || state.resolver.resolve(&slug)).await?)
}
