use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::{Map, Value, json};

use super::hooks::{self, HookEvent, HookOutcome};
use super::published;
use crate::auth::AppToken;
use crate::error::{Error, Result};
use crate::runtime::RlsScope;
use crate::server::AppState;
use crate::server::dto::{AffectedRows, DeleteRowsRequest, RowsPage, WriteRowRequest};
use crate::server::response::{RuntimeError, RuntimeJson, blocking};
use crate::types::value::{RowData, from_json, row_from_json, to_json};
use crate::types::{
    BlobEncoding, Combinator, DEFAULT_PAGE_SIZE, Filter, FilterOp, MAX_PAGE_SIZE, OrderDir,
    QueryParams,
};

/// Filters beyond this index are ignored.
const MAX_FILTERS: usize = 20;

pub async fn list_rows(
    State(state): State<Arc<AppState>>,
    Path((slug, table)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
    AppToken(token): AppToken,
) -> std::result::Result<Json<RowsPage>, RuntimeError> {
    let mut params = parse_query(query)?;
    let workspace = published(&state, slug).await?;
    let scope = rls_scope(&state, &workspace.id, &table, token).await?;
    params.scope = scope.filters;

    let tenants = state.tenants.clone();
    let result = blocking(move || tenants.query_rows(&workspace.id, &table, &params)).await?;

    Ok(Json(RowsPage {
        rows: result.rows_json(BlobEncoding::Base64),
        columns: result.columns,
        total: result.total,
    }))
}

pub async fn insert_row(
    State(state): State<Arc<AppState>>,
    Path((slug, table)): Path<(String, String)>,
    AppToken(token): AppToken,
    RuntimeJson(req): RuntimeJson<WriteRowRequest>,
) -> std::result::Result<Json<AffectedRows>, RuntimeError> {
    let workspace = published(&state, slug).await?;
    let scope = rls_scope(&state, &workspace.id, &table, token).await?;
    if scope.is_denied() {
        return Err(Error::Forbidden("a valid app session is required to write this table".into()).into());
    }

    let mut data = req.data;
    match hooks::run_before(&state, &workspace, HookEvent::BeforeInsert, &table, &data).await {
        HookOutcome::Reject(message) => return Err(RuntimeError::bad_request(message)),
        HookOutcome::Allow(extra) => data.extend(extra),
    }

    let mut row = row_from_json(&data)?;
    scope.stamp(&mut row);
    let written = written_row(&row);

    let tenants = state.tenants.clone();
    let (workspace_id, table_name) = (workspace.id.clone(), table.clone());
    let result = blocking(move || tenants.insert_row(&workspace_id, &table_name, &row)).await?;

    if result.affected_rows > 0 {
        state.audit.record(
            &workspace.id,
            "data.insert",
            &table,
            json!({ "affected_rows": result.affected_rows, "last_insert_id": result.last_insert_id }),
        );
        hooks::spawn_after(
            state.clone(),
            workspace,
            HookEvent::AfterInsert,
            table,
            written,
            result.last_insert_id,
        );
    }

    Ok(Json(AffectedRows {
        affected_rows: result.affected_rows,
    }))
}

pub async fn update_row(
    State(state): State<Arc<AppState>>,
    Path((slug, table)): Path<(String, String)>,
    AppToken(token): AppToken,
    RuntimeJson(req): RuntimeJson<WriteRowRequest>,
) -> std::result::Result<Json<AffectedRows>, RuntimeError> {
    let workspace = published(&state, slug).await?;
    let scope = rls_scope(&state, &workspace.id, &table, token).await?;

    let mut data = req.data;
    match hooks::run_before(&state, &workspace, HookEvent::BeforeUpdate, &table, &data).await {
        HookOutcome::Reject(message) => return Err(RuntimeError::bad_request(message)),
        HookOutcome::Allow(extra) => data.extend(extra),
    }

    let mut row = row_from_json(&data)?;
    scope.stamp(&mut row);
    let written = written_row(&row);

    let tenants = state.tenants.clone();
    let (workspace_id, table_name) = (workspace.id.clone(), table.clone());
    let filters = scope.filters;
    let result =
        blocking(move || tenants.update_row(&workspace_id, &table_name, &row, &filters)).await?;

    if result.affected_rows > 0 {
        state.audit.record(
            &workspace.id,
            "data.update",
            &table,
            json!({ "affected_rows": result.affected_rows }),
        );
        hooks::spawn_after(
            state.clone(),
            workspace,
            HookEvent::AfterUpdate,
            table,
            written,
            None,
        );
    }

    Ok(Json(AffectedRows {
        affected_rows: result.affected_rows,
    }))
}

pub async fn delete_rows(
    State(state): State<Arc<AppState>>,
    Path((slug, table)): Path<(String, String)>,
    AppToken(token): AppToken,
    RuntimeJson(req): RuntimeJson<DeleteRowsRequest>,
) -> std::result::Result<Json<AffectedRows>, RuntimeError> {
    let workspace = published(&state, slug).await?;
    let ids = req.ids.iter().map(from_json).collect::<Result<Vec<_>>>()?;
    let scope = rls_scope(&state, &workspace.id, &table, token).await?;

    let tenants = state.tenants.clone();
    let (workspace_id, table_name) = (workspace.id.clone(), table.clone());
    let filters = scope.filters;
    let result =
        blocking(move || tenants.delete_rows(&workspace_id, &table_name, &ids, &filters)).await?;

    if result.affected_rows > 0 {
        state.audit.record(
            &workspace.id,
            "data.delete",
            &table,
            json!({ "affected_rows": result.affected_rows }),
        );
    }

    Ok(Json(AffectedRows {
        affected_rows: result.affected_rows,
    }))
}

/// The row as handed to the store, for after-hooks.
fn written_row(row: &RowData) -> Map<String, Value> {
    row.iter()
        .map(|(column, value)| (column.clone(), to_json(value, BlobEncoding::Base64)))
        .collect()
}

async fn rls_scope(
    state: &Arc<AppState>,
    workspace_id: &str,
    table: &str,
    token: Option<String>,
) -> std::result::Result<RlsScope, RuntimeError> {
    let state = state.clone();
    let (workspace_id, table) = (workspace_id.to_string(), table.to_string());
    Ok(blocking(move || state.rls.scope(&workspace_id, &table, token.as_deref())).await?)
}

/// Reads `page`, `page_size`, `order_by`, `order_dir`, `filter_combinator`
/// and `filters[i][column|operator|value]`. Filters stop at the first gap.
fn parse_query(pairs: Vec<(String, String)>) -> Result<QueryParams> {
    let query: HashMap<String, String> = pairs.into_iter().collect();
    let get = |key: &str| query.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    let mut params = QueryParams::default();
    if let Some(page) = get("page") {
        let page: i64 = page
            .parse()
            .map_err(|_| Error::invalid(format!("page must be a number, got {page:?}")))?;
        params.page = page.clamp(1, i64::from(u32::MAX)) as u32;
    }
    if let Some(size) = get("page_size") {
        let size: i64 = size
            .parse()
            .map_err(|_| Error::invalid(format!("page_size must be a number, got {size:?}")))?;
        params.page_size = if size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            size.min(i64::from(MAX_PAGE_SIZE)) as u32
        };
    }
    params.order_by = get("order_by").map(str::to_string);
    if let Some(dir) = get("order_dir") {
        params.order_dir = OrderDir::parse(dir)?;
    }
    if let Some(combinator) = get("filter_combinator") {
        params.combinator = Combinator::parse(combinator)?;
    }

    for i in 0..MAX_FILTERS {
        let Some(column) = get(&format!("filters[{i}][column]")) else {
            break;
        };
        let op = FilterOp::parse(get(&format!("filters[{i}][operator]")).unwrap_or("="))?;
        let value = match query.get(&format!("filters[{i}][value]")) {
            Some(v) if op.takes_value() => Value::String(v.clone()),
            _ => Value::Null,
        };
        params.filters.push(Filter {
            column: column.to_string(),
            op,
            value,
        });
    }
    Ok(params)
}
