//! The `db` object exposed to workspace code.
//!
//! Every op reads the workspace id from [`BridgeState`], which is installed
//! when the sandbox is created. Nothing coming from JavaScript can name a
//! different workspace.
//!
//! Ops never throw. They return `{"ok": ...}` or
//! `{"error": {"kind": ..., "message": ...}}` and the bootstrap turns the
//! error form into a `DbError` carrying the same `kind`.

use std::sync::Arc;

use deno_core::{OpState, op2};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::store::TenantStore;
use crate::types::value::{params_from_json, row_from_value};
use crate::types::{BlobEncoding, rows_to_json};

pub(crate) struct BridgeState {
    pub workspace_id: String,
    pub tenants: Arc<TenantStore>,
}

/// Last value posted by the bootstrap through `op_runtime_reply`.
pub(crate) struct PendingReply(pub Value);

deno_core::extension!(
    workspace_bridge,
    ops = [
        op_db_query,
        op_db_insert,
        op_db_update,
        op_db_delete,
        op_db_execute,
        op_console,
        op_runtime_reply,
    ],
);

fn envelope(result: Result<Value>) -> Value {
    match result {
        Ok(value) => json!({ "ok": value }),
        Err(err) => json!({
            "error": { "kind": err.kind(), "message": err.to_string() }
        }),
    }
}

pub(crate) fn query(tenants: &TenantStore, workspace_id: &str, sql: &str, params: &Value) -> Result<Value> {
    let params = params_from_json(params)?;
    let result = tenants.execute_sql(workspace_id, sql, &params)?;
    if result.columns.is_empty() {
        return Err(Error::invalid("db.query expects a statement that returns rows"));
    }
    Ok(Value::Array(rows_to_json(
        &result.columns,
        &result.rows,
        BlobEncoding::Tagged,
    )))
}

pub(crate) fn insert(tenants: &TenantStore, workspace_id: &str, table: &str, data: &Value) -> Result<Value> {
    let row = row_from_value(data)?;
    let result = tenants.insert_row(workspace_id, table, &row)?;
    Ok(json!({
        "affected_rows": result.affected_rows,
        "last_insert_id": result.last_insert_id,
    }))
}

pub(crate) fn update(
    tenants: &TenantStore,
    workspace_id: &str,
    table: &str,
    data: &Value,
    conditions: &Value,
) -> Result<Value> {
    let row = row_from_value(data)?;
    let conditions = row_from_value(conditions)?;
    let result = tenants.update_where(workspace_id, table, &row, &conditions)?;
    Ok(json!({ "affected_rows": result.affected_rows }))
}

pub(crate) fn delete(tenants: &TenantStore, workspace_id: &str, table: &str, conditions: &Value) -> Result<Value> {
    let conditions = row_from_value(conditions)?;
    let result = tenants.delete_where(workspace_id, table, &conditions)?;
    Ok(json!({ "affected_rows": result.affected_rows }))
}

pub(crate) fn execute(tenants: &TenantStore, workspace_id: &str, sql: &str, params: &Value) -> Result<Value> {
    let params = params_from_json(params)?;
    let result = tenants.execute_sql(workspace_id, sql, &params)?;
    Ok(json!({
        "affected_rows": result.affected_rows,
        "last_insert_id": result.last_insert_id,
        "rows": rows_to_json(&result.columns, &result.rows, BlobEncoding::Tagged),
    }))
}

#[op2]
#[serde]
fn op_db_query(state: &mut OpState, #[string] sql: String, #[serde] params: serde_json::Value) -> serde_json::Value {
    let bridge = state.borrow::<BridgeState>();
    envelope(query(&bridge.tenants, &bridge.workspace_id, &sql, &params))
}

#[op2]
#[serde]
fn op_db_insert(state: &mut OpState, #[string] table: String, #[serde] data: serde_json::Value) -> serde_json::Value {
    let bridge = state.borrow::<BridgeState>();
    envelope(insert(&bridge.tenants, &bridge.workspace_id, &table, &data))
}

#[op2]
#[serde]
fn op_db_update(
    state: &mut OpState,
    #[string] table: String,
    #[serde] data: serde_json::Value,
    #[serde] conditions: serde_json::Value,
) -> serde_json::Value {
    let bridge = state.borrow::<BridgeState>();
    envelope(update(&bridge.tenants, &bridge.workspace_id, &table, &data, &conditions))
}

#[op2]
#[serde]
fn op_db_delete(state: &mut OpState, #[string] table: String, #[serde] conditions: serde_json::Value) -> serde_json::Value {
    let bridge = state.borrow::<BridgeState>();
    envelope(delete(&bridge.tenants, &bridge.workspace_id, &table, &conditions))
}

#[op2]
#[serde]
fn op_db_execute(state: &mut OpState, #[string] sql: String, #[serde] params: serde_json::Value) -> serde_json::Value {
    let bridge = state.borrow::<BridgeState>();
    envelope(execute(&bridge.tenants, &bridge.workspace_id, &sql, &params))
}

#[derive(Deserialize)]
struct ConsoleEntry {
    level: String,
    message: String,
}

#[op2]
fn op_console(state: &mut OpState, #[serde] entry: ConsoleEntry) {
    let workspace_id = state.borrow::<BridgeState>().workspace_id.as_str();
    let message = entry.message.as_str();
    match entry.level.as_str() {
        "error" => error!(target: "tenant_runtime::vm::console", workspace_id, "{message}"),
        "warn" => warn!(target: "tenant_runtime::vm::console", workspace_id, "{message}"),
        "debug" => debug!(target: "tenant_runtime::vm::console", workspace_id, "{message}"),
        _ => info!(target: "tenant_runtime::vm::console", workspace_id, "{message}"),
    }
}

#[op2]
fn op_runtime_reply(state: &mut OpState, #[serde] reply: serde_json::Value) {
    state.put(PendingReply(reply));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeOptions;
    use crate::types::{ColumnDef, ColumnType, TableDef};
    use tempfile::TempDir;

    fn column(name: &str, column_type: ColumnType) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            column_type,
            nullable: true,
            default: None,
            unique: false,
            comment: None,
        }
    }

    fn setup() -> (TempDir, TenantStore) {
        let dir = TempDir::new().unwrap();
        let store = TenantStore::new(dir.path(), &RuntimeOptions::default());
        store
            .create_table(
                "w1",
                &TableDef {
                    name: "items".to_string(),
                    columns: vec![
                        column("id", ColumnType::Integer),
                        column("name", ColumnType::Text),
                        column("qty", ColumnType::Integer),
                        column("payload", ColumnType::Blob),
                    ],
                    primary_key: vec!["id".to_string()],
                    indexes: vec![],
                },
            )
            .unwrap();
        (dir, store)
    }

    #[test]
    fn insert_then_query() {
        let (_dir, store) = setup();
        let inserted = insert(&store, "w1", "items", &json!({"name": "bolt", "qty": 3.0})).unwrap();
        assert_eq!(inserted["affected_rows"], 1);
        assert_eq!(inserted["last_insert_id"], 1);

        let rows = query(&store, "w1", "SELECT id, name, qty FROM items", &Value::Null).unwrap();
        assert_eq!(rows, json!([{"id": 1, "name": "bolt", "qty": 3}]));
    }

    #[test]
    fn bytes_come_back_tagged() {
        let (_dir, store) = setup();
        insert(&store, "w1", "items", &json!({"payload": {"$bytes": [1, 2, 255]}})).unwrap();
        let rows = query(&store, "w1", "SELECT payload FROM items", &json!([])).unwrap();
        assert_eq!(rows[0]["payload"], json!({"$bytes": [1, 2, 255]}));
    }

    #[test]
    fn update_and_delete_by_conditions() {
        let (_dir, store) = setup();
        insert(&store, "w1", "items", &json!({"name": "a", "qty": 1})).unwrap();
        insert(&store, "w1", "items", &json!({"name": "b", "qty": 1})).unwrap();

        let updated = update(&store, "w1", "items", &json!({"qty": 5}), &json!({"name": "a"})).unwrap();
        assert_eq!(updated["affected_rows"], 1);

        let deleted = delete(&store, "w1", "items", &json!({"qty": 1})).unwrap();
        assert_eq!(deleted["affected_rows"], 1);

        let rows = query(&store, "w1", "SELECT name FROM items", &Value::Null).unwrap();
        assert_eq!(rows, json!([{"name": "a"}]));
    }

    #[test]
    fn errors_carry_kind() {
        let (_dir, store) = setup();
        let reply = envelope(query(&store, "w1", "DROP TABLE items", &Value::Null));
        assert_eq!(reply["error"]["kind"], "Forbidden");

        let reply = envelope(insert(&store, "w1", "missing", &json!({"a": 1})));
        assert_eq!(reply["error"]["kind"], "TableNotFound");

        let reply = envelope(insert(&store, "w1", "items", &json!({"name": ["x"]})));
        assert_eq!(reply["error"]["kind"], "InvalidInput");
    }

    #[test]
    fn query_requires_rows() {
        let (_dir, store) = setup();
        let err = query(&store, "w1", "DELETE FROM items", &Value::Null).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let done = execute(&store, "w1", "DELETE FROM items", &Value::Null).unwrap();
        assert_eq!(done["affected_rows"], 0);
    }

    #[test]
    fn reserved_tables_are_unreachable() {
        let (_dir, store) = setup();
        let reply = envelope(query(&store, "w1", "SELECT * FROM _sys_column_comments", &Value::Null));
        assert_eq!(reply["error"]["kind"], "Forbidden");
    }
}
