//! Data hooks declared by workspace code.
//!
//! Before a tabular insert or update the router calls the VM route
//! `POST /hooks/before-<op>/{table}` with `{table, data}`. The hook may veto
//! the write with `{allow: false, error}` or add fields with `{data: {...}}`.
//! Anything short of a well-formed reply lets the write through unchanged.
//!
//! After a write that changed rows, `POST /hooks/after-<op>/{table}` gets the
//! row as written (owner columns stamped) plus `last_insert_id` on insert.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::server::AppState;
use crate::types::Workspace;
use crate::vm::VmRequest;

pub const DEFAULT_REJECTION: &str = "Operation rejected by business rule";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    BeforeInsert,
    BeforeUpdate,
    AfterInsert,
    AfterUpdate,
}

impl HookEvent {
    fn as_str(self) -> &'static str {
        match self {
            HookEvent::BeforeInsert => "before-insert",
            HookEvent::BeforeUpdate => "before-update",
            HookEvent::AfterInsert => "after-insert",
            HookEvent::AfterUpdate => "after-update",
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum HookOutcome {
    /// Proceed, merging these fields into the row first.
    Allow(Map<String, Value>),
    Reject(String),
}

#[derive(Deserialize)]
struct HookReply {
    #[serde(default)]
    allow: Option<bool>,
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

pub async fn run_before(
    state: &AppState,
    workspace: &Workspace,
    event: HookEvent,
    table: &str,
    data: &Map<String, Value>,
) -> HookOutcome {
    let body = json!({ "table": table, "data": data });
    let Some(reply) = call(state, workspace, event, table, body).await else {
        return HookOutcome::Allow(Map::new());
    };
    interpret(reply)
}

/// Fires an after-write hook without waiting for it.
pub fn spawn_after(
    state: Arc<AppState>,
    workspace: Workspace,
    event: HookEvent,
    table: String,
    row: Map<String, Value>,
    last_insert_id: Option<i64>,
) {
    let body = after_body(&table, row, last_insert_id);
    tokio::spawn(async move {
        call(&state, &workspace, event, &table, body).await;
    });
}

fn after_body(table: &str, row: Map<String, Value>, last_insert_id: Option<i64>) -> Value {
    let mut body = json!({ "table": table, "data": row });
    if let Some(id) = last_insert_id {
        body["last_insert_id"] = json!(id);
    }
    body
}

async fn call(
    state: &AppState,
    workspace: &Workspace,
    event: HookEvent,
    table: &str,
    body: Value,
) -> Option<Value> {
    let request =
        VmRequest::new("POST", format!("/hooks/{}/{table}", event.as_str())).with_json(body);

    match state.pool.invoke(workspace, &request).await {
        Ok(response) if response.status == 404 => None,
        Ok(response) => response.json().cloned(),
        Err(e) => {
            debug!(
                workspace_id = %workspace.id,
                hook = event.as_str(),
                table,
                error = %e,
                "data hook skipped"
            );
            None
        }
    }
}

fn interpret(reply: Value) -> HookOutcome {
    let Ok(reply) = serde_json::from_value::<HookReply>(reply) else {
        return HookOutcome::Allow(Map::new());
    };
    if reply.allow == Some(false) {
        let message = reply
            .error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
        return HookOutcome::Reject(message);
    }
    HookOutcome::Allow(reply.data.unwrap_or_default())
}
