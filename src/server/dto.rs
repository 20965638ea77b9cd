use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::AppStatus;

// Runtime data surface

#[derive(Debug, Deserialize)]
pub struct WriteRowRequest {
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRowsRequest {
    pub ids: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct AffectedRows {
    pub affected_rows: u64,
}

#[derive(Debug, Serialize)]
pub struct RowsPage {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    pub total: i64,
}

// Admin surface

#[derive(Debug, Deserialize)]
pub struct UpsertWorkspaceRequest {
    pub slug: String,
    #[serde(default = "default_status")]
    pub app_status: AppStatus,
    #[serde(default)]
    pub settings: Option<Value>,
}

fn default_status() -> AppStatus {
    AppStatus::Draft
}

#[derive(Debug, Deserialize)]
pub struct DeployCodeRequest {
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct DeployCodeResponse {
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteSqlRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct ExecuteSqlResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Value>,
    pub affected_rows: u64,
    pub last_insert_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePolicyRequest {
    pub table_name: String,
    pub column_name: String,
    pub match_field: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdatePolicyRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateAppUserRequest {
    pub email: String,
    #[serde(default)]
    pub attributes: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}
