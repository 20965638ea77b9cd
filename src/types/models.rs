use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value::SqlValue;
use crate::config::clamp_vm_timeout;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Draft,
    Published,
    Suspended,
}

impl AppStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Draft => "draft",
            AppStatus::Published => "published",
            AppStatus::Suspended => "suspended",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(AppStatus::Draft),
            "published" => Some(AppStatus::Published),
            "suspended" => Some(AppStatus::Suspended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub slug: String,
    pub app_status: AppStatus,
    /// Free-form settings. `runtime.timeout_ms` overrides the handler
    /// deadline for this workspace.
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.app_status == AppStatus::Published
    }

    /// Handler deadline for this workspace, falling back to `default`.
    #[must_use]
    pub fn vm_timeout(&self, default: Duration) -> Duration {
        self.settings
            .pointer("/runtime/timeout_ms")
            .and_then(Value::as_u64)
            .map(|ms| clamp_vm_timeout(Duration::from_millis(ms)))
            .unwrap_or(default)
    }
}

/// Source text deployed for a workspace together with its content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedCode {
    pub workspace_id: String,
    pub source: String,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlsPolicy {
    pub id: String,
    pub workspace_id: String,
    pub table_name: String,
    pub column_name: String,
    pub match_field: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppUser {
    pub id: String,
    pub workspace_id: String,
    pub email: String,
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
}

impl AppUser {
    /// Value a policy's `match_field` resolves to for this user.
    ///
    /// `app_user_id` and `email` are built in; any other name is looked up in
    /// `attributes`. Missing, null, or non-scalar attributes yield `None`.
    #[must_use]
    pub fn match_value(&self, field: &str) -> Option<SqlValue> {
        match field {
            "app_user_id" => Some(SqlValue::Text(self.id.clone())),
            "email" => Some(SqlValue::Text(self.email.clone())),
            other => match self.attributes.get(other)? {
                Value::String(s) => Some(SqlValue::Text(s.clone())),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => Some(SqlValue::Integer(i)),
                    None => n.as_f64().map(SqlValue::Real),
                },
                Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSession {
    #[serde(skip)]
    pub token_hash: String,
    pub app_user_id: String,
    pub workspace_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AppSession {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
