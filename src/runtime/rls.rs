//! Row-level security.
//!
//! A table with no active policies is open to the deployed app. Once a
//! policy is active every read and write needs a valid app session, and each
//! policy contributes `column = user.<match_field>`. Anything that prevents a
//! policy from being evaluated denies instead of widening access.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::store::{PolicyStore, SessionValidator};
use crate::types::{AppUser, RowData, ScopeFilter};

/// What RLS contributes to one operation on one table.
#[derive(Debug, Clone, Default)]
pub struct RlsScope {
    /// ANDed into every read, update, and delete.
    pub filters: Vec<ScopeFilter>,
    /// Policy columns and the values writes must carry.
    pub stamps: RowData,
    pub user: Option<AppUser>,
}

impl RlsScope {
    fn deny() -> Self {
        Self {
            filters: vec![ScopeFilter::DenyAll],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.filters.contains(&ScopeFilter::DenyAll)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.filters.is_empty()
    }

    /// Overwrites policy columns in `row` with the user's values.
    pub fn stamp(&self, row: &mut RowData) {
        for (column, value) in &self.stamps {
            row.retain(|(name, _)| !name.eq_ignore_ascii_case(column));
            row.push((column.clone(), value.clone()));
        }
    }
}

pub struct RlsEngine {
    policies: Arc<dyn PolicyStore>,
    sessions: Arc<dyn SessionValidator>,
}

impl RlsEngine {
    pub fn new(policies: Arc<dyn PolicyStore>, sessions: Arc<dyn SessionValidator>) -> Self {
        Self { policies, sessions }
    }

    /// Compiles the active policies on `table` for the caller holding `token`.
    pub fn scope(&self, workspace_id: &str, table: &str, token: Option<&str>) -> Result<RlsScope> {
        let policies = self.policies.list_active_policies(workspace_id, table)?;
        if policies.is_empty() {
            return Ok(RlsScope::default());
        }

        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            debug!(workspace_id, table, "no app token for policied table");
            return Ok(RlsScope::deny());
        };
        let Some(user) = self.sessions.validate(token)? else {
            debug!(workspace_id, table, "invalid app token for policied table");
            return Ok(RlsScope::deny());
        };
        if user.workspace_id != workspace_id {
            warn!(
                workspace_id,
                table,
                user_workspace = %user.workspace_id,
                "app token belongs to another workspace"
            );
            return Ok(RlsScope::deny());
        }

        let mut scope = RlsScope::default();
        for policy in &policies {
            let Some(value) = user.match_value(&policy.match_field) else {
                warn!(
                    workspace_id,
                    table,
                    policy_id = %policy.id,
                    match_field = %policy.match_field,
                    "policy match field has no value for user"
                );
                return Ok(RlsScope::deny());
            };
            scope.filters.push(ScopeFilter::Equals {
                column: policy.column_name.clone(),
                value: value.clone(),
            });
            scope.stamps.push((policy.column_name.clone(), value));
        }
        scope.user = Some(user);
        Ok(scope)
    }
}
