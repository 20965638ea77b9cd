use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde_json::Value;

use super::schema::SCHEMA;
use super::{CodeSource, PolicyStore, SessionValidator, WorkspaceDirectory};
use crate::auth::{digest_token, parse_session_token};
use crate::error::{Error, Result};
use crate::types::*;
use crate::vm::content_hash;

/// SQLite-backed admin-plane metadata: workspaces, deployed code, policies,
/// app users and sessions.
pub struct MetaStore {
    conn: Mutex<Connection>,
}

impl MetaStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Workspace operations

    /// Creates or replaces a workspace by id.
    pub fn upsert_workspace(&self, ws: &Workspace) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO workspaces (id, slug, app_status, settings, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (id) DO UPDATE SET
                    slug = excluded.slug,
                    app_status = excluded.app_status,
                    settings = excluded.settings,
                    updated_at = excluded.updated_at",
                params![
                    ws.id,
                    ws.slug,
                    ws.app_status.as_str(),
                    ws.settings.to_string(),
                    format_datetime(&ws.created_at),
                    format_datetime(&ws.updated_at),
                ],
            )
            .map_err(|e| unique_conflict(e, "workspace slug is already taken"))?;
        Ok(())
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        self.find_workspace("id", id)
    }

    pub fn get_workspace_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        self.find_workspace("slug", slug)
    }

    fn find_workspace(&self, column: &str, value: &str) -> Result<Option<Workspace>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT id, slug, app_status, settings, created_at, updated_at
                 FROM workspaces WHERE {column} = ?1"
            ),
            params![value],
            |row| {
                Ok(Workspace {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    app_status: AppStatus::parse(&row.get::<_, String>(2)?)
                        .unwrap_or(AppStatus::Draft),
                    settings: parse_json(&row.get::<_, String>(3)?),
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                    updated_at: parse_datetime(&row.get::<_, String>(5)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // Code operations

    /// Stores new source for a workspace and returns it with its hash.
    pub fn put_code(&self, workspace_id: &str, source: &str) -> Result<DeployedCode> {
        let code = DeployedCode {
            workspace_id: workspace_id.to_string(),
            source: source.to_string(),
            hash: content_hash(source),
            updated_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO workspace_code (workspace_id, source, hash, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (workspace_id) DO UPDATE SET
                source = excluded.source,
                hash = excluded.hash,
                updated_at = excluded.updated_at",
            params![
                code.workspace_id,
                code.source,
                code.hash,
                format_datetime(&code.updated_at)
            ],
        )?;
        Ok(code)
    }

    pub fn get_deployed_code(&self, workspace_id: &str) -> Result<Option<DeployedCode>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT workspace_id, source, hash, updated_at FROM workspace_code WHERE workspace_id = ?1",
            params![workspace_id],
            |row| {
                Ok(DeployedCode {
                    workspace_id: row.get(0)?,
                    source: row.get(1)?,
                    hash: row.get(2)?,
                    updated_at: parse_datetime(&row.get::<_, String>(3)?),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // Policy operations

    pub fn create_policy(&self, policy: &RlsPolicy) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO rls_policies (id, workspace_id, table_name, column_name, match_field, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    policy.id,
                    policy.workspace_id,
                    policy.table_name,
                    policy.column_name,
                    policy.match_field,
                    policy.active,
                    format_datetime(&policy.created_at),
                ],
            )
            .map_err(|e| unique_conflict(e, "a policy already exists for this column"))?;
        Ok(())
    }

    pub fn get_policy(&self, workspace_id: &str, id: &str) -> Result<Option<RlsPolicy>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, workspace_id, table_name, column_name, match_field, active, created_at
             FROM rls_policies WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id, id],
            policy_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn list_policies(&self, workspace_id: &str) -> Result<Vec<RlsPolicy>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, table_name, column_name, match_field, active, created_at
             FROM rls_policies WHERE workspace_id = ?1 ORDER BY table_name, column_name",
        )?;
        let rows = stmt.query_map(params![workspace_id], policy_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    pub fn set_policy_active(&self, workspace_id: &str, id: &str, active: bool) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE rls_policies SET active = ?3 WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id, id, active],
        )?;
        Ok(rows > 0)
    }

    fn policies_for_table(&self, workspace_id: &str, table: &str, active_only: bool) -> Result<Vec<RlsPolicy>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, workspace_id, table_name, column_name, match_field, active, created_at
             FROM rls_policies
             WHERE workspace_id = ?1 AND table_name = ?2 COLLATE NOCASE AND (active = 1 OR ?3 = 0)
             ORDER BY column_name",
        )?;
        let rows = stmt.query_map(params![workspace_id, table, active_only], policy_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // App user operations

    pub fn create_app_user(&self, user: &AppUser) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO app_users (id, workspace_id, email, attributes, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id,
                    user.workspace_id,
                    user.email,
                    user.attributes.to_string(),
                    format_datetime(&user.created_at),
                ],
            )
            .map_err(|e| unique_conflict(e, "an app user with this email already exists"))?;
        Ok(())
    }

    pub fn get_app_user(&self, workspace_id: &str, id: &str) -> Result<Option<AppUser>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, workspace_id, email, attributes, created_at
             FROM app_users WHERE workspace_id = ?1 AND id = ?2",
            params![workspace_id, id],
            app_user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    // Session operations

    pub fn create_session(&self, session: &AppSession) -> Result<()> {
        self.conn().execute(
            "INSERT INTO app_sessions (token_hash, app_user_id, workspace_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.token_hash,
                session.app_user_id,
                session.workspace_id,
                format_datetime(&session.created_at),
                session.expires_at.as_ref().map(format_datetime),
            ],
        )?;
        Ok(())
    }

    /// Returns the user behind an unexpired session digest.
    pub fn find_session_user(&self, token_hash: &str) -> Result<Option<AppUser>> {
        let conn = self.conn();
        let found = conn
            .query_row(
                "SELECT u.id, u.workspace_id, u.email, u.attributes, u.created_at, s.expires_at
                 FROM app_sessions s JOIN app_users u ON u.id = s.app_user_id
                 WHERE s.token_hash = ?1",
                params![token_hash],
                |row| {
                    let user = app_user_from_row(row)?;
                    let expires_at: Option<String> = row.get(5)?;
                    Ok((user, expires_at.map(|s| parse_datetime(&s))))
                },
            )
            .optional()?;

        Ok(found.and_then(|(user, expires_at)| match expires_at {
            Some(at) if at <= Utc::now() => None,
            _ => Some(user),
        }))
    }
}

impl WorkspaceDirectory for MetaStore {
    fn find_by_slug(&self, slug: &str) -> Result<Option<Workspace>> {
        self.get_workspace_by_slug(slug)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Workspace>> {
        self.get_workspace(id)
    }
}

impl CodeSource for MetaStore {
    fn get_code(&self, workspace_id: &str) -> Result<Option<(String, String)>> {
        Ok(self
            .get_deployed_code(workspace_id)?
            .map(|code| (code.source, code.hash)))
    }
}

impl PolicyStore for MetaStore {
    fn list_active_policies(&self, workspace_id: &str, table: &str) -> Result<Vec<RlsPolicy>> {
        self.policies_for_table(workspace_id, table, true)
    }

    fn list_policies_for_table(&self, workspace_id: &str, table: &str) -> Result<Vec<RlsPolicy>> {
        self.policies_for_table(workspace_id, table, false)
    }
}

impl SessionValidator for MetaStore {
    fn validate(&self, token: &str) -> Result<Option<AppUser>> {
        if parse_session_token(token).is_err() {
            return Ok(None);
        }
        self.find_session_user(&digest_token(token))
    }
}

fn policy_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RlsPolicy> {
    Ok(RlsPolicy {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        table_name: row.get(2)?,
        column_name: row.get(3)?,
        match_field: row.get(4)?,
        active: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn app_user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppUser> {
    Ok(AppUser {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        email: row.get(2)?,
        attributes: parse_json(&row.get::<_, String>(3)?),
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn unique_conflict(err: rusqlite::Error, message: &str) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(message.to_string())
        }
        _ => Error::Database(err),
    }
}

fn parse_json(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::error!("Invalid JSON in metadata database: '{}' - {}", s, e);
        Value::Object(Default::default())
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}
