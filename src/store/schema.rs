pub const SCHEMA: &str = r#"
-- Workspaces are resolved by slug on every runtime request
CREATE TABLE IF NOT EXISTS workspaces (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    app_status TEXT NOT NULL DEFAULT 'draft',
    settings TEXT NOT NULL DEFAULT '{}',
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Deployed handler source, one per workspace
CREATE TABLE IF NOT EXISTS workspace_code (
    workspace_id TEXT PRIMARY KEY REFERENCES workspaces(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    hash TEXT NOT NULL,
    updated_at TEXT DEFAULT (datetime('now'))
);

-- Row-level security: one column equality per policy
CREATE TABLE IF NOT EXISTS rls_policies (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    match_field TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(workspace_id, table_name, column_name)
);

CREATE INDEX IF NOT EXISTS idx_rls_policies_table ON rls_policies(workspace_id, table_name);

-- End users of a workspace's app
CREATE TABLE IF NOT EXISTS app_users (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    email TEXT NOT NULL,
    attributes TEXT NOT NULL DEFAULT '{}',
    created_at TEXT DEFAULT (datetime('now')),

    UNIQUE(workspace_id, email)
);

-- App sessions; only the SHA-256 digest of the token is stored
CREATE TABLE IF NOT EXISTS app_sessions (
    token_hash TEXT PRIMARY KEY,
    app_user_id TEXT NOT NULL REFERENCES app_users(id) ON DELETE CASCADE,
    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
    created_at TEXT DEFAULT (datetime('now')),
    expires_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_app_sessions_user ON app_sessions(app_user_id);
"#;
