//! Per-workspace relational storage.
//!
//! Every workspace owns one SQLite file at `<root>/<workspace-id>/db.sqlite`,
//! opened lazily on first use. All SQL that reaches a workspace file either
//! interpolates validated, quoted identifiers or passed the statement guard,
//! and every value is bound as a parameter.

mod connection;
mod ddl;
mod query;
pub mod sql_guard;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rusqlite::params_from_iter;

pub use connection::WorkspaceDb;
use ddl::{describe, introspect, quote, resolve_table};
use query::{Predicate, read_rows};
use sql_guard::StatementKind;

use crate::config::RuntimeOptions;
use crate::error::{Error, Result};
use crate::types::*;
use crate::validation::validate_workspace_id;

pub(crate) trait SqlResultExt<T> {
    fn tenant(self) -> Result<T>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn tenant(self) -> Result<T> {
        self.map_err(Error::from_tenant_sql)
    }
}

pub struct TenantStore {
    root: PathBuf,
    read_pool_size: usize,
    query_timeout: Duration,
    databases: RwLock<HashMap<String, Arc<WorkspaceDb>>>,
}

impl TenantStore {
    pub fn new(root: impl Into<PathBuf>, options: &RuntimeOptions) -> Self {
        Self {
            root: root.into(),
            read_pool_size: options.db_read_pool_size,
            query_timeout: options.db_query_timeout,
            databases: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn db_path(&self, workspace_id: &str) -> PathBuf {
        self.root.join(workspace_id).join("db.sqlite")
    }

    /// Returns the open database for a workspace, opening it on first use.
    pub fn workspace(&self, workspace_id: &str) -> Result<Arc<WorkspaceDb>> {
        if let Some(db) = self
            .databases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(workspace_id)
        {
            return Ok(db.clone());
        }

        validate_workspace_id(workspace_id).map_err(Error::InvalidInput)?;
        let mut databases = self.databases.write().unwrap_or_else(|e| e.into_inner());
        if let Some(db) = databases.get(workspace_id) {
            return Ok(db.clone());
        }

        let path = self.db_path(workspace_id);
        let db = Arc::new(WorkspaceDb::open(&path, self.read_pool_size, self.query_timeout)?);
        tracing::debug!(workspace = workspace_id, path = %path.display(), "opened workspace database");
        databases.insert(workspace_id.to_string(), db.clone());
        Ok(db)
    }

    // Schema operations

    pub fn create_table(&self, workspace_id: &str, def: &TableDef) -> Result<()> {
        self.workspace(workspace_id)?
            .write(|conn| ddl::create_table(conn, def))
    }

    pub fn alter_table(&self, workspace_id: &str, table: &str, change: &AlterTable) -> Result<()> {
        self.workspace(workspace_id)?
            .write(|conn| ddl::alter_table(conn, table, change))
    }

    pub fn drop_table(&self, workspace_id: &str, table: &str) -> Result<()> {
        self.workspace(workspace_id)?
            .write(|conn| ddl::drop_table(conn, table))
    }

    /// User tables, excluding engine and internal tables.
    pub fn list_tables(&self, workspace_id: &str) -> Result<Vec<TableInfo>> {
        self.workspace(workspace_id)?.read(|conn| {
            let names = user_tables(conn)?;
            names
                .into_iter()
                .map(|name| {
                    let column_count: i64 = conn
                        .query_row(
                            "SELECT COUNT(*) FROM pragma_table_info(?1)",
                            [&name],
                            |row| row.get(0),
                        )
                        .tenant()?;
                    let row_count: i64 = conn
                        .query_row(&format!("SELECT COUNT(*) FROM {}", quote(&name)), [], |row| {
                            row.get(0)
                        })
                        .tenant()?;
                    Ok(TableInfo { name, column_count, row_count })
                })
                .collect()
        })
    }

    pub fn get_schema(&self, workspace_id: &str, table: &str) -> Result<TableSchema> {
        self.workspace(workspace_id)?.read(|conn| {
            let table = resolve_table(conn, table)?;
            introspect(conn, &table)
        })
    }

    // Row operations

    /// Reads one page of rows. Scope filters in `params` are ANDed outside
    /// the caller's filter group.
    pub fn query_rows(&self, workspace_id: &str, table: &str, params: &QueryParams) -> Result<QueryResult> {
        params.validate()?;
        self.workspace(workspace_id)?.read(|conn| {
            let table = resolve_table(conn, table)?;
            let schema = describe(conn, &table)?;
            query::query_rows(conn, &schema, params)
        })
    }

    pub fn insert_row(&self, workspace_id: &str, table: &str, data: &RowData) -> Result<ExecResult> {
        if data.is_empty() {
            return Err(Error::invalid("no columns to insert"));
        }
        self.workspace(workspace_id)?.write(|conn| {
            let table = resolve_table(conn, table)?;
            let schema = describe(conn, &table)?;
            let columns = canonical_columns(&schema, data)?;

            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({placeholders})",
                quote(&table),
                columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
            );
            let affected = conn
                .execute(&sql, params_from_iter(data.iter().map(|(_, v)| v)))
                .tenant()?;
            Ok(ExecResult {
                affected_rows: affected as u64,
                last_insert_id: Some(conn.last_insert_rowid()),
            })
        })
    }

    /// Updates the row identified by the primary key values in `data`.
    ///
    /// Only rows whose values actually change are counted, so repeating an
    /// update reports zero affected rows.
    pub fn update_row(
        &self,
        workspace_id: &str,
        table: &str,
        data: &RowData,
        scope: &[ScopeFilter],
    ) -> Result<ExecResult> {
        self.workspace(workspace_id)?.write(|conn| {
            let table = resolve_table(conn, table)?;
            let schema = describe(conn, &table)?;
            let columns = canonical_columns(&schema, data)?;

            let mut keys = Vec::new();
            let mut sets = Vec::new();
            for (column, (_, value)) in columns.iter().zip(data) {
                if schema.primary_key.iter().any(|k| k == column) {
                    keys.push((column, value));
                } else {
                    sets.push((column, value));
                }
            }
            if keys.len() != schema.primary_key.len() || schema.primary_key.is_empty() {
                return Err(Error::invalid(format!(
                    "update requires the primary key ({})",
                    schema.primary_key.join(", ")
                )));
            }
            if sets.is_empty() {
                return Err(Error::invalid("no columns to update"));
            }

            let mut predicate = Predicate::default();
            for (column, value) in &keys {
                predicate.push(format!("{} = ?", quote(column)));
                predicate.params.push((*value).clone());
            }
            predicate.add_scope(&schema, scope);
            add_change_guard(&mut predicate, &sets);

            run_update(conn, &table, &sets, &predicate)
        })
    }

    /// Deletes rows by primary key value. Requires a single-column key.
    pub fn delete_rows(
        &self,
        workspace_id: &str,
        table: &str,
        ids: &[SqlValue],
        scope: &[ScopeFilter],
    ) -> Result<ExecResult> {
        if ids.is_empty() {
            return Err(Error::invalid("ids must not be empty"));
        }
        self.workspace(workspace_id)?.write(|conn| {
            let table = resolve_table(conn, table)?;
            let schema = describe(conn, &table)?;
            let key = match schema.primary_key.as_slice() {
                [only] => quote(only),
                [] => "rowid".to_string(),
                _ => {
                    return Err(Error::invalid(
                        "delete by id requires a single-column primary key",
                    ));
                }
            };

            let mut predicate = Predicate::default();
            predicate.push(format!("{key} IN ({})", vec!["?"; ids.len()].join(", ")));
            predicate.params.extend(ids.iter().cloned());
            predicate.add_scope(&schema, scope);

            let affected = conn
                .execute(
                    &format!("DELETE FROM {}{}", quote(&table), predicate.render()),
                    params_from_iter(predicate.params.iter()),
                )
                .tenant()?;
            Ok(ExecResult { affected_rows: affected as u64, last_insert_id: None })
        })
    }

    /// Updates every row matching all equality `conditions`.
    pub fn update_where(
        &self,
        workspace_id: &str,
        table: &str,
        data: &RowData,
        conditions: &RowData,
    ) -> Result<ExecResult> {
        if data.is_empty() {
            return Err(Error::invalid("no columns to update"));
        }
        if conditions.is_empty() {
            return Err(Error::invalid("update requires at least one condition"));
        }
        self.workspace(workspace_id)?.write(|conn| {
            let table = resolve_table(conn, table)?;
            let schema = describe(conn, &table)?;
            let set_columns = canonical_columns(&schema, data)?;
            let sets: Vec<(&String, &SqlValue)> =
                set_columns.iter().zip(data.iter().map(|(_, v)| v)).collect();

            let mut predicate = equality_predicate(&schema, conditions)?;
            add_change_guard(&mut predicate, &sets);
            run_update(conn, &table, &sets, &predicate)
        })
    }

    /// Deletes every row matching all equality `conditions`.
    pub fn delete_where(&self, workspace_id: &str, table: &str, conditions: &RowData) -> Result<ExecResult> {
        if conditions.is_empty() {
            return Err(Error::invalid("delete requires at least one condition"));
        }
        self.workspace(workspace_id)?.write(|conn| {
            let table = resolve_table(conn, table)?;
            let schema = describe(conn, &table)?;
            let predicate = equality_predicate(&schema, conditions)?;
            let affected = conn
                .execute(
                    &format!("DELETE FROM {}{}", quote(&table), predicate.render()),
                    params_from_iter(predicate.params.iter()),
                )
                .tenant()?;
            Ok(ExecResult { affected_rows: affected as u64, last_insert_id: None })
        })
    }

    // Raw statements

    /// Runs one guarded statement with positional parameters.
    pub fn execute_sql(&self, workspace_id: &str, sql: &str, params: &[SqlValue]) -> Result<SqlResult> {
        let checked = sql_guard::check(sql)?;
        let db = self.workspace(workspace_id)?;

        match checked.kind {
            StatementKind::Read => db.read(|conn| {
                let mut stmt = conn.prepare(&checked.statement).tenant()?;
                if !stmt.readonly() {
                    return Err(Error::Forbidden(
                        "only read-only WITH statements are allowed".to_string(),
                    ));
                }
                let (columns, rows) = read_rows(&mut stmt, params)?;
                Ok(SqlResult { columns, rows, affected_rows: 0, last_insert_id: None })
            }),
            StatementKind::Write => db.write(|conn| {
                let mut stmt = conn.prepare(&checked.statement).tenant()?;
                let (columns, rows, affected) = if stmt.column_count() > 0 {
                    let (columns, rows) = read_rows(&mut stmt, params)?;
                    let affected = rows.len() as u64;
                    (columns, rows, affected)
                } else {
                    let affected = stmt.execute(params_from_iter(params.iter())).tenant()?;
                    (Vec::new(), Vec::new(), affected as u64)
                };
                drop(stmt);
                Ok(SqlResult {
                    columns,
                    rows,
                    affected_rows: affected,
                    last_insert_id: Some(conn.last_insert_rowid()),
                })
            }),
        }
    }

    pub fn stats(&self, workspace_id: &str) -> Result<DatabaseStats> {
        self.workspace(workspace_id)?.read(|conn| {
            let tables = user_tables(conn)?;
            let mut total_rows = 0;
            for table in &tables {
                let count: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| {
                        row.get(0)
                    })
                    .tenant()?;
                total_rows += count;
            }
            let index_count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index'
                     AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
                     AND tbl_name NOT LIKE '\\_sys\\_%' ESCAPE '\\'",
                    [],
                    |row| row.get(0),
                )
                .tenant()?;
            let page_count: i64 = conn
                .query_row("PRAGMA page_count", [], |row| row.get(0))
                .tenant()?;
            let page_size: i64 = conn
                .query_row("PRAGMA page_size", [], |row| row.get(0))
                .tenant()?;
            let journal_mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .tenant()?;

            Ok(DatabaseStats {
                table_count: tables.len() as i64,
                index_count,
                total_rows,
                size_bytes: page_count * page_size,
                journal_mode,
            })
        })
    }
}

fn user_tables(conn: &rusqlite::Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table'
             AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             AND name NOT LIKE '\\_sys\\_%' ESCAPE '\\'
             ORDER BY name",
        )
        .tenant()?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .tenant()?
        .collect::<std::result::Result<Vec<String>, _>>()
        .tenant()?;
    Ok(names)
}

/// Maps each data column to its stored name, rejecting unknown columns.
fn canonical_columns(schema: &TableSchema, data: &RowData) -> Result<Vec<String>> {
    data.iter()
        .map(|(column, _)| {
            schema
                .column(column)
                .map(|c| c.name.clone())
                .ok_or_else(|| Error::invalid(format!("unknown column {column} in {}", schema.name)))
        })
        .collect()
}

fn equality_predicate(schema: &TableSchema, conditions: &RowData) -> Result<Predicate> {
    let columns = canonical_columns(schema, conditions)?;
    let mut predicate = Predicate::default();
    for (column, (_, value)) in columns.iter().zip(conditions) {
        if matches!(value, SqlValue::Null) {
            predicate.push(format!("{} IS NULL", quote(column)));
        } else {
            predicate.push(format!("{} = ?", quote(column)));
            predicate.params.push(value.clone());
        }
    }
    Ok(predicate)
}

/// Restricts an update to rows where at least one assigned value differs.
fn add_change_guard(predicate: &mut Predicate, sets: &[(&String, &SqlValue)]) {
    let clauses: Vec<String> = sets
        .iter()
        .map(|(column, _)| format!("{} IS NOT ?", quote(column)))
        .collect();
    predicate.push(format!("({})", clauses.join(" OR ")));
    predicate
        .params
        .extend(sets.iter().map(|(_, value)| (*value).clone()));
}

fn run_update(
    conn: &rusqlite::Connection,
    table: &str,
    sets: &[(&String, &SqlValue)],
    predicate: &Predicate,
) -> Result<ExecResult> {
    let assignments: Vec<String> = sets
        .iter()
        .map(|(column, _)| format!("{} = ?", quote(column)))
        .collect();
    let params = sets
        .iter()
        .map(|(_, value)| *value)
        .chain(predicate.params.iter());
    let affected = conn
        .execute(
            &format!(
                "UPDATE {} SET {}{}",
                quote(table),
                assignments.join(", "),
                predicate.render()
            ),
            params_from_iter(params),
        )
        .tenant()?;
    Ok(ExecResult { affected_rows: affected as u64, last_insert_id: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const WS: &str = "ws1";

    fn store() -> (TempDir, TenantStore) {
        let dir = TempDir::new().unwrap();
        let store = TenantStore::new(dir.path(), &RuntimeOptions::default());
        (dir, store)
    }

    fn orders(store: &TenantStore) {
        let def: TableDef = serde_json::from_value(json!({
            "name": "orders",
            "columns": [
                {"name": "id", "type": "INTEGER"},
                {"name": "owner", "type": "TEXT"},
                {"name": "status", "type": "TEXT"},
                {"name": "total", "type": "REAL"}
            ],
            "primary_key": ["id"]
        }))
        .unwrap();
        store.create_table(WS, &def).unwrap();
        for (owner, status, total) in [("u1", "open", 10.5), ("u2", "open", 3.0), ("u1", "done", 7.25)] {
            let row = vec![
                ("owner".to_string(), SqlValue::Text(owner.into())),
                ("status".to_string(), SqlValue::Text(status.into())),
                ("total".to_string(), SqlValue::Real(total)),
            ];
            store.insert_row(WS, "orders", &row).unwrap();
        }
    }

    #[test]
    fn database_file_is_per_workspace() {
        let (dir, store) = store();
        orders(&store);
        assert!(dir.path().join(WS).join("db.sqlite").exists());
        assert!(store.list_tables("ws2").unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let (_dir, store) = store();
        orders(&store);

        std::thread::scope(|s| {
            for t in 0..4 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..25 {
                        let row = vec![
                            ("owner".to_string(), SqlValue::Text(format!("t{t}"))),
                            ("status".to_string(), SqlValue::Text("open".into())),
                            ("total".to_string(), SqlValue::Real(f64::from(i))),
                        ];
                        let result = store.insert_row(WS, "orders", &row).unwrap();
                        assert_eq!(result.affected_rows, 1);
                        store.list_tables(WS).unwrap();
                    }
                });
            }
        });

        let result = store
            .execute_sql(WS, "SELECT COUNT(*), COUNT(DISTINCT id) FROM orders", &[])
            .unwrap();
        assert_eq!(result.rows[0], vec![SqlValue::Integer(103), SqlValue::Integer(103)]);
    }

    #[test]
    fn invalid_workspace_ids_never_touch_disk() {
        let (_dir, store) = store();
        assert!(matches!(store.list_tables("../x"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn list_tables_hides_internal_tables() {
        let (_dir, store) = store();
        orders(&store);
        let tables = store.list_tables(WS).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "orders");
        assert_eq!(tables[0].row_count, 3);
        assert_eq!(tables[0].column_count, 4);
    }

    #[test]
    fn query_pages_and_counts() {
        let (_dir, store) = store();
        orders(&store);

        let params = QueryParams { page_size: 2, ..QueryParams::default() };
        let result = store.query_rows(WS, "orders", &params).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.columns, vec!["id", "owner", "status", "total"]);

        let page_two = QueryParams { page: 2, page_size: 2, ..QueryParams::default() };
        assert_eq!(store.query_rows(WS, "orders", &page_two).unwrap().rows.len(), 1);

        let bad = QueryParams { page_size: 0, ..QueryParams::default() };
        assert!(matches!(store.query_rows(WS, "orders", &bad), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn or_filters_cannot_escape_scope() {
        let (_dir, store) = store();
        orders(&store);

        let params = QueryParams {
            filters: vec![
                Filter { column: "status".into(), op: FilterOp::Eq, value: json!("open") },
                Filter { column: "status".into(), op: FilterOp::Eq, value: json!("done") },
            ],
            combinator: Combinator::Or,
            scope: vec![ScopeFilter::Equals {
                column: "owner".into(),
                value: SqlValue::Text("u2".into()),
            }],
            ..QueryParams::default()
        };
        let result = store.query_rows(WS, "orders", &params).unwrap();
        assert_eq!(result.total, 1);
    }

    #[test]
    fn deny_all_scope_returns_nothing() {
        let (_dir, store) = store();
        orders(&store);
        let params = QueryParams { scope: vec![ScopeFilter::DenyAll], ..QueryParams::default() };
        let result = store.query_rows(WS, "orders", &params).unwrap();
        assert_eq!(result.total, 0);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn repeated_update_affects_nothing() {
        let (_dir, store) = store();
        orders(&store);
        let data = vec![
            ("id".to_string(), SqlValue::Integer(1)),
            ("status".to_string(), SqlValue::Text("done".into())),
        ];
        assert_eq!(store.update_row(WS, "orders", &data, &[]).unwrap().affected_rows, 1);
        assert_eq!(store.update_row(WS, "orders", &data, &[]).unwrap().affected_rows, 0);
    }

    #[test]
    fn update_respects_scope() {
        let (_dir, store) = store();
        orders(&store);
        let data = vec![
            ("id".to_string(), SqlValue::Integer(2)),
            ("status".to_string(), SqlValue::Text("done".into())),
        ];
        let scope = [ScopeFilter::Equals { column: "owner".into(), value: SqlValue::Text("u1".into()) }];
        assert_eq!(store.update_row(WS, "orders", &data, &scope).unwrap().affected_rows, 0);
    }

    #[test]
    fn update_requires_primary_key() {
        let (_dir, store) = store();
        orders(&store);
        let data = vec![("status".to_string(), SqlValue::Text("x".into()))];
        assert!(matches!(
            store.update_row(WS, "orders", &data, &[]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn delete_missing_id_is_zero() {
        let (_dir, store) = store();
        orders(&store);
        let result = store.delete_rows(WS, "orders", &[SqlValue::Integer(99)], &[]).unwrap();
        assert_eq!(result.affected_rows, 0);
        let result = store
            .delete_rows(WS, "orders", &[SqlValue::Integer(1), SqlValue::Integer(2)], &[])
            .unwrap();
        assert_eq!(result.affected_rows, 2);
    }

    #[test]
    fn unknown_table_and_column() {
        let (_dir, store) = store();
        orders(&store);
        assert!(matches!(
            store.query_rows(WS, "ghosts", &QueryParams::default()),
            Err(Error::TableNotFound(_))
        ));
        let row = vec![("nope".to_string(), SqlValue::Integer(1))];
        assert!(matches!(
            store.insert_row(WS, "orders", &row),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn execute_sql_enforces_allow_list() {
        let (_dir, store) = store();
        orders(&store);

        let result = store
            .execute_sql(WS, "SELECT owner, COUNT(*) AS n FROM orders GROUP BY owner ORDER BY owner", &[])
            .unwrap();
        assert_eq!(result.columns, vec!["owner", "n"]);
        assert_eq!(result.rows[0], vec![SqlValue::Text("u1".into()), SqlValue::Integer(2)]);

        let result = store
            .execute_sql(WS, "UPDATE orders SET status = ? WHERE owner = ?", &[
                SqlValue::Text("void".into()),
                SqlValue::Text("u1".into()),
            ])
            .unwrap();
        assert_eq!(result.affected_rows, 2);

        assert!(matches!(
            store.execute_sql(WS, "DROP TABLE orders", &[]),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            store.execute_sql(WS, "SELECT * FROM _sys_column_comments", &[]),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            store.execute_sql(WS, "WITH x AS (SELECT 1) DELETE FROM orders", &[]),
            Err(Error::Forbidden(_))
        ));
        assert_eq!(store.list_tables(WS).unwrap()[0].row_count, 3);
    }

    #[test]
    fn integer_and_real_round_trip() {
        let (_dir, store) = store();
        orders(&store);
        let result = store
            .execute_sql(WS, "SELECT id, total FROM orders WHERE id = 1", &[])
            .unwrap();
        assert_eq!(result.rows[0], vec![SqlValue::Integer(1), SqlValue::Real(10.5)]);
    }

    #[test]
    fn alter_operations_keep_data() {
        let (_dir, store) = store();
        orders(&store);

        store
            .alter_table(WS, "orders", &AlterTable::RetypeColumn {
                name: "status".into(),
                column_type: ColumnType::Integer,
            })
            .unwrap();
        let schema = store.get_schema(WS, "orders").unwrap();
        assert_eq!(schema.column("status").unwrap().declared_type, "INTEGER");
        assert_eq!(schema.row_count, 3);

        store
            .alter_table(WS, "orders", &AlterTable::RenameColumn {
                from: "owner".into(),
                to: "owner_id".into(),
            })
            .unwrap();
        store
            .alter_table(WS, "orders", &AlterTable::DropColumn { name: "total".into() })
            .unwrap();
        store
            .alter_table(WS, "orders", &AlterTable::RenameTable { name: "purchases".into() })
            .unwrap();

        let schema = store.get_schema(WS, "purchases").unwrap();
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "owner_id", "status"]);
        assert_eq!(schema.row_count, 3);
        assert!(matches!(
            store.get_schema(WS, "orders"),
            Err(Error::TableNotFound(_))
        ));
    }

    #[test]
    fn failed_alter_leaves_schema_untouched() {
        let (_dir, store) = store();
        orders(&store);
        let err = store
            .alter_table(WS, "orders", &AlterTable::DropColumn { name: "id".into() })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(store.get_schema(WS, "orders").unwrap().columns.len(), 4);
    }

    #[test]
    fn drop_table_removes_it() {
        let (_dir, store) = store();
        orders(&store);
        store.drop_table(WS, "orders").unwrap();
        assert!(store.list_tables(WS).unwrap().is_empty());
        assert!(matches!(store.drop_table(WS, "orders"), Err(Error::TableNotFound(_))));
    }

    #[test]
    fn stats_summarize_workspace() {
        let (_dir, store) = store();
        orders(&store);
        let stats = store.stats(WS).unwrap();
        assert_eq!(stats.table_count, 1);
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.journal_mode.to_ascii_lowercase(), "wal");
        assert!(stats.size_bytes > 0);
    }
}
