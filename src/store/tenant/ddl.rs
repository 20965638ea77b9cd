//! Schema rendering, introspection, and table rebuilds.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::SqlResultExt;
use super::connection::COMMENTS_TABLE;
use crate::error::{Error, Result};
use crate::types::{
    AlterTable, ColumnDef, ColumnInfo, ColumnType, IndexInfo, TableDef, TableSchema,
};
use crate::validation::validate_identifier;

const REBUILD_TABLE: &str = "_sys_rebuild";

/// Quotes an identifier for interpolation into SQL.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn check_identifier(name: &str, entity: &str) -> Result<()> {
    validate_identifier(name, entity).map_err(Error::InvalidInput)
}

/// Column as it is rendered into `CREATE TABLE`, either from a client
/// definition or from the live schema.
#[derive(Debug, Clone)]
struct ColumnSpec {
    name: String,
    decl_type: String,
    not_null: bool,
    default_sql: Option<String>,
    unique: bool,
}

impl ColumnSpec {
    fn from_def(def: &ColumnDef) -> Result<Self> {
        let default_sql = def
            .default
            .as_ref()
            .map(|v| default_literal(v, def.column_type))
            .transpose()?;
        Ok(Self {
            name: def.name.clone(),
            decl_type: def.column_type.as_sql().to_string(),
            not_null: !def.nullable,
            default_sql,
            unique: def.unique,
        })
    }

    fn from_info(info: &ColumnInfo) -> Self {
        Self {
            name: info.name.clone(),
            decl_type: info.declared_type.clone(),
            not_null: !info.nullable,
            default_sql: info.default.clone(),
            unique: info.unique,
        }
    }

    fn render(&self, rowid_alias: bool) -> String {
        let mut sql = format!("{} {}", quote(&self.name), self.decl_type);
        if rowid_alias {
            sql.push_str(" PRIMARY KEY");
            return sql;
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_sql {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Renders a JSON default as a SQL literal.
fn default_literal(value: &Value, column_type: ColumnType) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => {
            let upper = s.trim().to_ascii_uppercase();
            let is_clock = matches!(
                upper.as_str(),
                "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME"
            );
            if is_clock && matches!(column_type, ColumnType::Timestamp | ColumnType::Text) {
                Ok(upper)
            } else {
                Ok(format!("'{}'", s.replace('\'', "''")))
            }
        }
        _ => Err(Error::invalid("column defaults must be scalar values")),
    }
}

fn is_clock_default(sql: Option<&str>) -> bool {
    matches!(
        sql,
        Some("CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME")
    )
}

fn create_table_sql(table: &str, columns: &[ColumnSpec], primary_key: &[String]) -> String {
    let rowid_alias = match primary_key {
        [only] => columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(only))
            .is_some_and(|c| c.decl_type.eq_ignore_ascii_case("INTEGER")),
        _ => false,
    };

    let mut parts: Vec<String> = columns
        .iter()
        .map(|c| {
            let is_pk = primary_key.iter().any(|k| k.eq_ignore_ascii_case(&c.name));
            if is_pk && rowid_alias {
                c.render(true)
            } else if is_pk {
                ColumnSpec { not_null: true, ..c.clone() }.render(false)
            } else {
                c.render(false)
            }
        })
        .collect();

    if !rowid_alias && !primary_key.is_empty() {
        let keys: Vec<String> = primary_key.iter().map(|k| quote(k)).collect();
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }

    format!("CREATE TABLE {} ({})", quote(table), parts.join(", "))
}

/// Returns the stored name of `table`, matching case-insensitively.
pub(crate) fn resolve_table(conn: &Connection, table: &str) -> Result<String> {
    check_identifier(table, "Table")?;
    find_table(conn, table)?.ok_or_else(|| Error::TableNotFound(table.to_string()))
}

fn find_table(conn: &Connection, table: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        params![table],
        |row| row.get(0),
    )
    .optional()
    .tenant()
}

/// Reads the live schema of an existing table, including its row count.
pub(crate) fn introspect(conn: &Connection, table: &str) -> Result<TableSchema> {
    let mut schema = describe(conn, table)?;
    schema.row_count = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| row.get(0))
        .tenant()?;
    Ok(schema)
}

/// Reads the live schema of an existing table without counting rows.
pub(crate) fn describe(conn: &Connection, table: &str) -> Result<TableSchema> {
    let mut columns = Vec::new();
    let mut pk_order: Vec<(i64, String)> = Vec::new();
    {
        let mut stmt = conn
            .prepare(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
            )
            .tenant()?;
        let rows = stmt
            .query_map(params![table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .tenant()?;
        for row in rows {
            let (name, declared_type, not_null, default, pk) = row.tenant()?;
            if pk > 0 {
                pk_order.push((pk, name.clone()));
            }
            columns.push(ColumnInfo {
                name,
                declared_type,
                nullable: !not_null && pk == 0,
                default,
                unique: false,
                primary_key: pk > 0,
                comment: None,
            });
        }
    }
    if columns.is_empty() {
        return Err(Error::TableNotFound(table.to_string()));
    }
    pk_order.sort();
    let primary_key: Vec<String> = pk_order.into_iter().map(|(_, name)| name).collect();

    let mut indexes = Vec::new();
    {
        let mut list = conn
            .prepare("SELECT name, \"unique\", origin FROM pragma_index_list(?1)")
            .tenant()?;
        let entries = list
            .query_map(params![table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .tenant()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .tenant()?;

        for (name, unique, origin) in entries {
            let index_columns = index_columns(conn, &name)?;
            match origin.as_str() {
                "u" if index_columns.len() == 1 => {
                    if let Some(col) = columns
                        .iter_mut()
                        .find(|c| c.name.eq_ignore_ascii_case(&index_columns[0]))
                    {
                        col.unique = true;
                    }
                }
                "c" => indexes.push(IndexInfo {
                    name,
                    columns: index_columns,
                    unique,
                }),
                _ => {}
            }
        }
    }
    indexes.sort_by(|a, b| a.name.cmp(&b.name));

    {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT column_name, comment FROM {COMMENTS_TABLE} WHERE table_name = ?1"
            ))
            .tenant()?;
        let comments = stmt
            .query_map(params![table], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .tenant()?;
        for comment in comments {
            let (column, text) = comment.tenant()?;
            if let Some(col) = columns.iter_mut().find(|c| c.name == column) {
                col.comment = Some(text);
            }
        }
    }

    Ok(TableSchema {
        name: table.to_string(),
        columns,
        primary_key,
        indexes,
        row_count: 0,
    })
}

fn index_columns(conn: &Connection, index: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
        .tenant()?;
    let names = stmt
        .query_map(params![index], |row| row.get::<_, Option<String>>(0))
        .tenant()?
        .collect::<std::result::Result<Vec<_>, _>>()
        .tenant()?;
    Ok(names.into_iter().flatten().collect())
}

fn set_comment(conn: &Connection, table: &str, column: &str, comment: Option<&str>) -> Result<()> {
    match comment {
        Some(text) => conn.execute(
            &format!(
                "INSERT INTO {COMMENTS_TABLE} (table_name, column_name, comment) VALUES (?1, ?2, ?3)
                 ON CONFLICT (table_name, column_name) DO UPDATE SET comment = excluded.comment"
            ),
            params![table, column, text],
        ),
        None => conn.execute(
            &format!("DELETE FROM {COMMENTS_TABLE} WHERE table_name = ?1 AND column_name = ?2"),
            params![table, column],
        ),
    }
    .tenant()?;
    Ok(())
}

/// Validates a definition before anything touches the database.
fn validate_def(def: &TableDef) -> Result<()> {
    check_identifier(&def.name, "Table")?;
    if def.columns.is_empty() {
        return Err(Error::invalid("a table needs at least one column"));
    }

    let mut seen = HashSet::new();
    for column in &def.columns {
        check_identifier(&column.name, "Column")?;
        if !seen.insert(column.name.to_ascii_lowercase()) {
            return Err(Error::invalid(format!("duplicate column {}", column.name)));
        }
    }

    if def.primary_key.is_empty() {
        return Err(Error::invalid("a table needs a primary key"));
    }
    let mut pk_seen = HashSet::new();
    for key in &def.primary_key {
        if !seen.contains(&key.to_ascii_lowercase()) {
            return Err(Error::invalid(format!(
                "primary key references missing column {key}"
            )));
        }
        if !pk_seen.insert(key.to_ascii_lowercase()) {
            return Err(Error::invalid(format!("duplicate primary key column {key}")));
        }
    }

    for index in &def.indexes {
        check_identifier(&index.name, "Index")?;
        if index.columns.is_empty() {
            return Err(Error::invalid(format!("index {} has no columns", index.name)));
        }
        for column in &index.columns {
            if !seen.contains(&column.to_ascii_lowercase()) {
                return Err(Error::invalid(format!(
                    "index {} references missing column {column}",
                    index.name
                )));
            }
        }
    }
    Ok(())
}

pub(crate) fn create_table(conn: &mut Connection, def: &TableDef) -> Result<()> {
    validate_def(def)?;
    let specs = def
        .columns
        .iter()
        .map(ColumnSpec::from_def)
        .collect::<Result<Vec<_>>>()?;

    let tx = conn.transaction().tenant()?;
    if find_table(&tx, &def.name)?.is_some() {
        return Err(Error::TableExists(def.name.clone()));
    }

    tx.execute_batch(&create_table_sql(&def.name, &specs, &def.primary_key))
        .tenant()?;
    for index in &def.indexes {
        let columns: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
        tx.execute_batch(&format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote(&index.name),
            quote(&def.name),
            columns.join(", ")
        ))
        .tenant()?;
    }
    for column in &def.columns {
        if let Some(comment) = &column.comment {
            set_comment(&tx, &def.name, &column.name, Some(comment))?;
        }
    }
    tx.commit().tenant()?;
    Ok(())
}

pub(crate) fn drop_table(conn: &mut Connection, table: &str) -> Result<()> {
    let tx = conn.transaction().tenant()?;
    let table = resolve_table(&tx, table)?;
    tx.execute_batch(&format!("DROP TABLE {}", quote(&table)))
        .tenant()?;
    tx.execute(
        &format!("DELETE FROM {COMMENTS_TABLE} WHERE table_name = ?1"),
        params![table],
    )
    .tenant()?;
    tx.commit().tenant()?;
    Ok(())
}

pub(crate) fn alter_table(conn: &mut Connection, table: &str, change: &AlterTable) -> Result<()> {
    let tx = conn.transaction().tenant()?;
    let table = resolve_table(&tx, table)?;
    let schema = describe(&tx, &table)?;

    match change {
        AlterTable::AddColumn { column } => {
            check_identifier(&column.name, "Column")?;
            if schema.has_column(&column.name) {
                return Err(Error::invalid(format!("column {} already exists", column.name)));
            }
            let spec = ColumnSpec::from_def(column)?;
            if spec.unique || is_clock_default(spec.default_sql.as_deref()) {
                let mut specs: Vec<ColumnSpec> =
                    schema.columns.iter().map(ColumnSpec::from_info).collect();
                specs.push(spec);
                rebuild(&tx, &schema, specs)?;
            } else {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote(&table),
                    spec.render(false)
                ))
                .tenant()?;
            }
            if let Some(comment) = &column.comment {
                set_comment(&tx, &table, &column.name, Some(comment))?;
            }
        }
        AlterTable::RenameColumn { from, to } => {
            let current = schema
                .column(from)
                .ok_or_else(|| Error::invalid(format!("column {from} does not exist")))?
                .name
                .clone();
            check_identifier(to, "Column")?;
            if schema.has_column(to) && !current.eq_ignore_ascii_case(to) {
                return Err(Error::invalid(format!("column {to} already exists")));
            }
            tx.execute_batch(&format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote(&table),
                quote(&current),
                quote(to)
            ))
            .tenant()?;
            tx.execute(
                &format!(
                    "UPDATE {COMMENTS_TABLE} SET column_name = ?3 WHERE table_name = ?1 AND column_name = ?2"
                ),
                params![table, current, to],
            )
            .tenant()?;
        }
        AlterTable::RetypeColumn { name, column_type } => {
            let current = schema
                .column(name)
                .ok_or_else(|| Error::invalid(format!("column {name} does not exist")))?
                .name
                .clone();
            let specs = schema
                .columns
                .iter()
                .map(|info| {
                    let mut spec = ColumnSpec::from_info(info);
                    if spec.name == current {
                        spec.decl_type = column_type.as_sql().to_string();
                    }
                    spec
                })
                .collect();
            rebuild(&tx, &schema, specs)?;
        }
        AlterTable::DropColumn { name } => {
            let info = schema
                .column(name)
                .ok_or_else(|| Error::invalid(format!("column {name} does not exist")))?;
            if info.primary_key {
                return Err(Error::invalid(format!(
                    "cannot drop primary key column {}",
                    info.name
                )));
            }
            if schema.columns.len() == 1 {
                return Err(Error::invalid("cannot drop the only column of a table"));
            }
            let dropped = info.name.clone();
            let specs = schema
                .columns
                .iter()
                .filter(|c| c.name != dropped)
                .map(ColumnSpec::from_info)
                .collect();
            rebuild(&tx, &schema, specs)?;
            set_comment(&tx, &table, &dropped, None)?;
        }
        AlterTable::RenameTable { name } => {
            check_identifier(name, "Table")?;
            if let Some(existing) = find_table(&tx, name)? {
                if !existing.eq_ignore_ascii_case(&table) {
                    return Err(Error::TableExists(name.clone()));
                }
            }
            tx.execute_batch(&format!(
                "ALTER TABLE {} RENAME TO {}",
                quote(&table),
                quote(name)
            ))
            .tenant()?;
            tx.execute(
                &format!("UPDATE {COMMENTS_TABLE} SET table_name = ?2 WHERE table_name = ?1"),
                params![table, name],
            )
            .tenant()?;
        }
    }

    tx.commit().tenant()?;
    Ok(())
}

/// Recreates `schema.name` with `columns`, copying the rows of every column
/// that survives and restoring user indexes whose columns all survive.
fn rebuild(conn: &Connection, schema: &TableSchema, columns: Vec<ColumnSpec>) -> Result<()> {
    let kept: Vec<String> = columns
        .iter()
        .filter(|c| schema.has_column(&c.name))
        .map(|c| quote(&c.name))
        .collect();

    let index_sql: Vec<String> = {
        let mut stmt = conn
            .prepare(
                "SELECT name, sql FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
            )
            .tenant()?;
        let rows = stmt
            .query_map(params![schema.name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .tenant()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .tenant()?;
        rows.into_iter()
            .filter(|(name, _)| {
                schema
                    .indexes
                    .iter()
                    .find(|i| &i.name == name)
                    .is_some_and(|i| {
                        i.columns
                            .iter()
                            .all(|col| columns.iter().any(|c| c.name.eq_ignore_ascii_case(col)))
                    })
            })
            .map(|(_, sql)| sql)
            .collect()
    };

    conn.execute_batch(&create_table_sql(REBUILD_TABLE, &columns, &schema.primary_key))
        .tenant()?;
    if !kept.is_empty() {
        conn.execute_batch(&format!(
            "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
            quote(REBUILD_TABLE),
            quote(&schema.name),
            cols = kept.join(", ")
        ))
        .tenant()?;
    }
    conn.execute_batch(&format!("DROP TABLE {}", quote(&schema.name)))
        .tenant()?;
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote(REBUILD_TABLE),
        quote(&schema.name)
    ))
    .tenant()?;
    for sql in index_sql {
        conn.execute_batch(&sql).tenant()?;
    }
    Ok(())
}
