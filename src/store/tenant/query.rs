//! Predicate building and row reads for the tabular operations.

use rusqlite::{Connection, Statement, params_from_iter};
use serde_json::Value;

use super::SqlResultExt;
use super::ddl::quote;
use crate::error::{Error, Result};
use crate::types::value::from_json;
use crate::types::{Filter, FilterOp, QueryParams, QueryResult, ScopeFilter, SqlValue, TableSchema};

/// A WHERE clause under construction with its positional parameters.
#[derive(Debug, Default)]
pub(crate) struct Predicate {
    clauses: Vec<String>,
    pub(crate) params: Vec<SqlValue>,
}

impl Predicate {
    pub(crate) fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    /// Renders ` WHERE a AND b` or an empty string.
    pub(crate) fn render(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// Adds the caller's filter group as one parenthesized clause joined by
    /// `combinator`.
    pub(crate) fn add_filters(&mut self, schema: &TableSchema, params: &QueryParams) -> Result<()> {
        if params.filters.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::with_capacity(params.filters.len());
        for filter in &params.filters {
            parts.push(self.filter_clause(schema, filter)?);
        }
        self.push(format!("({})", parts.join(params.combinator.as_sql())));
        Ok(())
    }

    fn filter_clause(&mut self, schema: &TableSchema, filter: &Filter) -> Result<String> {
        let column = schema
            .column(&filter.column)
            .ok_or_else(|| Error::invalid(format!("unknown filter column {}", filter.column)))?;
        let col = quote(&column.name);

        let op = match filter.op {
            FilterOp::IsNull => return Ok(format!("{col} IS NULL")),
            FilterOp::IsNotNull => return Ok(format!("{col} IS NOT NULL")),
            FilterOp::In => {
                let values = in_values(&filter.value)?;
                if values.is_empty() {
                    return Ok("0 = 1".to_string());
                }
                let placeholders = vec!["?"; values.len()].join(", ");
                self.params.extend(values);
                return Ok(format!("{col} IN ({placeholders})"));
            }
            FilterOp::Eq => "=",
            FilterOp::NotEq => "!=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Like => "LIKE",
        };
        self.params.push(from_json(&filter.value)?);
        Ok(format!("{col} {op} ?"))
    }

    /// Adds every scope filter as its own ANDed clause. A scope column the
    /// table lacks denies all rows.
    pub(crate) fn add_scope(&mut self, schema: &TableSchema, scope: &[ScopeFilter]) {
        for filter in scope {
            match filter {
                ScopeFilter::Equals { column, value } => match schema.column(column) {
                    Some(info) => {
                        self.push(format!("{} = ?", quote(&info.name)));
                        self.params.push(value.clone());
                    }
                    None => {
                        tracing::warn!(
                            table = %schema.name,
                            column = %column,
                            "row-level security column missing from table, denying access"
                        );
                        self.push("0 = 1".to_string());
                    }
                },
                ScopeFilter::DenyAll => self.push("0 = 1".to_string()),
            }
        }
    }
}

/// `IN` accepts a JSON array or a comma-separated string.
fn in_values(value: &Value) -> Result<Vec<SqlValue>> {
    match value {
        Value::Array(items) => items.iter().map(from_json).collect(),
        Value::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| SqlValue::Text(s.to_string()))
            .collect()),
        other => Ok(vec![from_json(other)?]),
    }
}

/// Reads every row of a prepared statement.
pub(crate) fn read_rows(stmt: &mut Statement<'_>, params: &[SqlValue]) -> Result<(Vec<String>, Vec<Vec<SqlValue>>)> {
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();
    let mut rows = stmt.query(params_from_iter(params.iter())).tenant()?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().tenant()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, SqlValue>(i).tenant()?);
        }
        out.push(values);
    }
    Ok((columns, out))
}

pub(crate) fn query_rows(conn: &Connection, schema: &TableSchema, params: &QueryParams) -> Result<QueryResult> {
    params.validate()?;

    let mut predicate = Predicate::default();
    predicate.add_filters(schema, params)?;
    predicate.add_scope(schema, &params.scope);
    let where_sql = predicate.render();
    let table = quote(&schema.name);

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {table}{where_sql}"),
            params_from_iter(predicate.params.iter()),
            |row| row.get(0),
        )
        .tenant()?;

    let order_sql = match &params.order_by {
        Some(column) => {
            let info = schema
                .column(column)
                .ok_or_else(|| Error::invalid(format!("unknown order column {column}")))?;
            format!(" ORDER BY {} {}", quote(&info.name), params.order_dir.as_sql())
        }
        None if !schema.primary_key.is_empty() => {
            let keys: Vec<String> = schema.primary_key.iter().map(|k| quote(k)).collect();
            format!(" ORDER BY {}", keys.join(", "))
        }
        None => String::new(),
    };

    let mut bound = predicate.params.clone();
    bound.push(SqlValue::Integer(i64::from(params.page_size)));
    bound.push(SqlValue::Integer(params.offset()));

    let mut stmt = conn
        .prepare(&format!(
            "SELECT * FROM {table}{where_sql}{order_sql} LIMIT ? OFFSET ?"
        ))
        .tenant()?;
    let (columns, rows) = read_rows(&mut stmt, &bound)?;

    Ok(QueryResult { columns, rows, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ColumnInfo, Combinator};
    use serde_json::json;

    fn schema() -> TableSchema {
        let col = |name: &str| ColumnInfo {
            name: name.to_string(),
            declared_type: "TEXT".into(),
            nullable: true,
            default: None,
            unique: false,
            primary_key: name == "id",
            comment: None,
        };
        TableSchema {
            name: "items".into(),
            columns: vec![col("id"), col("owner"), col("status")],
            primary_key: vec!["id".into()],
            indexes: vec![],
            row_count: 0,
        }
    }

    #[test]
    fn scope_stays_outside_or_group() {
        let params = QueryParams {
            filters: vec![
                Filter { column: "status".into(), op: FilterOp::Eq, value: json!("a") },
                Filter { column: "status".into(), op: FilterOp::Eq, value: json!("b") },
            ],
            combinator: Combinator::Or,
            scope: vec![ScopeFilter::Equals {
                column: "owner".into(),
                value: SqlValue::Text("u1".into()),
            }],
            ..QueryParams::default()
        };
        let mut predicate = Predicate::default();
        predicate.add_filters(&schema(), &params).unwrap();
        predicate.add_scope(&schema(), &params.scope);

        assert_eq!(
            predicate.render(),
            " WHERE (\"status\" = ? OR \"status\" = ?) AND \"owner\" = ?"
        );
        assert_eq!(predicate.params.len(), 3);
    }

    #[test]
    fn missing_scope_column_denies() {
        let mut predicate = Predicate::default();
        predicate.add_scope(
            &schema(),
            &[ScopeFilter::Equals { column: "tenant".into(), value: SqlValue::Integer(1) }],
        );
        assert_eq!(predicate.render(), " WHERE 0 = 1");
    }

    #[test]
    fn in_accepts_arrays_and_csv() {
        assert_eq!(in_values(&json!([1, "x"])).unwrap().len(), 2);
        assert_eq!(
            in_values(&json!("a, b,,c")).unwrap(),
            vec![
                SqlValue::Text("a".into()),
                SqlValue::Text("b".into()),
                SqlValue::Text("c".into())
            ]
        );
    }

    #[test]
    fn unknown_filter_column_is_rejected() {
        let params = QueryParams {
            filters: vec![Filter { column: "nope".into(), op: FilterOp::Eq, value: json!(1) }],
            ..QueryParams::default()
        };
        let mut predicate = Predicate::default();
        assert!(matches!(
            predicate.add_filters(&schema(), &params),
            Err(Error::InvalidInput(_))
        ));
    }
}
