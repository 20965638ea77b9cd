use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::value::{BlobEncoding, SqlValue, to_json};
use crate::error::{Error, Result};

/// Declared column types accepted by `create_table` and `alter_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Timestamp,
}

impl ColumnType {
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTEGER" => Some(ColumnType::Integer),
            "REAL" => Some(ColumnType::Real),
            "TEXT" => Some(ColumnType::Text),
            "BLOB" => Some(ColumnType::Blob),
            "TIMESTAMP" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ColumnType::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown column type {raw:?}, expected INTEGER, REAL, TEXT, BLOB or TIMESTAMP"
            ))
        })
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

/// A single schema change applied by `alter_table`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AlterTable {
    AddColumn {
        column: ColumnDef,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    RetypeColumn {
        name: String,
        #[serde(rename = "type")]
        column_type: ColumnType,
    },
    DropColumn {
        name: String,
    },
    RenameTable {
        name: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub unique: bool,
    pub primary_key: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub indexes: Vec<IndexInfo>,
    pub row_count: i64,
}

impl TableSchema {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub column_count: i64,
    pub row_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub table_count: i64,
    pub index_count: i64,
    pub total_rows: i64,
    pub size_bytes: i64,
    pub journal_mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    /// Parses an operator as written by clients. Unknown operators are an
    /// input error.
    pub fn parse(raw: &str) -> Result<Self> {
        let op = match raw.trim().to_ascii_uppercase().as_str() {
            "=" | "==" | "EQ" => FilterOp::Eq,
            "!=" | "<>" | "NEQ" => FilterOp::NotEq,
            "<" | "LT" => FilterOp::Lt,
            "<=" | "LTE" => FilterOp::Lte,
            ">" | "GT" => FilterOp::Gt,
            ">=" | "GTE" => FilterOp::Gte,
            "LIKE" => FilterOp::Like,
            "IN" => FilterOp::In,
            "NULL" | "IS NULL" => FilterOp::IsNull,
            "NOT NULL" | "IS NOT NULL" => FilterOp::IsNotNull,
            _ => return Err(Error::invalid(format!("unknown filter operator {raw:?}"))),
        };
        Ok(op)
    }

    #[must_use]
    pub fn takes_value(&self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::IsNotNull)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" | "" => Ok(Combinator::And),
            "OR" => Ok(Combinator::Or),
            _ => Err(Error::invalid(format!("unknown filter combinator {raw:?}"))),
        }
    }

    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            Combinator::And => " AND ",
            Combinator::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDir {
    #[default]
    Asc,
    Desc,
}

impl OrderDir {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ASC" | "" => Ok(OrderDir::Asc),
            "DESC" => Ok(OrderDir::Desc),
            _ => Err(Error::invalid(format!("unknown order direction {raw:?}"))),
        }
    }

    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDir::Asc => "ASC",
            OrderDir::Desc => "DESC",
        }
    }
}

/// Row restriction contributed by row-level security.
///
/// Scope filters are always ANDed with each other and with the caller's
/// filter group, whatever combinator the caller picked.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeFilter {
    Equals { column: String, value: SqlValue },
    DenyAll,
}

pub const MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct QueryParams {
    pub page: u32,
    pub page_size: u32,
    pub order_by: Option<String>,
    pub order_dir: OrderDir,
    pub filters: Vec<Filter>,
    pub combinator: Combinator,
    pub scope: Vec<ScopeFilter>,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            order_by: None,
            order_dir: OrderDir::Asc,
            filters: Vec::new(),
            combinator: Combinator::And,
            scope: Vec::new(),
        }
    }
}

impl QueryParams {
    pub fn validate(&self) -> Result<()> {
        if self.page < 1 {
            return Err(Error::invalid("page must be at least 1"));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::invalid(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

/// A page of rows plus the total count of rows matching the same predicate.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub total: i64,
}

impl QueryResult {
    /// Rows as JSON objects keyed by column name.
    #[must_use]
    pub fn rows_json(&self, blobs: BlobEncoding) -> Vec<Value> {
        rows_to_json(&self.columns, &self.rows, blobs)
    }
}

#[must_use]
pub fn rows_to_json(columns: &[String], rows: &[Vec<SqlValue>], blobs: BlobEncoding) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            let object = columns
                .iter()
                .zip(row)
                .map(|(column, value)| (column.clone(), to_json(value, blobs)))
                .collect();
            Value::Object(object)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExecResult {
    pub affected_rows: u64,
    pub last_insert_id: Option<i64>,
}

/// Result of a guarded raw statement.
#[derive(Debug, Clone)]
pub struct SqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub affected_rows: u64,
    pub last_insert_id: Option<i64>,
}
