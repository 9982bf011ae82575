//! SQLite table store
//!
//! Every upload becomes one physical table in a single SQLite database file.

use std::collections::HashSet;
use std::path::Path;

use polars::prelude::{AnyValue, DataType};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};

use super::statement::{self, StatementKind};
use super::Reader;
use crate::table::{self, Cell};
use crate::{DataFrame, Result, SheetsqlError};

/// SQLite-backed [`Reader`]
///
/// `rusqlite::Connection` is `Send` but not `Sync`; share it behind a mutex.
pub struct SqliteReader {
    conn: Connection,
}

impl SqliteReader {
    /// Open a store from a connection string
    ///
    /// - `sqlite://memory` - in-memory database
    /// - `sqlite://<path>` - database file, created if missing
    pub fn from_connection_string(uri: &str) -> Result<Self> {
        match uri.strip_prefix("sqlite://") {
            Some("memory") | Some(":memory:") => Self::in_memory(),
            Some(path) if !path.is_empty() => Self::open(path),
            _ => Err(SheetsqlError::InternalError(format!(
                "Unsupported connection string: {} (expected sqlite://<path> or sqlite://memory)",
                uri
            ))),
        }
    }

    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            SheetsqlError::InternalError(format!(
                "Failed to open database {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            SheetsqlError::InternalError(format!("Failed to open in-memory database: {}", e))
        })?;
        Ok(Self { conn })
    }
}

impl Reader for SqliteReader {
    fn execute_sql(&self, sql: &str) -> Result<DataFrame> {
        if statement::classify(sql) != StatementKind::Select {
            tracing::warn!("Rejected non-query statement: {}", sql);
            return Err(rejected(sql));
        }

        let mut stmt = self.conn.prepare(statement::statement_body(sql))?;
        if !stmt.readonly() {
            tracing::warn!("Rejected statement that writes to the database: {}", sql);
            return Err(rejected(sql));
        }

        let names = unique_names(stmt.column_names());
        let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); names.len()];

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (idx, column) in columns.iter_mut().enumerate() {
                column.push(cell_from_sql(row.get_ref(idx)?));
            }
        }

        table::frame_from_columns(names.into_iter().zip(columns).collect())
    }

    fn register(&mut self, name: &str, df: &DataFrame) -> Result<usize> {
        let table = quote_identifier(name);
        let columns = df.get_columns();

        let column_defs = columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(c.name().as_str()), sql_type(c.dtype())))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
        tx.execute(&format!("CREATE TABLE {} ({})", table, column_defs), [])?;
        {
            let mut insert = tx.prepare(&format!("INSERT INTO {} VALUES ({})", table, placeholders))?;
            for idx in 0..df.height() {
                let values = columns
                    .iter()
                    .map(|c| c.get(idx).map(any_value_to_sql))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                insert.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        tracing::info!("Stored {} rows in table '{}'", df.height(), name);
        Ok(df.height())
    }
}

fn rejected(sql: &str) -> SheetsqlError {
    SheetsqlError::RejectedStatement(format!(
        "Only single read-only SELECT statements can be executed, got: {}",
        sql.trim()
    ))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_type(dtype: &DataType) -> &'static str {
    if dtype.is_integer() || matches!(dtype, DataType::Boolean) {
        "INTEGER"
    } else if dtype.is_float() {
        "REAL"
    } else {
        "TEXT"
    }
}

fn any_value_to_sql(value: AnyValue<'_>) -> SqlValue {
    match value {
        AnyValue::Null => SqlValue::Null,
        AnyValue::Boolean(b) => SqlValue::Integer(b as i64),
        AnyValue::Int32(v) => SqlValue::Integer(v as i64),
        AnyValue::Int64(v) => SqlValue::Integer(v),
        AnyValue::UInt32(v) => SqlValue::Integer(v as i64),
        AnyValue::UInt64(v) => match i64::try_from(v) {
            Ok(v) => SqlValue::Integer(v),
            Err(_) => SqlValue::Real(v as f64),
        },
        AnyValue::Float32(v) if v.is_nan() => SqlValue::Null,
        AnyValue::Float32(v) => SqlValue::Real(v as f64),
        AnyValue::Float64(v) if v.is_nan() => SqlValue::Null,
        AnyValue::Float64(v) => SqlValue::Real(v),
        AnyValue::String(s) => SqlValue::Text(s.to_string()),
        AnyValue::StringOwned(s) => SqlValue::Text(s.to_string()),
        other => SqlValue::Text(format!("{}", other)),
    }
}

fn cell_from_sql(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(v) => Cell::Int(v),
        ValueRef::Real(v) => Cell::Float(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Cell::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Result sets may repeat a column name (`SELECT a, a`); later occurrences
/// get a `_<n>` suffix.
fn unique_names(names: Vec<&str>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.to_string();
            let mut n = 2;
            while seen.contains(&candidate) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            seen.insert(candidate.clone());
            candidate
        })
        .collect()
}
