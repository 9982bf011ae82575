//! Cell values and DataFrame conversion helpers
//!
//! Excel sheets and SQLite result sets arrive cell by cell with no declared
//! column types. [`frame_from_columns`] turns such cells into a typed
//! DataFrame, choosing one dtype per column from the non-null cells:
//!
//! - only booleans → `Boolean`
//! - only integers → `Int64`
//! - integers and floats → `Float64`
//! - anything else → `String`
//!
//! The other direction, DataFrame rows → JSON objects, is what HTTP responses
//! carry as `preview` and `data`.

use polars::prelude::*;
use serde_json::{Map, Value};

use crate::Result;

/// A single untyped value read from a source file or a result set
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    fn into_text(self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Text(s) => Some(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
}

fn infer_kind(cells: &[Cell]) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for cell in cells.iter().filter(|c| !c.is_null()) {
        let cell_kind = match cell {
            Cell::Bool(_) => ColumnKind::Bool,
            Cell::Int(_) => ColumnKind::Int,
            Cell::Float(_) => ColumnKind::Float,
            _ => ColumnKind::Text,
        };
        kind = Some(match (kind, cell_kind) {
            (None, k) => k,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

/// Build a typed column from untyped cells
pub fn column_from_cells(name: &str, cells: Vec<Cell>) -> Column {
    let series = match infer_kind(&cells) {
        ColumnKind::Bool => {
            let values: Vec<Option<bool>> = cells
                .into_iter()
                .map(|c| match c {
                    Cell::Bool(b) => Some(b),
                    _ => None,
                })
                .collect();
            Series::new(name.into(), values)
        }
        ColumnKind::Int => {
            let values: Vec<Option<i64>> = cells
                .into_iter()
                .map(|c| match c {
                    Cell::Int(v) => Some(v),
                    _ => None,
                })
                .collect();
            Series::new(name.into(), values)
        }
        ColumnKind::Float => {
            let values: Vec<Option<f64>> = cells
                .into_iter()
                .map(|c| match c {
                    Cell::Int(v) => Some(v as f64),
                    Cell::Float(v) => Some(v),
                    _ => None,
                })
                .collect();
            Series::new(name.into(), values)
        }
        ColumnKind::Text => {
            let values: Vec<Option<String>> = cells.into_iter().map(Cell::into_text).collect();
            Series::new(name.into(), values)
        }
    };
    Column::from(series)
}

/// Build a DataFrame from named columns of cells, preserving column order
pub fn frame_from_columns(columns: Vec<(String, Vec<Cell>)>) -> Result<DataFrame> {
    let columns: Vec<Column> = columns
        .into_iter()
        .map(|(name, cells)| column_from_cells(&name, cells))
        .collect();
    Ok(DataFrame::new(columns)?)
}

/// Column names of a DataFrame, in physical order
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Convert a single value from a Polars Column to JSON
pub fn column_value_to_json(column: &Column, idx: usize) -> Value {
    let any_value = match column.get(idx) {
        Ok(v) => v,
        Err(_) => return Value::Null,
    };

    match any_value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Int32(v) => Value::Number(v.into()),
        AnyValue::Int64(v) => Value::Number(v.into()),
        AnyValue::UInt32(v) => Value::Number(v.into()),
        AnyValue::UInt64(v) => Value::Number(v.into()),
        AnyValue::Float32(v) => serde_json::Number::from_f64(v as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::Float64(v) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        other => {
            tracing::debug!("Converting unsupported Polars type to string: {:?}", other);
            Value::String(format!("{}", other))
        }
    }
}

/// Convert DataFrame rows into JSON objects keyed by column name.
///
/// Keys keep the frame's column order (serde_json `preserve_order`).
/// `limit` caps the number of rows converted; `None` converts every row.
pub fn to_records(df: &DataFrame, limit: Option<usize>) -> Vec<Value> {
    let rows = limit.map_or(df.height(), |n| n.min(df.height()));
    let columns = df.get_columns();

    let mut records = Vec::with_capacity(rows);
    for i in 0..rows {
        let mut row_obj = Map::new();
        for column in columns {
            row_obj.insert(column.name().to_string(), column_value_to_json(column, i));
        }
        records.push(Value::Object(row_obj));
    }
    records
}
