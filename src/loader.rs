//! Tabular loader for uploaded files
//!
//! Turns the raw bytes of an upload into a cleaned DataFrame. The file name
//! decides the format; anything outside the allow-list is rejected before a
//! single byte is parsed.
//!
//! Cleanup always runs after parsing:
//! - rows where every cell is null are dropped
//! - columns where every cell is null are dropped
//! - headers are normalized with [`normalize_column_name`]

use std::io::Cursor;

use polars::prelude::*;

use crate::{Result, SheetsqlError};

/// Upload formats accepted by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Xlsx,
    Xls,
}

impl FileFormat {
    /// Match a file name against the extension allow-list
    pub fn from_filename(filename: &str) -> Result<Self> {
        if filename.ends_with(".csv") {
            Ok(FileFormat::Csv)
        } else if filename.ends_with(".xlsx") {
            Ok(FileFormat::Xlsx)
        } else if filename.ends_with(".xls") {
            Ok(FileFormat::Xls)
        } else {
            Err(SheetsqlError::UnsupportedFormat)
        }
    }
}

/// Parse an uploaded file and return the cleaned table
pub fn load(bytes: &[u8], filename: &str) -> Result<DataFrame> {
    let format = FileFormat::from_filename(filename)?;

    let (headers, df) = match format {
        FileFormat::Csv => read_csv(bytes)?,
        FileFormat::Xlsx | FileFormat::Xls => read_excel(bytes)?,
    };

    let df = clean(df, &headers)?;
    tracing::debug!(
        "Loaded {} as {:?}: {} rows x {} columns",
        filename,
        format,
        df.height(),
        df.width()
    );
    Ok(df)
}

/// Parse CSV bytes into raw header cells and a typed frame.
///
/// Polars renames blank and repeated headers while reading, so the header
/// record is read on its own first and the raw cells are returned alongside.
fn read_csv(bytes: &[u8]) -> Result<(Vec<String>, DataFrame)> {
    let header_row = CsvReadOptions::default()
        .with_has_header(false)
        .with_n_rows(Some(1))
        .with_infer_schema_length(Some(0))
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(|e| SheetsqlError::ParseFailure(e.to_string()))?;

    let headers: Vec<String> = header_row
        .get_columns()
        .iter()
        .map(|column| match column.get(0) {
            Ok(AnyValue::String(s)) => s.to_string(),
            Ok(AnyValue::StringOwned(s)) => s.to_string(),
            Ok(AnyValue::Null) | Err(_) => String::new(),
            Ok(other) => other.to_string(),
        })
        .collect();

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
        .finish()
        .map_err(|e| SheetsqlError::ParseFailure(e.to_string()))?;

    Ok((headers, df))
}

#[cfg(feature = "excel")]
fn read_excel(bytes: &[u8]) -> Result<(Vec<String>, DataFrame)> {
    use calamine::{open_workbook_auto_from_rs, Reader as _};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| SheetsqlError::ParseFailure(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SheetsqlError::ParseFailure("Workbook contains no worksheets".to_string()))?
        .map_err(|e| SheetsqlError::ParseFailure(e.to_string()))?;

    excel::frame_from_rows(range.rows())
}

#[cfg(not(feature = "excel"))]
fn read_excel(_bytes: &[u8]) -> Result<(Vec<String>, DataFrame)> {
    Err(SheetsqlError::ParseFailure(
        "Excel support not compiled in. Rebuild with --features excel".to_string(),
    ))
}

#[cfg(feature = "excel")]
mod excel {
    use calamine::Data;
    use chrono::{Duration, NaiveDate};
    use polars::prelude::DataFrame;

    use crate::table::{self, Cell};
    use crate::{Result, SheetsqlError};

    /// Largest integer an f64 represents exactly
    const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

    /// Build a frame from sheet rows; the first row holds the raw headers.
    ///
    /// Frame columns get positional placeholder names since sheet headers may
    /// be blank or repeated.
    pub(super) fn frame_from_rows<'a>(
        mut rows: impl Iterator<Item = &'a [Data]>,
    ) -> Result<(Vec<String>, DataFrame)> {
        let header = rows.next().ok_or_else(|| {
            SheetsqlError::ParseFailure("No columns to parse from file".to_string())
        })?;
        let headers: Vec<String> = header.iter().map(|cell| cell.to_string()).collect();

        let mut columns: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
        for row in rows {
            for (idx, column) in columns.iter_mut().enumerate() {
                column.push(row.get(idx).map(cell_from_excel).unwrap_or(Cell::Null));
            }
        }

        let named = columns
            .into_iter()
            .enumerate()
            .map(|(idx, cells)| (format!("__sheet_{}", idx), cells))
            .collect();
        let df = table::frame_from_columns(named)
            .map_err(|e| SheetsqlError::ParseFailure(e.to_string()))?;
        Ok((headers, df))
    }

    pub(super) fn cell_from_excel(data: &Data) -> Cell {
        match data {
            Data::Empty | Data::Error(_) => Cell::Null,
            Data::Bool(b) => Cell::Bool(*b),
            Data::Int(v) => Cell::Int(*v),
            Data::Float(v) if v.fract() == 0.0 && v.abs() < MAX_EXACT_INT => Cell::Int(*v as i64),
            Data::Float(v) => Cell::Float(*v),
            Data::String(s) if s.is_empty() => Cell::Null,
            Data::String(s) => Cell::Text(s.clone()),
            Data::DateTime(dt) => excel_serial_to_text(dt.as_f64())
                .map(Cell::Text)
                .unwrap_or(Cell::Null),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }

    /// Render an Excel serial date (days since 1899-12-30) as `YYYY-MM-DD HH:MM:SS`
    fn excel_serial_to_text(serial: f64) -> Option<String> {
        let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
        let millis = (serial * 86_400_000.0).round() as i64;
        let datetime = epoch.checked_add_signed(Duration::milliseconds(millis))?;
        Some(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
    }

}

/// Normalize a header: trim, spaces to underscores, and replace unnamed
/// headers with `column_<position + 1>`.
///
/// A header counts as unnamed when it is empty or carries the `Unnamed`
/// marker spreadsheet exporters write for headerless columns.
pub fn normalize_column_name(raw: &str, position: usize) -> String {
    let name = raw.trim().replace(' ', "_");
    if name.is_empty() || name.contains("Unnamed") {
        format!("column_{}", position + 1)
    } else {
        name
    }
}

/// Drop all-null rows and columns, then name the survivors from `headers`.
///
/// `headers[i]` is the raw header of the frame's `i`-th column. Columns past
/// the end of `headers` fall back to the frame's own name.
pub fn clean(df: DataFrame, headers: &[String]) -> Result<DataFrame> {
    let df = drop_empty_rows(df)?;
    let height = df.height();

    // A table without rows has no column that is provably empty.
    let columns: Vec<Column> = df
        .get_columns()
        .iter()
        .enumerate()
        .filter(|(_, column)| height == 0 || column.null_count() < height)
        .enumerate()
        .map(|(position, (idx, column))| {
            let raw = headers
                .get(idx)
                .map(String::as_str)
                .unwrap_or_else(|| column.name().as_str());
            let name = normalize_column_name(raw, position);
            column.clone().with_name(name.into())
        })
        .collect();

    if columns.is_empty() {
        return Err(SheetsqlError::ParseFailure(
            "No columns to parse from file".to_string(),
        ));
    }

    DataFrame::new(columns).map_err(|e| SheetsqlError::ParseFailure(e.to_string()))
}

fn drop_empty_rows(df: DataFrame) -> Result<DataFrame> {
    if df.width() == 0 {
        return Ok(df);
    }

    let mut keep = BooleanChunked::full("keep".into(), false, df.height());
    for column in df.get_columns() {
        keep = &keep | &column.as_materialized_series().is_not_null();
    }

    df.filter(&keep)
        .map_err(|e| SheetsqlError::ParseFailure(e.to_string()))
}
