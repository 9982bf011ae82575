/*!
sheetsql - ask questions of uploaded spreadsheets in natural language

An uploaded CSV or Excel file is parsed into a table, persisted in a SQLite
database under a generated name, and remembered in an in-memory registry.
Questions about it are turned into SQL by an external text-generation model
and executed against the stored table.

# Architecture

```text
bytes ──► loader ──► DataFrame ──► reader (SQLite) ◄── SQL ◄── translate ◄── question
                          │                                          ▲
                          └──────────► registry (file_id → table) ───┘
```

- [`loader`] parses and cleans uploaded files
- [`reader`] persists tables and runs read-only SQL against them
- [`registry`] maps upload identifiers to table metadata
- [`translate`] builds prompts and calls the text-generation model
- [`table`] converts between cells, DataFrames and JSON records
*/

pub mod loader;
pub mod reader;
pub mod registry;
pub mod table;
pub mod translate;

pub use polars::prelude::DataFrame;

/// Crate version, reported by the server binary
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors produced while loading, storing, translating or querying tables.
///
/// Messages are passed through to HTTP clients verbatim, so the variants
/// wrapping an external failure display the underlying text unchanged.
#[derive(Debug, thiserror::Error)]
pub enum SheetsqlError {
    /// The uploaded file name is not on the extension allow-list
    #[error("Only Excel and CSV files supported")]
    UnsupportedFormat,

    /// The file content could not be parsed into a table
    #[error("{0}")]
    ParseFailure(String),

    /// No upload is registered under the identifier
    #[error("File not found")]
    NotFound,

    /// The store failed to run a statement
    #[error("{0}")]
    QueryExecution(String),

    /// The statement is not a single read-only query
    #[error("{0}")]
    RejectedStatement(String),

    /// The text-generation call failed
    #[error("{0}")]
    Generation(String),

    /// The request itself is malformed
    #[error("{0}")]
    BadRequest(String),

    /// Any other failure inside the service
    #[error("{0}")]
    InternalError(String),
}

impl From<rusqlite::Error> for SheetsqlError {
    fn from(err: rusqlite::Error) -> Self {
        SheetsqlError::QueryExecution(err.to_string())
    }
}

impl From<polars::prelude::PolarsError> for SheetsqlError {
    fn from(err: polars::prelude::PolarsError) -> Self {
        SheetsqlError::InternalError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SheetsqlError>;
