//! Table store abstraction for sheetsql
//!
//! The reader module persists uploaded tables and runs generated SQL against
//! them, returning Polars DataFrames.
//!
//! # Architecture
//!
//! All stores implement the `Reader` trait, which provides:
//! - DataFrame registration as a named, queryable table
//! - SQL query execution → DataFrame conversion
//!
//! Only single read-only statements are executed; see [`statement`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sheetsql::reader::{Reader, SqliteReader};
//!
//! let mut reader = SqliteReader::from_connection_string("sqlite://data.db")?;
//! reader.register("table_1a2b3c4d", &df)?;
//! let result = reader.execute_sql("SELECT * FROM table_1a2b3c4d LIMIT 100")?;
//! ```

use crate::{DataFrame, Result};

pub mod sqlite;
pub mod statement;

pub use sqlite::SqliteReader;
pub use statement::StatementKind;

/// Trait for table stores
///
/// Stores hold named tables and execute SQL against them.
pub trait Reader {
    /// Execute a SQL query and return the result as a DataFrame
    ///
    /// # Errors
    ///
    /// Returns `SheetsqlError::RejectedStatement` if the SQL is anything but a
    /// single read-only query, and `SheetsqlError::QueryExecution` if:
    /// - The SQL is invalid
    /// - The table or columns don't exist
    fn execute_sql(&self, sql: &str) -> Result<DataFrame>;

    /// Persist a DataFrame as a queryable table
    ///
    /// An existing table with the same name is replaced. Column types are
    /// derived from the DataFrame's dtypes.
    ///
    /// # Returns
    ///
    /// The number of rows written.
    fn register(&mut self, name: &str, df: &DataFrame) -> Result<usize>;
}
