//! Upload registry for sheetsql-rest
//!
//! The registry maps each upload's `file_id` to metadata about its stored
//! table. Each record:
//! - Has a short random identifier (8 hex chars of a v4 UUID)
//! - Names its physical table `table_{file_id}`
//! - Lives for the process lifetime only; nothing here is persisted
//!
//! The registry and the store are correlated solely through `table_name`.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use uuid::Uuid;

use crate::{Result, SheetsqlError};

/// Metadata about one uploaded table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedTable {
    /// Opaque identifier handed to the client
    pub file_id: String,
    /// File name as supplied by the client
    pub filename: String,
    /// Normalized column names, in physical order
    pub columns: Vec<String>,
    /// Row count persisted at upload time
    pub rows: usize,
    /// Name of the physical table in the store
    pub table_name: String,
}

impl UploadedTable {
    pub fn new(file_id: String, filename: String, columns: Vec<String>, rows: usize) -> Self {
        let table_name = storage_name(&file_id);
        Self {
            file_id,
            filename,
            columns,
            rows,
            table_name,
        }
    }
}

/// Generate a fresh upload identifier
///
/// Collisions are not checked; 32 bits of randomness are trusted to be enough
/// for one process lifetime.
pub fn generate_file_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Physical table name for an identifier
pub fn storage_name(file_id: &str) -> String {
    format!("table_{}", file_id)
}

/// Registered uploads, safe for concurrent insert and lookup
#[derive(Debug, Default)]
pub struct Registry {
    tables: RwLock<HashMap<String, UploadedTable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upload and return its identifier
    pub fn register(&self, table: UploadedTable) -> Result<String> {
        let mut tables = self.tables.write().map_err(|e| {
            SheetsqlError::InternalError(format!("Registry unavailable (lock poisoned): {}", e))
        })?;
        let file_id = table.file_id.clone();
        tables.insert(file_id.clone(), table);
        Ok(file_id)
    }

    /// Look up an upload by identifier
    pub fn resolve(&self, file_id: &str) -> Result<UploadedTable> {
        let tables = self.tables.read().map_err(|e| {
            SheetsqlError::InternalError(format!("Registry unavailable (lock poisoned): {}", e))
        })?;
        tables.get(file_id).cloned().ok_or(SheetsqlError::NotFound)
    }

    /// Number of registered uploads (for health check)
    pub fn len(&self) -> usize {
        match self.tables.read() {
            Ok(tables) => tables.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
