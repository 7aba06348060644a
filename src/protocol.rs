//! Result shapes handed over by the wire-protocol layer.
//!
//! Framing and message parsing live in the connection implementation; this
//! module only describes what a finished statement execution looks like:
//! column descriptions, raw column payloads and the command tag.

use std::sync::Arc;

use bytes::Bytes;

use crate::types::{Format, Oid};

/// Field description from a RowDescription message.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

impl FieldDescription {
    /// Describe a computed column (no source table).
    pub fn new(name: impl Into<String>, type_oid: Oid, format: Format) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_attr: 0,
            type_oid,
            type_size: -1,
            type_modifier: -1,
            format,
        }
    }
}

/// Shared column descriptions - wrapped in Arc to avoid cloning on every query.
pub type SharedColumns = Arc<Vec<FieldDescription>>;

/// One DataRow: a payload per column, `None` for SQL NULL.
pub type RawRow = Vec<Option<Bytes>>;

/// Undecoded result of executing a statement.
#[derive(Debug, Clone)]
pub struct RawResult {
    /// Columns as the server describes them, including the format actually used
    pub columns: SharedColumns,
    pub rows: Vec<RawRow>,
    /// Command tag (e.g., "SELECT 5" or "INSERT 0 1")
    pub command_tag: String,
}

impl RawResult {
    /// Rows affected, parsed from the command tag.
    pub fn rows_affected(&self) -> u64 {
        parse_rows_affected(&self.command_tag)
    }
}

/// Parse rows affected from a PostgreSQL command tag.
pub fn parse_rows_affected(tag: &str) -> u64 {
    // Common formats:
    // - "INSERT 0 5" -> 5 rows
    // - "UPDATE 3" -> 3 rows
    // - "DELETE 2" -> 2 rows
    // - "SELECT 10" -> 10 rows

    let parts: Vec<&str> = tag.split_whitespace().collect();
    match parts.as_slice() {
        ["INSERT", _, n] | ["UPDATE", n] | ["DELETE", n] | ["SELECT", n] | ["COPY", n] => {
            n.parse().unwrap_or(0)
        }
        _ => 0,
    }
}
