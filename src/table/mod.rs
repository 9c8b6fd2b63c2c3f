//! Virtual-table collaborator boundary
//!
//! Every pluggable table exposes three operations to the core: an attach
//! step invoked once per database handle, a constraint-reset step invoked
//! after a query, and a static-attribute query. The core has no other
//! knowledge of table internals; row production is entirely the table's
//! business.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Semantic type of a result column.
///
/// `Unknown` is an explicit sentinel: a column whose type could not be
/// determined must never be silently promoted to a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Unknown,
    Text,
    Integer,
    BigInt,
    UnsignedBigInt,
    Double,
    Blob,
}

impl ColumnType {
    /// The SQL declared-type spelling for this column type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Unknown => "UNKNOWN",
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::UnsignedBigInt => "UNSIGNED BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Blob => "BLOB",
        }
    }

    /// Map a SQLite declared column type to a semantic type.
    ///
    /// Unrecognized or absent declarations map to `Unknown`.
    pub fn from_decl_type(decl: &str) -> ColumnType {
        match decl.to_ascii_uppercase().as_str() {
            "TEXT" | "VARCHAR" => ColumnType::Text,
            "INTEGER" | "INT" => ColumnType::Integer,
            "BIGINT" => ColumnType::BigInt,
            "UNSIGNED BIGINT" => ColumnType::UnsignedBigInt,
            "DOUBLE" | "REAL" | "FLOAT" => ColumnType::Double,
            "BLOB" => ColumnType::Blob,
            _ => ColumnType::Unknown,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named result column and its inferred or declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Static attributes of a virtual table.
///
/// Attributes from multiple tables combine with [`TableAttributes::or`];
/// a query touching any event-sourced table is treated as event-sourced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAttributes {
    /// The table is append-only; successive result sets should not be
    /// compared by set difference.
    pub event_based: bool,
    /// Results for this table may be served from a warm cache.
    pub cacheable: bool,
}

impl TableAttributes {
    pub fn or(self, other: TableAttributes) -> TableAttributes {
        TableAttributes {
            event_based: self.event_based || other.event_based,
            cacheable: self.cacheable || other.cacheable,
        }
    }
}

/// A pluggable data source the engine treats as an ordinary SQL table.
///
/// Implementations produce rows from external state (live OS data, cached
/// results). The core only ever attaches a table to a connection, clears
/// its per-query constraint state, and reads its static attributes.
pub trait VirtualTable: Send + Sync {
    /// The table's SQL name.
    fn name(&self) -> &str;

    /// Register this table's schema and columns on a connection.
    ///
    /// Called once per database handle, while the handle's attach lock is
    /// held.
    fn attach(&self, conn: &Connection) -> Result<()>;

    /// Drop per-query constraint and result state.
    ///
    /// Called when an instance that touched this table is torn down; after
    /// returning, the table must accept a fresh query with no residual
    /// state.
    fn clear_constraints(&self);

    /// Static attributes of this table.
    fn attributes(&self) -> TableAttributes {
        TableAttributes::default()
    }
}
