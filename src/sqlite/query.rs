//! Query execution and result-column introspection
//!
//! Thin orchestration over a [`SqliteInstance`]: run a query and collect
//! rows, or introspect a query's result columns. Columns whose declared
//! type is unavailable (expressions, computed columns) are handed to the
//! [`QueryPlanner`] for trace-based inference; inference incompleteness is
//! non-fatal and leaves the explicit Unknown sentinel in place.

use base64::Engine;
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::error::Result;
use crate::sqlite::manager::{SqliteInstance, SqliteManager};
use crate::sqlite::planner::QueryPlanner;
use crate::table::{ColumnType, TableColumn};

/// Result of a SQL query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Row data; each row is a vector of nullable string values.
    pub rows: Vec<QueryRow>,
    /// Total number of rows returned.
    pub row_count: usize,
    /// Wall-clock execution time in milliseconds.
    pub execution_ms: u64,
}

/// A single result row represented as nullable string cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRow {
    pub values: Vec<Option<String>>,
}

/// Execute `sql` against the instance's connection and collect the rows.
///
/// Results are capped at the instance's configured row limit
/// ([`DEFAULT_MAX_QUERY_ROWS`](crate::config::DEFAULT_MAX_QUERY_ROWS)
/// unless overridden via
/// [`SqlConfig`](crate::SqlConfig)); truncation is logged. Engine failures
/// surface as [`Engine`](crate::HostQueryError::Engine) errors and are
/// never retried here.
pub fn query_internal(sql: &str, instance: &SqliteInstance) -> Result<QueryResult> {
    let start = Instant::now();
    let conn = instance.db();

    let mut stmt = conn.prepare(sql)?;
    let column_count = stmt.column_count();
    let columns: Vec<String> = (0..column_count)
        .map(|i| stmt.column_name(i).unwrap_or("?").to_string())
        .collect();

    let rows_iter = stmt.query_map([], |row| {
        let mut values = Vec::with_capacity(column_count);
        for i in 0..column_count {
            let value = match row.get_ref(i)? {
                ValueRef::Null => None,
                ValueRef::Integer(n) => Some(n.to_string()),
                ValueRef::Real(f) => Some(f.to_string()),
                ValueRef::Text(s) => Some(String::from_utf8_lossy(s).to_string()),
                ValueRef::Blob(b) => {
                    Some(base64::engine::general_purpose::STANDARD.encode(b))
                }
            };
            values.push(value);
        }
        Ok(QueryRow { values })
    })?;

    let max_rows = instance.max_query_rows();
    let mut rows = Vec::new();
    for row in rows_iter {
        if rows.len() >= max_rows {
            debug!(max_rows, "query result truncated");
            break;
        }
        rows.push(row?);
    }

    let row_count = rows.len();
    let execution_ms = start.elapsed().as_millis() as u64;
    Ok(QueryResult {
        columns,
        rows,
        row_count,
        execution_ms,
    })
}

/// Determine the names and types of `sql`'s result columns.
///
/// Types come from declared column types where the result maps directly to
/// a table column. Anything else (expressions, subqueries) starts Unknown;
/// a [`QueryPlanner`] pass then fills in what the bytecode trace implies.
/// Columns the trace cannot type stay Unknown — the sentinel is never
/// replaced with a guess.
pub fn query_columns(sql: &str, instance: &SqliteInstance) -> Result<Vec<TableColumn>> {
    let conn = instance.db();
    let stmt = conn.prepare(sql)?;

    let mut columns: Vec<TableColumn> = stmt
        .columns()
        .iter()
        .map(|col| {
            let column_type = col
                .decl_type()
                .map(ColumnType::from_decl_type)
                .unwrap_or(ColumnType::Unknown);
            TableColumn::new(col.name(), column_type)
        })
        .collect();
    drop(stmt);

    if columns
        .iter()
        .any(|c| c.column_type == ColumnType::Unknown)
    {
        let planner = QueryPlanner::new(sql, instance)?;
        if let Err(err) = planner.apply_types(&mut columns) {
            // Partially-typed results remain usable.
            debug!(error = %err, "column type inference incomplete");
        }
    }

    Ok(columns)
}

/// Check whether `sql` touches any event-sourced (append-only) table.
///
/// All tables in the query's scan plan are checked against the manager's
/// registry; attributes are OR'd, so one event-sourced table makes the
/// whole result event-sourced. Higher layers use this to avoid
/// set-difference comparison of always-append result sets.
pub fn is_event_based(
    sql: &str,
    instance: &SqliteInstance,
    manager: &SqliteManager,
) -> Result<bool> {
    let planner = QueryPlanner::new(sql, instance)?;
    let event_based = planner
        .tables()
        .iter()
        .filter_map(|name| manager.table_attributes(name))
        .any(|attrs| attrs.event_based);
    Ok(event_based)
}
