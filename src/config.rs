//! Configuration surface for the embedded SQL layer
//!
//! The only externally-visible setting is the disabled-table list, a
//! comma-delimited value consumed once at startup, plus a cap on result rows
//! for memory safety.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default maximum number of rows returned by a single query.
pub const DEFAULT_MAX_QUERY_ROWS: usize = 10_000;

/// Configuration for a [`SqliteManager`](crate::sqlite::SqliteManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// Comma-delimited list of virtual table names to skip when attaching.
    #[serde(default)]
    pub disabled_tables: String,

    /// Maximum number of rows a single query may return.
    #[serde(default = "default_max_query_rows")]
    pub max_query_rows: usize,
}

fn default_max_query_rows() -> usize {
    DEFAULT_MAX_QUERY_ROWS
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            disabled_tables: String::new(),
            max_query_rows: DEFAULT_MAX_QUERY_ROWS,
        }
    }
}

/// Parse a comma-delimited table-name list into a set.
///
/// Whitespace around names is trimmed and empty entries are skipped.
pub(crate) fn parse_disabled_tables(csv: &str) -> HashSet<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_disabled_tables() {
        let set = parse_disabled_tables("processes, users,,sockets ");
        assert_eq!(set.len(), 3);
        assert!(set.contains("processes"));
        assert!(set.contains("users"));
        assert!(set.contains("sockets"));
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_disabled_tables("").is_empty());
        assert!(parse_disabled_tables(" , ").is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = SqlConfig::default();
        assert!(config.disabled_tables.is_empty());
        assert_eq!(config.max_query_rows, DEFAULT_MAX_QUERY_ROWS);
    }
}
