//! Error types for hostquery
//!
//! This module defines the main error type used throughout hostquery and
//! provides human-readable descriptions for SQLite return codes so engine
//! failures carry useful diagnostics.

use thiserror::Error;

/// Result type alias for hostquery operations
pub type Result<T> = std::result::Result<T, HostQueryError>;

/// Main error type for hostquery
#[derive(Error, Debug)]
pub enum HostQueryError {
    /// The embedded engine reported a non-zero return code.
    #[error("sqlite error (code {code}): {message}")]
    Engine { code: i32, message: String },

    /// Type inference over the bytecode trace left columns unknown.
    ///
    /// Non-fatal: partially-typed results with unknown columns remain
    /// usable.
    #[error("column type inference incomplete: {unresolved} column(s) remain unknown")]
    IncompleteInference { unresolved: usize },

    /// A virtual table failed to attach or reset.
    #[error("virtual table '{table}': {detail}")]
    Table { table: String, detail: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for HostQueryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(ffi_err, message) => {
                let code = ffi_err.extended_code;
                let message = message
                    .clone()
                    .unwrap_or_else(|| sqlite_code_description(code & 0xff).to_string());
                HostQueryError::Engine { code, message }
            }
            // rusqlite-level failures (invalid column, type mismatch, ...)
            // have no SQLite code of their own; report the generic error
            // code with the library's message.
            _ => HostQueryError::Engine {
                code: 1,
                message: err.to_string(),
            },
        }
    }
}

/// Return a string representation of a SQLite primary return code.
///
/// Extended codes should be masked with `0xff` before lookup.
pub fn sqlite_code_description(code: i32) -> &'static str {
    match code {
        0 => "Successful result",
        1 => "SQL error or missing database",
        2 => "Internal logic error in SQLite",
        3 => "Access permission denied",
        4 => "Callback routine requested an abort",
        5 => "The database file is locked",
        6 => "A table in the database is locked",
        7 => "A malloc() failed",
        8 => "Attempt to write a readonly database",
        9 => "Operation terminated by sqlite3_interrupt()",
        10 => "Some kind of disk I/O error occurred",
        11 => "The database disk image is malformed",
        12 => "Unknown opcode in sqlite3_file_control()",
        13 => "Insertion failed because database is full",
        14 => "Unable to open the database file",
        15 => "Database lock protocol error",
        16 => "Database is empty",
        17 => "The database schema changed",
        18 => "String or BLOB exceeds size limit",
        19 => "Abort due to constraint violation",
        20 => "Data type mismatch",
        21 => "Library used incorrectly",
        22 => "Uses OS features not supported on host",
        23 => "Authorization denied",
        24 => "Auxiliary database format error",
        25 => "2nd parameter to sqlite3_bind out of range",
        26 => "File opened that is not a database file",
        100 => "sqlite3_step() has another row ready",
        101 => "sqlite3_step() has finished executing",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_return_codes_have_descriptions() {
        for code in 1..=26 {
            assert_ne!(sqlite_code_description(code), "Error", "code {}", code);
        }
        assert_eq!(
            sqlite_code_description(100),
            "sqlite3_step() has another row ready"
        );
        assert_eq!(sqlite_code_description(999), "Error");
    }

    #[test]
    fn test_engine_error_from_rusqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: HostQueryError = conn
            .prepare("NOT VALID SQL AT ALL")
            .map(|_| ())
            .unwrap_err()
            .into();
        match err {
            HostQueryError::Engine { code, message } => {
                assert_ne!(code, 0);
                assert!(!message.is_empty());
            }
            other => panic!("expected engine error, got {:?}", other),
        }
    }
}
