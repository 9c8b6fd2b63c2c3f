#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # hostquery
//!
//! SQL queries over live operating-system state through an embedded SQLite
//! engine. Pluggable virtual tables expose OS data as ordinary SQL tables;
//! this crate provides the orchestration layered on top of the engine:
//!
//! - **Resource management**: a [`SqliteManager`] owns one long-lived
//!   primary connection with every virtual table attached. Handle requests
//!   never block — under contention they receive a fully independent
//!   transient connection instead.
//! - **Side-effect tracking**: a [`SqliteInstance`] records which virtual
//!   tables a query touched so their per-query constraint state is cleared
//!   when the handle is dropped.
//! - **Type inference**: when a result column's type cannot be read from
//!   the schema (expression columns), the [`QueryPlanner`] decodes the
//!   engine's `EXPLAIN` bytecode trace to recover it.
//!
//! ## Usage
//!
//! ```no_run
//! use hostquery::{query_internal, Result, SqliteManager};
//!
//! fn main() -> Result<()> {
//!     let manager = SqliteManager::new();
//!     // manager.register_table(...);
//!
//!     let instance = manager.get()?;
//!     let result = query_internal("SELECT 1 AS one", &instance)?;
//!     println!("{} row(s)", result.row_count);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod sqlite;
pub mod table;

pub use config::SqlConfig;
pub use error::{sqlite_code_description, HostQueryError, Result};
pub use sqlite::{
    is_event_based, query_columns, query_internal, QueryPlanner, QueryResult, QueryRow,
    SqliteInstance, SqliteManager,
};
pub use table::{ColumnType, TableAttributes, TableColumn, VirtualTable};
