//! Embedded SQLite orchestration
//!
//! This module arbitrates access to one shared SQLite connection across
//! concurrent query issuers, falls back to isolated transient connections
//! under contention, tracks per-query side effects on virtual tables, and
//! infers result-column types from the engine's execution-plan trace when
//! schema introspection cannot determine them.
//!
//! The engine itself (`rusqlite`, bundled) is an external, already-correct
//! component; nothing here parses, optimizes, or stores SQL data.

pub mod manager;
pub mod planner;
pub mod query;

pub use manager::{SqliteInstance, SqliteManager};
pub use planner::QueryPlanner;
pub use query::{is_event_based, query_columns, query_internal, QueryResult, QueryRow};
