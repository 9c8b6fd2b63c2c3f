//! Query planning and column-type inference from the engine's own trace
//!
//! The planner issues two introspection statements against a handle:
//! `EXPLAIN QUERY PLAN` for the table-scan order and `EXPLAIN` for the
//! bytecode program. Scanning the program against a small static opcode
//! table recovers result-column types that schema introspection cannot
//! determine (expression columns have no declared type).
//!
//! The plan-text parsing is pinned to the detail strings emitted by
//! SQLite 3.36 and later (`SCAN <table>` / `SEARCH <table> USING ...`),
//! which is what the bundled engine produces. Upgrading the engine requires
//! revisiting [`scanned_table`].

use rusqlite::Connection;
use tracing::debug;

use crate::error::{HostQueryError, Result};
use crate::sqlite::manager::SqliteInstance;
use crate::table::{ColumnType, TableColumn};
use std::collections::HashMap;

/// Operand slot an opcode's result register is found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpReg {
    P1,
    P2,
    P3,
}

/// A (register-slot, inferred-type) pair for one opcode.
#[derive(Debug, Clone, Copy)]
struct Opcode {
    reg: OpReg,
    column_type: ColumnType,
}

impl Opcode {
    const fn new(reg: OpReg, column_type: ColumnType) -> Self {
        Self { reg, column_type }
    }
}

/// The opcodes whose execution constrains a register to a known type.
///
/// Literal-load opcodes (`Integer`, `Int64`, `Real`, `String8`, `Blob`) are
/// deliberately absent: the planner never guesses a column type from a
/// value literal, only from operations whose result type is implied.
fn opcode_hint(name: &str) -> Option<Opcode> {
    let op = match name {
        "Concat" => Opcode::new(OpReg::P3, ColumnType::Text),
        "Variable" => Opcode::new(OpReg::P2, ColumnType::Text),
        "Or" | "And" | "BitAnd" | "BitOr" | "ShiftLeft" | "ShiftRight" => {
            Opcode::new(OpReg::P3, ColumnType::Integer)
        }
        "Not" | "BitNot" => Opcode::new(OpReg::P2, ColumnType::Integer),
        "Add" | "Subtract" | "Multiply" | "Divide" | "Remainder" => {
            Opcode::new(OpReg::P3, ColumnType::BigInt)
        }
        _ => return None,
    };
    Some(op)
}

/// One row of the `EXPLAIN` bytecode trace.
#[derive(Debug, Clone)]
struct ProgramRow {
    opcode: String,
    p1: i64,
    p2: i64,
    p3: i64,
}

impl ProgramRow {
    fn operand(&self, reg: OpReg) -> i64 {
        match reg {
            OpReg::P1 => self.p1,
            OpReg::P2 => self.p2,
            OpReg::P3 => self.p3,
        }
    }
}

/// Extract the table name referenced by one `EXPLAIN QUERY PLAN` detail
/// string, if the row describes a table scan or index use.
fn scanned_table(detail: &str) -> Option<&str> {
    let rest = detail
        .strip_prefix("SCAN ")
        .or_else(|| detail.strip_prefix("SEARCH "))?;
    let name = rest.split_whitespace().next()?;
    // Subquery and co-routine scan rows do not name a real table.
    if name.starts_with('(') || name == "SUBQUERY" || name == "CONSTANT" {
        return None;
    }
    Some(name)
}

/// A barebones query planner based on SQLite explain-statement results.
///
/// Mildly expensive to construct (two introspection passes, all data comes
/// back as text); build one per new query and only when needed, i.e. when a
/// result column's type is otherwise unknown.
pub struct QueryPlanner {
    /// The rows of `EXPLAIN <query>`, in program order.
    program: Vec<ProgramRow>,
    /// Distinct scan steps of `EXPLAIN QUERY PLAN <query>`, in the order
    /// the engine chose. Order and repetition both carry meaning for join
    /// analysis, so no deduplication happens.
    tables: Vec<String>,
}

impl QueryPlanner {
    /// Run both introspection passes for `query` against the instance's
    /// connection.
    ///
    /// Fails if either statement fails to prepare or run (e.g. malformed
    /// SQL).
    pub fn new(query: &str, instance: &SqliteInstance) -> Result<Self> {
        let conn = instance.db();
        let tables = Self::scan_plan(conn, query)?;
        let program = Self::scan_program(conn, query)?;
        debug!(
            tables = ?tables,
            program_len = program.len(),
            "query planner built"
        );
        Ok(Self { program, tables })
    }

    fn scan_plan(conn: &Connection, query: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {query}"))?;
        let details = stmt
            .query_map([], |row| row.get::<_, String>("detail"))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(details
            .iter()
            .filter_map(|detail| scanned_table(detail))
            .map(str::to_string)
            .collect())
    }

    fn scan_program(conn: &Connection, query: &str) -> Result<Vec<ProgramRow>> {
        let mut stmt = conn.prepare(&format!("EXPLAIN {query}"))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProgramRow {
                    opcode: row.get("opcode")?,
                    p1: row.get("p1")?,
                    p2: row.get("p2")?,
                    p3: row.get("p3")?,
                })
            })?
            .collect::<std::result::Result<Vec<ProgramRow>, _>>()?;
        Ok(rows)
    }

    /// The tables this query scans, in engine-chosen scan order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Fill in types for columns still marked [`ColumnType::Unknown`] by
    /// scanning the bytecode program.
    ///
    /// A register→type map is maintained in program order: opcodes from the
    /// static table write their implied type (the last writer for a
    /// register wins, matching runtime value flow), `Copy` duplicates
    /// inferred types onto the destination range while the source range
    /// keeps its own, and `ResultRow` maps registers onto result-column
    /// indices.
    ///
    /// Returns `Ok` only if every previously-unknown column received a
    /// type; otherwise returns `IncompleteInference` while leaving the
    /// partial typing in place.
    pub fn apply_types(&self, columns: &mut [TableColumn]) -> Result<()> {
        let mut register_types: HashMap<i64, ColumnType> = HashMap::new();

        for row in &self.program {
            match row.opcode.as_str() {
                "ResultRow" => {
                    // Registers p1..p1+p2 hold the result columns.
                    let base = row.p1;
                    for (reg, column_type) in &register_types {
                        let index = reg - base;
                        if index < 0 {
                            continue;
                        }
                        if let Some(column) = columns.get_mut(index as usize) {
                            if column.column_type == ColumnType::Unknown {
                                column.column_type = *column_type;
                            }
                        }
                    }
                }
                "Copy" => {
                    // Registers p1..=p1+p3 are copied to p2..=p2+p3; the
                    // source registers keep their values, so their inferred
                    // types survive. An untyped source clears any stale type
                    // on its destination.
                    let sources: Vec<Option<ColumnType>> = (0..=row.p3)
                        .map(|i| register_types.get(&(row.p1 + i)).copied())
                        .collect();
                    for (i, column_type) in sources.into_iter().enumerate() {
                        let dest = row.p2 + i as i64;
                        match column_type {
                            Some(t) => {
                                register_types.insert(dest, t);
                            }
                            None => {
                                register_types.remove(&dest);
                            }
                        }
                    }
                }
                name => {
                    if let Some(op) = opcode_hint(name) {
                        register_types.insert(row.operand(op.reg), op.column_type);
                    }
                }
            }
        }

        let unresolved = columns
            .iter()
            .filter(|c| c.column_type == ColumnType::Unknown)
            .count();
        if unresolved > 0 {
            return Err(HostQueryError::IncompleteInference { unresolved });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(opcode: &str, p1: i64, p2: i64, p3: i64) -> ProgramRow {
        ProgramRow {
            opcode: opcode.to_string(),
            p1,
            p2,
            p3,
        }
    }

    fn planner(program: Vec<ProgramRow>) -> QueryPlanner {
        QueryPlanner {
            program,
            tables: Vec::new(),
        }
    }

    fn test_instance() -> SqliteInstance {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER, name TEXT, score DOUBLE);
             CREATE TABLE groups (id INTEGER, label TEXT);
             INSERT INTO users VALUES (1, 'ada', 1.5), (2, 'eva', 2.5);
             INSERT INTO groups VALUES (1, 'admins'), (2, 'ops');",
        )
        .unwrap();
        SqliteInstance::from_connection(conn)
    }

    #[test]
    fn test_scanned_table_formats() {
        assert_eq!(scanned_table("SCAN users"), Some("users"));
        assert_eq!(
            scanned_table("SEARCH groups USING INTEGER PRIMARY KEY (rowid=?)"),
            Some("groups")
        );
        assert_eq!(
            scanned_table("SCAN users USING COVERING INDEX idx_users"),
            Some("users")
        );
        assert_eq!(scanned_table("SCAN (subquery-1)"), None);
        assert_eq!(scanned_table("SCAN SUBQUERY 1"), None);
        assert_eq!(scanned_table("USE TEMP B-TREE FOR ORDER BY"), None);
        assert_eq!(scanned_table("SCALAR SUBQUERY 1"), None);
    }

    #[test]
    fn test_join_tables_in_scan_order_and_deterministic() {
        let instance = test_instance();
        let query = "SELECT * FROM users JOIN groups ON users.id = groups.id";

        let first = QueryPlanner::new(query, &instance).unwrap();
        assert_eq!(first.tables().len(), 2);
        assert!(first.tables().contains(&"users".to_string()));
        assert!(first.tables().contains(&"groups".to_string()));

        for _ in 0..3 {
            let again = QueryPlanner::new(query, &instance).unwrap();
            assert_eq!(again.tables(), first.tables());
        }
    }

    #[test]
    fn test_malformed_query_is_an_error() {
        let instance = test_instance();
        assert!(QueryPlanner::new("SELECT FROM WHERE", &instance).is_err());
    }

    #[test]
    fn test_apply_types_opcode_hint() {
        let p = planner(vec![
            row("Concat", 0, 0, 2),
            row("ResultRow", 2, 1, 0),
        ]);
        let mut columns = vec![TableColumn::new("expr", ColumnType::Unknown)];
        p.apply_types(&mut columns).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::Text);
    }

    #[test]
    fn test_apply_types_last_writer_wins() {
        let p = planner(vec![
            row("Add", 1, 2, 3),
            row("Concat", 1, 2, 3),
            row("ResultRow", 3, 1, 0),
        ]);
        let mut columns = vec![TableColumn::new("expr", ColumnType::Unknown)];
        p.apply_types(&mut columns).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::Text);
    }

    #[test]
    fn test_apply_types_copy_propagation() {
        // Add writes register 3; Copy moves 3..=4 onto 7..=8; the result
        // row reads from 7.
        let p = planner(vec![
            row("Add", 1, 2, 3),
            row("Copy", 3, 7, 1),
            row("ResultRow", 7, 1, 0),
        ]);
        let mut columns = vec![TableColumn::new("expr", ColumnType::Unknown)];
        p.apply_types(&mut columns).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::BigInt);
    }

    #[test]
    fn test_apply_types_copy_keeps_source_register() {
        // The engine's Copy leaves the source register intact; a result
        // row reading the source after the copy must still see its type.
        let p = planner(vec![
            row("Add", 1, 2, 3),
            row("Copy", 3, 7, 0),
            row("ResultRow", 3, 1, 0),
        ]);
        let mut columns = vec![TableColumn::new("expr", ColumnType::Unknown)];
        p.apply_types(&mut columns).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::BigInt);
    }

    #[test]
    fn test_apply_types_copy_untyped_source_clears_destination() {
        // Copying an untyped register over a typed one invalidates the
        // destination's earlier type.
        let p = planner(vec![
            row("Concat", 0, 0, 7),
            row("Copy", 3, 7, 0),
            row("ResultRow", 7, 1, 0),
        ]);
        let mut columns = vec![TableColumn::new("expr", ColumnType::Unknown)];
        assert!(p.apply_types(&mut columns).is_err());
        assert_eq!(columns[0].column_type, ColumnType::Unknown);
    }

    #[test]
    fn test_apply_types_does_not_touch_known_columns() {
        let p = planner(vec![
            row("Concat", 0, 0, 2),
            row("ResultRow", 2, 1, 0),
        ]);
        let mut columns = vec![TableColumn::new("id", ColumnType::Integer)];
        p.apply_types(&mut columns).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::Integer);
    }

    #[test]
    fn test_apply_types_unresolved_reports_failure() {
        let p = planner(vec![row("ResultRow", 2, 2, 0)]);
        let mut columns = vec![
            TableColumn::new("name", ColumnType::Text),
            TableColumn::new("mystery", ColumnType::Unknown),
        ];
        let err = p.apply_types(&mut columns).unwrap_err();
        match err {
            HostQueryError::IncompleteInference { unresolved } => assert_eq!(unresolved, 1),
            other => panic!("expected IncompleteInference, got {:?}", other),
        }
        // Partial typing is left in place.
        assert_eq!(columns[0].column_type, ColumnType::Text);
        assert_eq!(columns[1].column_type, ColumnType::Unknown);
    }

    #[test]
    fn test_arithmetic_expression_inferred_end_to_end() {
        let instance = test_instance();
        let p = QueryPlanner::new("SELECT id + 1 FROM users", &instance).unwrap();
        let mut columns = vec![TableColumn::new("id + 1", ColumnType::Unknown)];
        p.apply_types(&mut columns).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::BigInt);
    }

    #[test]
    fn test_concat_expression_inferred_end_to_end() {
        let instance = test_instance();
        let p = QueryPlanner::new("SELECT name || '!' FROM users", &instance).unwrap();
        let mut columns = vec![TableColumn::new("name || '!'", ColumnType::Unknown)];
        p.apply_types(&mut columns).unwrap();
        assert_eq!(columns[0].column_type, ColumnType::Text);
    }

    #[test]
    fn test_literal_column_stays_unknown() {
        let instance = test_instance();
        let p = QueryPlanner::new("SELECT 'fixed' FROM users", &instance).unwrap();
        let mut columns = vec![TableColumn::new("'fixed'", ColumnType::Unknown)];
        assert!(p.apply_types(&mut columns).is_err());
        assert_eq!(columns[0].column_type, ColumnType::Unknown);
    }
}
