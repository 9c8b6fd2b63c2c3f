//! Connection and resource management for the embedded engine
//!
//! A [`SqliteManager`] owns one long-lived primary connection with every
//! virtual table attached. Handle requests try to acquire the primary
//! without blocking; under contention they fall back to a brand-new
//! transient connection, so callers never wait on the primary at the cost
//! of occasionally duplicating engine state.

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{parse_disabled_tables, SqlConfig, DEFAULT_MAX_QUERY_ROWS};
use crate::error::Result;
use crate::table::{TableAttributes, VirtualTable};

/// Soft heap limit applied to every connection, in bytes.
///
/// Bounds SQLite's internal arena on long-running processes.
const SOFT_HEAP_LIMIT: i64 = 5 * 1024 * 1024;

/// An owned lock on the manager's primary connection slot.
///
/// Held by a primary-bound [`SqliteInstance`] for its entire lifetime; the
/// lock travels with the handle so its release is tied to the handle's own
/// teardown.
type PrimaryGuard = ArcMutexGuard<RawMutex, Option<Connection>>;

/// Arbitrates access to the shared primary connection.
///
/// Explicitly constructed and injectable; a process that wants a single
/// shared manager wraps one in an `Arc`. Tests construct isolated managers
/// freely.
pub struct SqliteManager {
    /// The primary connection slot. `None` until first use and after reset.
    primary: Arc<Mutex<Option<Connection>>>,

    /// Serializes reset/shutdown against each other. Lazy construction in
    /// `get()` is serialized by the primary slot's own mutex; paths that
    /// take both locks always take `create_lock` first.
    create_lock: Mutex<()>,

    /// Attach lock shared by every primary-bound instance over time.
    primary_attach: Arc<ReentrantMutex<()>>,

    /// Registered virtual tables, attached to each connection built after
    /// registration.
    tables: RwLock<Vec<Arc<dyn VirtualTable>>>,

    /// Table names excluded from attachment. Write-once at configuration
    /// time, read-only while serving queries.
    disabled_tables: RwLock<HashSet<String>>,

    /// Row cap handed to every instance this manager builds.
    max_query_rows: usize,
}

impl SqliteManager {
    pub fn new() -> Self {
        Self::with_config(&SqlConfig::default())
    }

    pub fn with_config(config: &SqlConfig) -> Self {
        Self {
            primary: Arc::new(Mutex::new(None)),
            create_lock: Mutex::new(()),
            primary_attach: Arc::new(ReentrantMutex::new(())),
            tables: RwLock::new(Vec::new()),
            disabled_tables: RwLock::new(parse_disabled_tables(&config.disabled_tables)),
            max_query_rows: config.max_query_rows,
        }
    }

    /// Register a virtual table.
    ///
    /// Registration must precede the construction of the connection the
    /// table should appear on; already-built connections are not revisited.
    pub fn register_table(&self, table: Arc<dyn VirtualTable>) {
        debug!(table = %table.name(), "registered virtual table");
        self.tables.write().push(table);
    }

    /// Return a fully configured database handle.
    ///
    /// Tries to acquire the primary without blocking. On success the
    /// returned instance wraps the shared primary (built lazily on first
    /// use) and holds its lock until dropped. If another caller currently
    /// holds the primary, returns a fresh transient connection instead.
    pub fn get(&self) -> Result<SqliteInstance> {
        match self.primary.try_lock_arc() {
            Some(mut guard) => {
                if guard.is_none() {
                    // Holding the slot guard already serializes creation;
                    // taking create_lock here as well would invert the
                    // create_lock -> primary order used by reset_primary.
                    let _attach = self.primary_attach.lock();
                    *guard = Some(self.build_database()?);
                    info!("primary database initialized");
                }
                debug!("primary database handle acquired");
                Ok(SqliteInstance::bound_primary(
                    guard,
                    Arc::clone(&self.primary_attach),
                    self.max_query_rows,
                ))
            }
            None => {
                debug!("primary database contended; building transient connection");
                self.get_unique()
            }
        }
    }

    /// Always return a transient handle, bypassing the primary entirely.
    ///
    /// Used when isolation is required regardless of contention, e.g. test
    /// harnesses.
    pub fn get_unique(&self) -> Result<SqliteInstance> {
        let attach = Arc::new(ReentrantMutex::new(()));
        let conn = {
            let _attach = attach.lock();
            self.build_database()?
        };
        Ok(SqliteInstance::transient(conn, attach, self.max_query_rows))
    }

    /// Close the primary connection; the next `get()` rebuilds it.
    ///
    /// Bounds the engine's internal memory growth over long-running
    /// processes. Must not be called from a thread that currently holds a
    /// primary-bound instance: this method waits on the primary lock and
    /// would deadlock against its own caller.
    pub fn reset_primary(&self) {
        let _create = self.create_lock.lock();
        let mut primary = self.primary.lock();
        if primary.take().is_some() {
            info!("primary database reset");
        }
    }

    /// Explicit teardown: close the primary if one exists.
    ///
    /// The manager remains usable; a later `get()` rebuilds the primary.
    pub fn shutdown(&self) {
        let _create = self.create_lock.lock();
        if self.primary.lock().take().is_some() {
            debug!("primary database closed on shutdown");
        }
    }

    /// Check whether `table_name` is in the disabled-table set.
    pub fn is_disabled(&self, table_name: &str) -> bool {
        self.disabled_tables.read().contains(table_name)
    }

    /// Parse a comma-delimited table list into the disabled set.
    ///
    /// Configuration-time only; not synchronized against concurrent reads,
    /// which is fine because configuration precedes query serving.
    pub fn set_disabled_tables(&self, csv: &str) {
        *self.disabled_tables.write() = parse_disabled_tables(csv);
    }

    /// Look up the static attributes of a registered table.
    pub fn table_attributes(&self, table_name: &str) -> Option<TableAttributes> {
        self.tables
            .read()
            .iter()
            .find(|t| t.name() == table_name)
            .map(|t| t.attributes())
    }

    /// Open a new in-memory connection with all enabled tables attached.
    fn build_database(&self) -> Result<Connection> {
        let conn = Connection::open_in_memory()?;

        // Best-effort; a failed PRAGMA is not fatal.
        conn.execute_batch(&format!("PRAGMA soft_heap_limit={SOFT_HEAP_LIMIT};"))
            .ok();

        let tables = self.tables.read();
        for table in tables.iter() {
            if self.is_disabled(table.name()) {
                debug!(table = %table.name(), "table disabled; skipping attach");
                continue;
            }
            table.attach(&conn)?;
            debug!(table = %table.name(), "attached virtual table");
        }
        Ok(conn)
    }
}

impl Default for SqliteManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The connection a [`SqliteInstance`] wraps.
enum DbHandle {
    /// A lock on the shared primary. The slot is always `Some` while a
    /// guard is held: the manager fills it before handing the guard out,
    /// and only `reset_primary`/`shutdown` (which must first take this
    /// lock) empty it.
    Primary(PrimaryGuard),
    /// A privately owned connection, closed on drop.
    Transient(Connection),
}

/// A handle wrapper around either the shared primary connection or a
/// private ephemeral one.
///
/// Dropping the instance releases the primary lock (if held) and clears
/// per-query state on every virtual table touched through it.
pub struct SqliteInstance {
    handle: DbHandle,
    primary: bool,
    managed: bool,
    use_cache: AtomicBool,
    attach_lock: Arc<ReentrantMutex<()>>,
    affected: Mutex<HashMap<String, Arc<dyn VirtualTable>>>,
    max_query_rows: usize,
}

impl SqliteInstance {
    /// Wrap the shared primary. Only the manager may build one of these.
    pub(crate) fn bound_primary(
        guard: PrimaryGuard,
        attach: Arc<ReentrantMutex<()>>,
        max_query_rows: usize,
    ) -> Self {
        Self {
            handle: DbHandle::Primary(guard),
            primary: true,
            managed: true,
            use_cache: AtomicBool::new(false),
            attach_lock: attach,
            affected: Mutex::new(HashMap::new()),
            max_query_rows,
        }
    }

    /// Wrap a manager-built transient connection.
    pub(crate) fn transient(
        conn: Connection,
        attach: Arc<ReentrantMutex<()>>,
        max_query_rows: usize,
    ) -> Self {
        Self {
            handle: DbHandle::Transient(conn),
            primary: false,
            managed: true,
            use_cache: AtomicBool::new(false),
            attach_lock: attach,
            affected: Mutex::new(HashMap::new()),
            max_query_rows,
        }
    }

    /// Wrap an externally supplied connection, e.g. for isolated testing.
    ///
    /// Nothing is attached; the caller is responsible for the connection's
    /// schema.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            handle: DbHandle::Transient(conn),
            primary: false,
            managed: false,
            use_cache: AtomicBool::new(false),
            attach_lock: Arc::new(ReentrantMutex::new(())),
            affected: Mutex::new(HashMap::new()),
            max_query_rows: DEFAULT_MAX_QUERY_ROWS,
        }
    }

    /// True iff this instance wraps the shared primary.
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// True iff the connection was constructed by the manager.
    pub fn managed(&self) -> bool {
        self.managed
    }

    /// Access the underlying connection.
    ///
    /// Callers must not retain the reference beyond this instance's
    /// lifetime.
    pub fn db(&self) -> &Connection {
        match &self.handle {
            DbHandle::Primary(guard) => match guard.as_ref() {
                Some(conn) => conn,
                None => unreachable!("primary slot is filled before the guard is handed out"),
            },
            DbHandle::Transient(conn) => conn,
        }
    }

    /// Maximum number of rows a single query through this instance returns.
    pub fn max_query_rows(&self) -> usize {
        self.max_query_rows
    }

    /// Whether virtual tables consulted through this instance should prefer
    /// cached per-table results.
    pub fn use_cache(&self) -> bool {
        self.use_cache.load(Ordering::Relaxed)
    }

    pub fn set_use_cache(&self, use_cache: bool) {
        self.use_cache.store(use_cache, Ordering::Relaxed);
    }

    /// Record that `table` was touched during this instance's lifetime.
    ///
    /// Idempotent. Called by virtual-table glue so the table's per-query
    /// state can be cleared when the instance is torn down.
    pub fn add_affected_table(&self, table: Arc<dyn VirtualTable>) {
        let mut affected = self.affected.lock();
        affected.entry(table.name().to_string()).or_insert(table);
    }

    /// Check whether a table has already participated in the current query.
    ///
    /// Relevant for tables that behave differently on repeated invocation
    /// within one query, e.g. a JOIN self-reference.
    pub fn table_called(&self, table_name: &str) -> bool {
        self.affected.lock().contains_key(table_name)
    }

    /// Clear per-query state on every recorded table and empty the
    /// bookkeeping map.
    ///
    /// Runs automatically on drop; calling it again is a no-op.
    pub fn clear_affected_tables(&self) {
        let mut affected = self.affected.lock();
        for (name, table) in affected.drain() {
            table.clear_constraints();
            debug!(table = %name, "cleared per-query table state");
        }
    }

    /// Combined static attributes of every table touched through this
    /// instance.
    pub fn affected_attributes(&self) -> TableAttributes {
        self.affected
            .lock()
            .values()
            .fold(TableAttributes::default(), |acc, t| acc.or(t.attributes()))
    }

    /// Acquire this instance's attach lock.
    ///
    /// Reentrant: nested virtual-table invocation within one query may
    /// re-enter attach logic from the same call chain. The guard is
    /// released on every exit path.
    pub fn attach_lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.attach_lock.lock()
    }
}

impl Drop for SqliteInstance {
    fn drop(&mut self) {
        self.clear_affected_tables();
    }
}
