use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use r2d2::{CustomizeConnection, HandleError, ManageConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior, params};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::schema::{SCHEMA, SESSION_SCOPE_TABLE};
use super::scope::ScopeAllowList;
use crate::config::{DbConfig, PROJECT_SCOPE, TENANT_SCOPE};
use crate::error::{Error, Result};
use crate::types::{RequestContext, TenantId};

/// Number of SQLite VM instructions between watchdog checks.
const WATCHDOG_INTERVAL_OPS: i32 = 1_000;

/// How often a blocked checkout re-checks its request's cancellation.
const ACQUIRE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections handed out by `conn`.
    pub requests: u64,
    /// Connections released by `close` or drop.
    pub returns: u64,
    pub open: u32,
    pub idle: u32,
}

impl PoolStats {
    /// Checked-out connections not yet released. Non-zero at quiescence means a leak.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.requests.saturating_sub(self.returns)
    }
}

/// Opens SQLite connections and refuses to pool one that still carries scopes or
/// an open transaction.
struct ScopedManager(SqliteConnectionManager);

impl ManageConnection for ScopedManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> rusqlite::Result<Connection> {
        self.0.connect()
    }

    fn is_valid(&self, conn: &mut Connection) -> rusqlite::Result<()> {
        self.0.is_valid(conn)
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        if !conn.is_autocommit() {
            return true;
        }
        conn.query_row("SELECT EXISTS (SELECT 1 FROM temp.session_scope)", [], |row| {
            row.get::<_, bool>(0)
        })
        .unwrap_or(true)
    }
}

/// Per-connection setup run once when the pool opens a connection.
#[derive(Debug)]
struct ConnectionSetup {
    lock_timeout: Duration,
}

impl CustomizeConnection<Connection, rusqlite::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(self.lock_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SESSION_SCOPE_TABLE)
    }
}

#[derive(Debug)]
struct LogErrors;

impl HandleError<rusqlite::Error> for LogErrors {
    fn handle_error(&self, error: rusqlite::Error) {
        error!("Failed to open pooled connection: {error}");
    }
}

struct PoolShared {
    config: DbConfig,
    scopes: ScopeAllowList,
    requests: AtomicU64,
    returns: AtomicU64,
}

/// A bounded pool of SQLite connections that hands out tenant-scoped sessions.
///
/// Every checkout resets the connection's scope variables and arms a watchdog that
/// interrupts statements on cancellation or timeout. Every release drops all scopes;
/// a connection whose scopes cannot be dropped is closed instead of pooled.
#[derive(Clone)]
pub struct ScopedPool {
    pool: Pool<ScopedManager>,
    shared: Arc<PoolShared>,
}

impl ScopedPool {
    /// Opens the pool and applies the schema.
    pub fn open(config: DbConfig) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Journal mode is a property of the file; set it once before any pooled
        // connection exists.
        let bootstrap = Connection::open(&config.path)?;
        bootstrap.busy_timeout(config.lock_timeout())?;
        bootstrap.pragma_update(None, "journal_mode", "WAL")?;
        bootstrap.pragma_update(None, "foreign_keys", "ON")?;
        bootstrap.execute_batch(SCHEMA)?;
        drop(bootstrap);

        let pool = Pool::builder()
            .max_size(config.max_open)
            .min_idle(Some(config.min_idle))
            .idle_timeout(Some(config.idle_timeout()))
            .max_lifetime(Some(config.max_lifetime()))
            .connection_timeout(config.acquire_timeout())
            .connection_customizer(Box::new(ConnectionSetup {
                lock_timeout: config.lock_timeout(),
            }))
            .error_handler(Box::new(LogErrors))
            .build(ScopedManager(SqliteConnectionManager::file(&config.path)))?;

        let shared = Arc::new(PoolShared {
            scopes: ScopeAllowList::new(config.scopes.iter().cloned()),
            requests: AtomicU64::new(0),
            returns: AtomicU64::new(0),
            config,
        });
        Ok(Self { pool, shared })
    }

    #[must_use]
    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            requests: self.shared.requests.load(Ordering::SeqCst),
            returns: self.shared.returns.load(Ordering::SeqCst),
            open: state.connections,
            idle: state.idle_connections,
        }
    }

    /// Checks out a connection with every scope variable reset.
    pub fn conn(&self, ctx: &RequestContext) -> Result<ScopedConnection> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let conn = self.acquire(ctx)?;
        let cancel = ctx.cancellation().child_token();
        let watchdog = Arc::new(Watchdog::new(
            cancel.clone(),
            self.shared.config.statement_timeout(),
            self.shared.config.transaction_timeout(),
        ));

        // A failed reset leaves scopes behind, so the pool discards the connection
        // when it is dropped here.
        prepare_checkout(&conn, &watchdog).inspect_err(|e| {
            error!("Failed to reset pooled connection, discarding it: {e}");
        })?;

        self.shared.requests.fetch_add(1, Ordering::SeqCst);
        Ok(ScopedConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            watchdog,
            cancel,
        })
    }

    /// Checks out a connection bound to the request's tenant (and project, when present).
    pub fn tenant_conn(&self, ctx: &RequestContext) -> Result<ScopedConnection> {
        let tenant = ctx.tenant_id()?.clone();
        let conn = self.conn(ctx)?;

        let mut scopes = vec![(TENANT_SCOPE, tenant.to_string())];
        if let Ok(project) = ctx.project_id() {
            scopes.push((PROJECT_SCOPE, project.to_string()));
        }
        conn.add_scopes(scopes)?;
        Ok(conn)
    }

    /// Waits for a free connection in short slices so a cancelled request stops
    /// waiting before the acquire timeout.
    fn acquire(&self, ctx: &RequestContext) -> Result<PooledConnection<ScopedManager>> {
        let deadline = Instant::now() + self.shared.config.acquire_timeout();
        loop {
            let now = Instant::now();
            let slice = deadline.saturating_duration_since(now).min(ACQUIRE_POLL);
            match self.pool.get_timeout(slice) {
                Ok(conn) => return Ok(conn),
                Err(e) if ctx.is_cancelled() => {
                    debug!("Checkout abandoned by cancelled request: {e}");
                    return Err(Error::Cancelled);
                }
                Err(e) if Instant::now() >= deadline => {
                    warn!(
                        open = self.pool.state().connections,
                        "Timed out waiting for a pooled connection: {e}"
                    );
                    return Err(Error::Timeout);
                }
                Err(_) => {}
            }
        }
    }
}

fn prepare_checkout(conn: &Connection, watchdog: &Arc<Watchdog>) -> Result<()> {
    reset_connection(conn)?;
    let guard = AssertUnwindSafe(Arc::clone(watchdog));
    conn.progress_handler(
        WATCHDOG_INTERVAL_OPS,
        Some(move || guard.should_interrupt()),
    );
    Ok(())
}

fn reset_connection(conn: &Connection) -> Result<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("ROLLBACK")?;
    }
    conn.execute("DELETE FROM temp.session_scope", [])?;
    Ok(())
}

const TRIP_NONE: u8 = 0;
const TRIP_CANCELLED: u8 = 1;
const TRIP_TIMEOUT: u8 = 2;

/// Interrupt policy consulted by SQLite's progress handler.
///
/// `deadline` is milliseconds past `origin`, zero while no operation runs. An
/// operation sets it from the statement timeout and a transaction can only pull
/// it closer.
struct Watchdog {
    cancel: CancellationToken,
    origin: Instant,
    deadline: AtomicU64,
    tripped: AtomicU8,
    statement_timeout: Duration,
    transaction_timeout: Duration,
}

impl Watchdog {
    fn new(cancel: CancellationToken, statement_timeout: Duration, transaction_timeout: Duration) -> Self {
        Self {
            cancel,
            origin: Instant::now(),
            deadline: AtomicU64::new(0),
            tripped: AtomicU8::new(TRIP_NONE),
            statement_timeout,
            transaction_timeout,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn deadline_after(&self, limit: Duration) -> u64 {
        let limit = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        self.elapsed_ms().saturating_add(limit).max(1)
    }

    fn should_interrupt(&self) -> bool {
        let trip = if self.cancel.is_cancelled() {
            TRIP_CANCELLED
        } else {
            let deadline = self.deadline.load(Ordering::SeqCst);
            if deadline == 0 || self.elapsed_ms() <= deadline {
                return false;
            }
            TRIP_TIMEOUT
        };
        self.tripped.store(trip, Ordering::SeqCst);
        true
    }

    fn begin_op(&self) {
        self.deadline
            .store(self.deadline_after(self.statement_timeout), Ordering::SeqCst);
    }

    fn begin_transaction(&self) {
        self.deadline
            .fetch_min(self.deadline_after(self.transaction_timeout), Ordering::SeqCst);
    }

    fn end_op(&self) {
        self.deadline.store(0, Ordering::SeqCst);
    }

    fn take_trip(&self) -> Option<Error> {
        match self.tripped.swap(TRIP_NONE, Ordering::SeqCst) {
            TRIP_CANCELLED => Some(Error::Cancelled),
            TRIP_TIMEOUT => Some(Error::Timeout),
            _ => None,
        }
    }
}

/// A pooled connection bound to one request.
///
/// Not safe for concurrent use: it is `Send` so a request may move it between
/// tasks, but it is never shared. Dropping it releases it like [`close`](Self::close).
pub struct ScopedConnection {
    conn: Option<PooledConnection<ScopedManager>>,
    shared: Arc<PoolShared>,
    watchdog: Arc<Watchdog>,
    cancel: CancellationToken,
}

impl ScopedConnection {
    fn connection(&self) -> Result<&Connection> {
        self.conn.as_deref().ok_or(Error::Cancelled)
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    /// Runs `f` as one operation under the statement timeout and cancellation watchdog.
    pub(crate) fn run<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let conn = self.connection()?;

        self.watchdog.begin_op();
        let result = f(conn);
        self.watchdog.end_op();

        let tripped = self.watchdog.take_trip();
        result.map_err(|e| match (e, tripped) {
            (Error::Storage(err), Some(trip))
                if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) =>
            {
                trip
            }
            (e, _) => e,
        })
    }

    /// Runs `f` inside one transaction; any error rolls the whole transaction back.
    pub(crate) fn transaction<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        self.run(|conn| {
            let tx = Transaction::new_unchecked(conn, behavior)?;
            self.watchdog.begin_transaction();
            match f(&tx) {
                Ok(value) => tx.commit().map(|()| value).map_err(Error::from),
                Err(e) => {
                    if let Err(rollback) = tx.rollback() {
                        error!("Failed to roll back transaction: {rollback}");
                    }
                    Err(e)
                }
            }
        })
    }

    /// Resolves the tenant for a tenant-owned operation.
    ///
    /// The context must name a tenant and the connection must be scoped to that
    /// same tenant; anything else fails before the operation touches a table.
    pub(crate) fn tenant(&self, ctx: &RequestContext) -> Result<TenantId> {
        let tenant = ctx.tenant_id()?.clone();
        match self.scope(TENANT_SCOPE)? {
            Some(scoped) if scoped == tenant.as_str() => Ok(tenant),
            Some(_) => {
                warn!(tenant = %tenant, "Connection is scoped to a different tenant");
                Err(Error::Unauthorized)
            }
            None => {
                warn!(tenant = %tenant, "Connection has no tenant scope");
                Err(Error::Unauthorized)
            }
        }
    }

    pub fn add_scope(&self, name: &str, value: &str) -> Result<()> {
        self.add_scopes([(name, value)])
    }

    /// Sets several scope variables atomically. Names outside the pool's allow-list
    /// are skipped.
    pub fn add_scopes<I, K, V>(&self, scopes: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let resolved: Vec<(&str, String)> = scopes
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.as_ref();
                match self.shared.scopes.resolve(name) {
                    Some(allowed) => Some((allowed, value.as_ref().to_string())),
                    None => {
                        debug!(scope = name, "Ignoring unconfigured scope");
                        None
                    }
                }
            })
            .collect();
        if resolved.is_empty() {
            return Ok(());
        }

        self.transaction(TransactionBehavior::Deferred, |tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO temp.session_scope (name, value) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            )?;
            for (name, value) in &resolved {
                stmt.execute(params![name, value])?;
            }
            Ok(())
        })
    }

    pub fn drop_scope(&self, name: &str) -> Result<()> {
        self.drop_scopes(&[name])
    }

    pub fn drop_scopes(&self, names: &[&str]) -> Result<()> {
        let resolved: Vec<&str> = names
            .iter()
            .filter_map(|n| self.shared.scopes.resolve(n))
            .collect();
        if resolved.is_empty() {
            return Ok(());
        }

        self.transaction(TransactionBehavior::Deferred, |tx| {
            let mut stmt = tx.prepare("DELETE FROM temp.session_scope WHERE name = ?1")?;
            for name in &resolved {
                stmt.execute(params![name])?;
            }
            Ok(())
        })
    }

    pub fn drop_all_scopes(&self) -> Result<()> {
        self.run(|conn| {
            conn.execute("DELETE FROM temp.session_scope", [])?;
            Ok(())
        })
    }

    pub fn scope(&self, name: &str) -> Result<Option<String>> {
        self.run(|conn| {
            conn.query_row(
                "SELECT value FROM temp.session_scope WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
        })
    }

    /// Every scope variable currently set on this connection.
    pub fn scopes(&self) -> Result<BTreeMap<String, String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT name, value FROM temp.session_scope")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<std::result::Result<BTreeMap<_, _>, _>>()
                .map_err(Error::from)
        })
    }

    /// Drops every scope and hands the connection back to the pool.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        // Cleanup must run even when the request was cancelled.
        conn.progress_handler(0, None::<fn() -> bool>);
        if let Err(e) = reset_connection(&conn) {
            error!("Failed to drop scopes on release, closing connection: {e}");
        }

        self.cancel.cancel();
        self.shared.returns.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.release();
    }
}
