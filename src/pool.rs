//! Connection pool.
//!
//! Capacity is a semaphore with one permit per allowed connection; every
//! checked-out connection holds a permit until it is released. Idle
//! connections and the counters sit behind a mutex that is never held across
//! an await.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::connection::{millis_opt, Connection, Connector};
use crate::decode::{decode_result, result_formats, QueryResult, Row};
use crate::error::{PgError, PgResult};
use crate::registry::TypeRegistry;
use crate::statement::{PreparedStatement, StatementCache};
use crate::types::PgValue;

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PgPoolConfig {
    /// Connections opened up front by `PgPool::connect`
    pub min_connections: u32,
    /// Maximum number of connections, idle plus checked out
    pub max_connections: u32,
    /// Default deadline for `acquire`; `None` waits indefinitely
    #[serde(rename = "acquire_timeout_ms", with = "millis_opt")]
    pub acquire_timeout: Option<Duration>,
    /// Statement cache capacity per connection
    pub statement_cache_capacity: usize,
}

impl Default for PgPoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 10,
            acquire_timeout: None,
            statement_cache_capacity: 100,
        }
    }
}

impl PgPoolConfig {
    /// Create a new pool configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the default acquire deadline.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set the statement cache capacity per connection.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    fn validate(&self) -> PgResult<()> {
        if self.max_connections == 0 {
            return Err(PgError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PgError::ConfigError(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Pool Inner
// ============================================================================

/// A connection plus the statements prepared on it.
struct Live<C> {
    conn: C,
    statements: StatementCache,
}

struct PoolState<C> {
    /// Idle connections waiting to be used
    idle: Vec<Live<C>>,
    /// Connections handed out, including ones still being opened
    checked_out: usize,
    closed: bool,
}

struct PgPoolInner<K: Connector> {
    config: PgPoolConfig,
    connector: K,
    registry: Arc<TypeRegistry>,
    state: Mutex<PoolState<K::Connection>>,
    /// Semaphore to limit total connections
    semaphore: Arc<Semaphore>,
}

impl<K: Connector> PgPoolInner<K> {
    async fn open(&self) -> PgResult<Live<K::Connection>> {
        let conn = self.connector.connect().await?;
        tracing::debug!(backend_pid = conn.backend_pid(), "Opened pooled connection");
        Ok(Live {
            conn,
            statements: StatementCache::new(self.config.statement_cache_capacity),
        })
    }

    /// Take a checked-out connection back.
    fn check_in(&self, live: Live<K::Connection>, broken: bool) {
        let mut state = self.state.lock();
        state.checked_out -= 1;

        if broken || live.conn.is_closed() {
            tracing::warn!(
                backend_pid = live.conn.backend_pid(),
                "Discarding broken connection"
            );
            return;
        }

        if state.closed {
            drop(state);
            close_detached(live.conn);
            return;
        }

        state.idle.push(live);
    }
}

/// Close a connection without waiting for it.
fn close_detached<C: Connection>(mut conn: C) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Error closing connection");
                }
            });
        }
        // No runtime to run the goodbye on; dropping ends the session.
        Err(_) => drop(conn),
    }
}

/// Returns the reserved slot if connection setup doesn't finish.
struct Reservation<'a, K: Connector> {
    pool: &'a PgPoolInner<K>,
    armed: bool,
}

impl<K: Connector> Drop for Reservation<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().checked_out -= 1;
        }
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// Exclusively owned by the holder. Hand it back with `PgPool::release`, or
/// just drop it. A connection marked broken is discarded instead of reused.
pub struct PooledConnection<K: Connector> {
    /// The actual connection (None once returned to the pool)
    live: Option<Live<K::Connection>>,
    /// Reference back to the pool
    pool: Arc<PgPoolInner<K>>,
    broken: bool,
    /// Semaphore permit (controls pool size)
    _permit: OwnedSemaphorePermit,
}

impl<K: Connector> PooledConnection<K> {
    fn live(&mut self) -> PgResult<&mut Live<K::Connection>> {
        self.live
            .as_mut()
            .ok_or_else(|| PgError::ConnectionError("Connection already released".to_string()))
    }

    /// Record fatal connection errors so the session isn't reused.
    fn track<T>(&mut self, result: PgResult<T>) -> PgResult<T> {
        if let Err(e) = &result {
            if e.is_connection_fatal() {
                tracing::debug!(error = %e, "Marking connection broken");
                self.broken = true;
            }
        }
        result
    }

    /// Mark the session broken for the duration of a connection call.
    ///
    /// If the call's future is dropped mid-flight the session is left in an
    /// unknown protocol state and must not be reused. Returns the previous
    /// flag, which the caller restores once the call completes.
    fn begin_call(&mut self) -> bool {
        std::mem::replace(&mut self.broken, true)
    }

    /// Flag the connection as unusable, e.g. after an I/O failure.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Check if the connection is healthy.
    pub fn is_healthy(&self) -> bool {
        !self.broken && self.live.as_ref().is_some_and(|l| !l.conn.is_closed())
    }

    /// Backend process ID of the underlying session.
    pub fn backend_pid(&self) -> i32 {
        self.live.as_ref().map_or(0, |l| l.conn.backend_pid())
    }

    /// Statements prepared on this connection.
    pub fn statement_count(&self) -> usize {
        self.live.as_ref().map_or(0, |l| l.statements.len())
    }

    /// Prepare a named statement.
    ///
    /// Preparing the same name with the same SQL again is a no-op; a
    /// different SQL text replaces the old statement.
    pub async fn prepare(&mut self, name: &str, sql: &str) -> PgResult<Arc<PreparedStatement>> {
        self.prepare_keyed(name, name, sql).await
    }

    async fn prepare_keyed(
        &mut self,
        key: &str,
        name: &str,
        sql: &str,
    ) -> PgResult<Arc<PreparedStatement>> {
        let live = self.live()?;
        if let Some(cached) = live.statements.get_and_touch(key) {
            if cached.query == sql {
                return Ok(cached);
            }
            live.statements.remove(key);
            let was_broken = self.begin_call();
            let result = self.live()?.conn.deallocate(&cached.name).await;
            self.broken = was_broken;
            self.track(result)?;
        }

        let was_broken = self.begin_call();
        let result = self.live()?.conn.prepare(name, sql).await;
        self.broken = was_broken;
        let statement = self.track(result)?;
        tracing::debug!(name, "Prepared statement");

        let displaced = self.live()?.statements.insert(key.to_string(), statement);
        if let Some(old) = displaced {
            let was_broken = self.begin_call();
            let result = self.live()?.conn.deallocate(&old.name).await;
            self.broken = was_broken;
            self.track(result)?;
        }

        self.live()?
            .statements
            .get(key)
            .ok_or_else(|| PgError::StatementNotFound(key.to_string()))
    }

    /// Run a query and decode its rows.
    ///
    /// `sql` may be the name of a statement prepared on this connection;
    /// anything else is prepared once and cached by its text.
    pub async fn query(&mut self, sql: &str, params: &[PgValue]) -> PgResult<QueryResult> {
        let live = self.live()?;
        let statement = match live.statements.get_and_touch(sql) {
            Some(statement) => statement,
            None => {
                let name = live.statements.next_statement_name();
                self.prepare_keyed(sql, &name, sql).await?
            }
        };

        let registry = Arc::clone(&self.pool.registry);
        let formats = result_formats(&registry, &statement.columns);

        let was_broken = self.begin_call();
        let result = self.live()?.conn.execute(&statement, params, &formats).await;
        self.broken = was_broken;
        let raw = self.track(result)?;

        decode_result(&registry, raw)
    }

    /// Run a query and return its first row.
    pub async fn query_row(&mut self, sql: &str, params: &[PgValue]) -> PgResult<Row> {
        self.query(sql, params)
            .await?
            .rows
            .into_iter()
            .next()
            .ok_or_else(|| PgError::ProtocolError("Query returned no rows".to_string()))
    }

    /// Run a query and return the first column of its first row.
    pub async fn query_value(&mut self, sql: &str, params: &[PgValue]) -> PgResult<PgValue> {
        self.query_row(sql, params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PgError::ProtocolError("Query returned no columns".to_string()))
    }

    /// Execute a statement and return the number of rows affected.
    pub async fn execute(&mut self, sql: &str, params: &[PgValue]) -> PgResult<u64> {
        Ok(self.query(sql, params).await?.rows_affected())
    }
}

impl<K: Connector> Drop for PooledConnection<K> {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            self.pool.check_in(live, self.broken);
        }
    }
}

impl<K: Connector> fmt::Debug for PooledConnection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("backend_pid", &self.backend_pid())
            .field("broken", &self.broken)
            .finish()
    }
}

// ============================================================================
// Connection Pool
// ============================================================================

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub checked_out: usize,
    pub max_connections: usize,
    pub closed: bool,
}

/// A bounded pool of connections.
///
/// Cloning is cheap and yields a handle to the same pool.
pub struct PgPool<K: Connector> {
    inner: Arc<PgPoolInner<K>>,
}

impl<K: Connector> Clone for PgPool<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Connector> PgPool<K> {
    /// Create a pool that opens connections lazily, with the built-in types.
    pub fn new(connector: K, config: PgPoolConfig) -> PgResult<Self> {
        Self::with_registry(connector, config, Arc::new(TypeRegistry::with_defaults()))
    }

    /// Create a pool that decodes with the given registry.
    pub fn with_registry(
        connector: K,
        config: PgPoolConfig,
        registry: Arc<TypeRegistry>,
    ) -> PgResult<Self> {
        config.validate()?;
        let inner = Arc::new(PgPoolInner {
            semaphore: Arc::new(Semaphore::new(config.max_connections as usize)),
            config,
            connector,
            registry,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                checked_out: 0,
                closed: false,
            }),
        });
        Ok(Self { inner })
    }

    /// Create a pool and open `min_connections` up front.
    pub async fn connect(connector: K, config: PgPoolConfig) -> PgResult<Self> {
        let pool = Self::new(connector, config)?;

        // Pre-create minimum connections
        for _ in 0..pool.inner.config.min_connections {
            let live = pool.inner.open().await?;
            pool.inner.state.lock().idle.push(live);
        }

        Ok(pool)
    }

    /// Get a connection from the pool.
    ///
    /// Waits while every connection is checked out, up to the configured
    /// `acquire_timeout` if there is one.
    pub async fn acquire(&self) -> PgResult<PooledConnection<K>> {
        match self.inner.config.acquire_timeout {
            Some(timeout) => self.acquire_timeout(timeout).await,
            None => self.acquire_inner().await,
        }
    }

    /// Get a connection, giving up after `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> PgResult<PooledConnection<K>> {
        tokio::time::timeout(timeout, self.acquire_inner())
            .await
            .map_err(|_| PgError::AcquireTimeout)?
    }

    async fn acquire_inner(&self) -> PgResult<PooledConnection<K>> {
        // Acquire a permit (waits if the pool is exhausted)
        let permit = Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PgError::PoolClosed)?;

        let idle = self.reserve()?;
        let mut reservation = Reservation {
            pool: &self.inner,
            armed: true,
        };

        let live = match idle {
            Some(live) => live,
            None => {
                let live = match self.inner.open().await {
                    Ok(live) => live,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to open pooled connection");
                        return Err(e);
                    }
                };
                // The pool may have been closed while the session was opening.
                let closed = self.inner.state.lock().closed;
                if closed {
                    tracing::debug!(
                        backend_pid = live.conn.backend_pid(),
                        "Pool closed during connect, discarding new connection"
                    );
                    close_detached(live.conn);
                    return Err(PgError::PoolClosed);
                }
                live
            }
        };
        reservation.armed = false;

        Ok(PooledConnection {
            live: Some(live),
            pool: Arc::clone(&self.inner),
            broken: false,
            _permit: permit,
        })
    }

    /// Count a checkout and hand back an idle connection if one is usable.
    fn reserve(&self) -> PgResult<Option<Live<K::Connection>>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(PgError::PoolClosed);
        }
        state.checked_out += 1;

        while let Some(live) = state.idle.pop() {
            if live.conn.is_closed() {
                tracing::debug!(
                    backend_pid = live.conn.backend_pid(),
                    "Dropping idle connection closed by the server"
                );
                continue;
            }
            return Ok(Some(live));
        }
        Ok(None)
    }

    /// Get an idle connection without waiting or opening a new one.
    ///
    /// Returns `None` when the pool is at capacity or when no connection is
    /// idle, even if there is room to open one.
    pub fn try_acquire(&self) -> PgResult<Option<PooledConnection<K>>> {
        let permit = match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(TryAcquireError::Closed) => return Err(PgError::PoolClosed),
        };

        let idle = self.reserve()?;
        let mut reservation = Reservation {
            pool: &self.inner,
            armed: true,
        };
        let Some(live) = idle else {
            return Ok(None);
        };
        reservation.armed = false;

        Ok(Some(PooledConnection {
            live: Some(live),
            pool: Arc::clone(&self.inner),
            broken: false,
            _permit: permit,
        }))
    }

    /// Return a connection to the pool.
    ///
    /// Broken connections are discarded; the next `acquire` opens a
    /// replacement.
    pub fn release(&self, conn: PooledConnection<K>) -> PgResult<()> {
        if !Arc::ptr_eq(&conn.pool, &self.inner) {
            return Err(PgError::InvalidRelease);
        }
        drop(conn);
        Ok(())
    }

    /// Close the pool and all idle connections.
    ///
    /// Pending `acquire` calls fail with `PoolClosed`. Connections still
    /// checked out are closed when they come back.
    pub async fn close(&self) {
        self.inner.semaphore.close();

        let connections = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        let count = connections.len();
        for mut live in connections {
            if let Err(e) = live.conn.close().await {
                tracing::debug!(error = %e, "Error closing idle connection");
            }
        }
        tracing::info!(closed_idle = count, "Connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of connections currently handed out.
    pub fn checked_out(&self) -> usize {
        self.inner.state.lock().checked_out
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            max_connections: self.inner.config.max_connections as usize,
            closed: state.closed,
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PgPoolConfig {
        &self.inner.config
    }

    /// The registry used to decode results on this pool's connections.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }
}

impl<K: Connector> fmt::Debug for PgPool<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgPool").field("status", &self.status()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config() {
        let config = PgPoolConfig::new()
            .min_connections(2)
            .max_connections(20)
            .acquire_timeout(Duration::from_millis(250))
            .statement_cache_capacity(200);

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.statement_cache_capacity, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_validation() {
        assert!(PgPoolConfig::new().max_connections(0).validate().is_err());
        assert!(PgPoolConfig::new()
            .min_connections(6)
            .max_connections(5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_pool_config_deserialize() {
        let config: PgPoolConfig =
            serde_json::from_str(r#"{"max_connections": 5, "acquire_timeout_ms": 1000}"#).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(1)));
        assert_eq!(config.statement_cache_capacity, 100);
    }
}
