//! Bounded connection pool with validate-on-borrow and a FIFO idle list
//! (spec §4.6).
//!
//! Grounded on `gator-db::pool::create_pool`'s use of a bounded,
//! timeout-bearing pool in front of a backend session, generalized from
//! a concrete `sqlx::PgPool` to the `DbBackend` capability set so the
//! same pool works against any backend a `BackendFactory` can produce.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::backend::{BackendFactory, DbBackend};
use crate::error::{DbPoolError, DbPoolResult};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: usize,
    pub timeout: Duration,
    pub validation_interval: Duration,
    pub validate_connections: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            timeout: Duration::from_secs(10),
            validation_interval: Duration::from_secs(30),
            validate_connections: true,
        }
    }
}

struct Connection {
    backend: Box<dyn DbBackend>,
    last_validated_at: Instant,
    last_used_at: Instant,
}

struct PoolState {
    idle: VecDeque<Connection>,
    closed: bool,
}

pub struct ConnectionPool {
    config: PoolConfig,
    connection_string: String,
    factory: Arc<dyn BackendFactory>,
    state: Mutex<PoolState>,
    semaphore: Arc<Semaphore>,
    total_connections: AtomicUsize,
}

impl ConnectionPool {
    pub fn new(connection_string: impl Into<String>, factory: Arc<dyn BackendFactory>, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config,
            connection_string: connection_string.into(),
            factory,
            state: Mutex::new(PoolState { idle: VecDeque::new(), closed: false }),
            total_connections: AtomicUsize::new(0),
        })
    }

    pub fn total_connections(&self) -> usize {
        self.total_connections.load(Ordering::Relaxed)
    }

    /// Borrows a connection, blocking up to `config.timeout` if the pool
    /// is exhausted. The returned guard releases back to the idle list
    /// (or is dropped, on shutdown) on every exit path.
    pub async fn borrow(self: &Arc<Self>) -> DbPoolResult<PooledConnection> {
        if self.state.lock().expect("poisoned").closed {
            return Err(DbPoolError::PoolClosed);
        }

        let permit = match tokio::time::timeout(self.config.timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbPoolError::PoolClosed),
            Err(_) => return Err(DbPoolError::Timeout),
        };

        if self.state.lock().expect("poisoned").closed {
            return Err(DbPoolError::PoolClosed);
        }

        let conn = self.take_or_create().await?;
        Ok(PooledConnection { pool: Arc::clone(self), conn: Some(conn), permit: Some(permit) })
    }

    async fn take_or_create(&self) -> DbPoolResult<Connection> {
        let popped = self.state.lock().expect("poisoned").idle.pop_front();
        if let Some(mut conn) = popped {
            if self.config.validate_connections && conn.last_validated_at.elapsed() >= self.config.validation_interval {
                match conn.backend.ping().await {
                    Ok(()) => {
                        conn.last_validated_at = Instant::now();
                        return Ok(conn);
                    }
                    Err(err) => {
                        warn!(error = %err, "idle connection failed validation, replacing");
                        self.total_connections.fetch_sub(1, Ordering::Relaxed);
                        let _ = conn.backend.close().await;
                    }
                }
            } else {
                return Ok(conn);
            }
        }
        self.create().await
    }

    async fn create(&self) -> DbPoolResult<Connection> {
        let backend = self.factory.connect(&self.connection_string).await?;
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        Ok(Connection { backend, last_validated_at: now, last_used_at: now })
    }

    fn release(&self, mut conn: Connection) {
        conn.last_used_at = Instant::now();
        let mut state = self.state.lock().expect("poisoned");
        if state.closed {
            drop(state);
            self.total_connections.fetch_sub(1, Ordering::Relaxed);
        } else {
            state.idle.push_back(conn);
        }
    }

    /// Stops accepting new borrows and releases all blocked waiters with
    /// `PoolClosed`; idle connections are closed immediately.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.state.lock().expect("poisoned");
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.semaphore.close();
        for conn in idle {
            self.total_connections.fetch_sub(1, Ordering::Relaxed);
            let _ = conn.backend.close().await;
        }
        debug!("connection pool shut down");
    }
}

pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl PooledConnection {
    pub fn backend(&self) -> &dyn DbBackend {
        self.conn.as_ref().expect("connection taken").backend.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackendFactory;

    fn pool(max: usize) -> Arc<ConnectionPool> {
        ConnectionPool::new("fake://db", Arc::new(FakeBackendFactory::new(true)), PoolConfig { max_connections: max, timeout: Duration::from_millis(200), validation_interval: Duration::from_secs(60), validate_connections: true })
    }

    #[tokio::test]
    async fn borrow_creates_up_to_max_then_blocks_and_times_out() {
        let pool = pool(1);
        let first = pool.borrow().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), pool.borrow()).await;
        assert!(second.is_err() || matches!(second.unwrap(), Err(DbPoolError::Timeout)));
        drop(first);
        let third = pool.borrow().await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn returned_connection_is_reused_not_recreated() {
        let pool = pool(2);
        let conn = pool.borrow().await.unwrap();
        drop(conn);
        let _conn2 = pool.borrow().await.unwrap();
        assert_eq!(pool.total_connections(), 1);
    }

    #[tokio::test]
    async fn shutdown_releases_idle_and_future_borrows_fail() {
        let pool = pool(1);
        let conn = pool.borrow().await.unwrap();
        drop(conn);
        pool.shutdown().await;
        assert_eq!(pool.total_connections(), 0);
        let borrowed = pool.borrow().await;
        assert!(matches!(borrowed, Err(DbPoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn broken_idle_connection_is_replaced_on_validation() {
        let factory = Arc::new(FakeBackendFactory::new(true));
        let pool = ConnectionPool::new("fake://db", factory.clone(), PoolConfig { max_connections: 1, timeout: Duration::from_millis(200), validation_interval: Duration::from_millis(0), validate_connections: true });
        let conn = pool.borrow().await.unwrap();
        drop(conn);
        factory.healthy.store(false, Ordering::Relaxed);
        let attempt = pool.borrow().await;
        assert!(attempt.is_err());
    }
}
