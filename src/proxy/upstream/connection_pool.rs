//! Dedicated connection pool for one backend address
//!
//! Capacity and availability are tracked separately:
//! - a semaphore holds one permit per live connection (connecting, borrowed or idle),
//!   so the cap holds even while on-demand connects are still in flight;
//! - a lock-free queue holds the idle connections that can be handed out.
//!
//! A permit is returned only when the connection's transport closes.

use crossbeam_queue::SegQueue;
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::models::{BackendAddress, PoolStatus};
use crate::proxy::upstream::connection::{Connection, ConnectionState};
use crate::utils::ms_to_timeout;

/// Connection pool for a single backend address
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    address: BackendAddress,
    core_size: usize,
    max_size: usize,
    connect_timeout: Option<Duration>,
    capacity: Arc<Semaphore>,
    available: SegQueue<Connection>,
    available_count: AtomicUsize,
    unhandled_requests: AtomicU64,
    next_connection_id: AtomicU64,
}

impl ConnectionPool {
    pub fn new(address: BackendAddress, config: &PoolConfig) -> Result<Self> {
        if config.core_connections > config.max_connections {
            return Err(Error::Config(
                "Core connection count can not be more than max connections.".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                address,
                core_size: config.core_connections,
                max_size: config.max_connections,
                connect_timeout: ms_to_timeout(config.connect_timeout_ms),
                capacity: Arc::new(Semaphore::new(config.max_connections)),
                available: SegQueue::new(),
                available_count: AtomicUsize::new(0),
                unhandled_requests: AtomicU64::new(0),
                next_connection_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn address(&self) -> &BackendAddress {
        &self.inner.address
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Eagerly establish `core_size` connections.
    ///
    /// Attempts run concurrently. Failures are logged and not retried, so the
    /// pool may stay under-provisioned until traffic grows it on demand.
    /// Returns how many connections were established.
    pub async fn warm(&self) -> usize {
        let attempts = (0..self.inner.core_size).map(|_| self.create_eagerly());
        let established = join_all(attempts).await.into_iter().filter(|ok| *ok).count();

        info!(
            "🔌 Warmed pool for {}: {}/{} core connections established",
            self.inner.address, established, self.inner.core_size
        );
        established
    }

    async fn create_eagerly(&self) -> bool {
        let Some(permit) = self.reserve_capacity() else {
            error!(
                "Eager connection attempt failed. Pool exhausted, can not create any more connection to {}.",
                self.inner.address
            );
            return false;
        };

        match self.connect(permit).await {
            Ok(connection) => {
                self.release(connection);
                true
            }
            Err(_) => false,
        }
    }

    /// Borrow a connection: an idle one if any is available, otherwise a new
    /// one created on demand as long as capacity remains.
    pub async fn acquire(&self) -> Result<Connection> {
        if let Some(connection) = self.take_available() {
            return Ok(connection);
        }

        let Some(permit) = self.reserve_capacity() else {
            error!(
                "On demand connection attempt failed. Pool exhausted, can not create any more connection to {}.",
                self.inner.address
            );
            return Err(Error::PoolExhausted {
                address: self.inner.address.clone(),
                max_size: self.inner.max_size,
            });
        };

        self.connect(permit).await
    }

    /// Hand a borrowed connection back. Inactive connections are dropped.
    pub fn release(&self, connection: Connection) {
        if !connection.is_active() {
            info!("Inactive connection {} returned, not adding back to the pool.", connection.id());
            return;
        }

        // Count first so a concurrent close never drives the counter below zero
        self.inner.available_count.fetch_add(1, Ordering::AcqRel);
        if connection.state().try_park() {
            self.inner.available.push(connection);
        } else {
            self.inner.available_count.fetch_sub(1, Ordering::AcqRel);
            info!("Connection {} closed while being returned, discarding.", connection.id());
        }
    }

    /// Record a backend response that nobody was waiting for
    pub fn on_unhandled_request(&self) {
        self.inner.unhandled_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            address: self.inner.address.to_string(),
            available_connections_count: self.inner.available_count.load(Ordering::Acquire),
            total_connections_count: self.inner.max_size - self.inner.capacity.available_permits(),
            unhandled_requests_since_startup: self.inner.unhandled_requests.load(Ordering::Relaxed),
        }
    }

    /// Close every idle connection. Borrowed connections close when dropped.
    pub fn shutdown(&self) {
        let mut closed = 0;
        while let Some(connection) = self.inner.available.pop() {
            connection.close();
            closed += 1;
        }
        info!("Pool for {} shut down, closed {} idle connections", self.inner.address, closed);
    }

    fn reserve_capacity(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.inner.capacity).try_acquire_owned().ok()
    }

    fn take_available(&self) -> Option<Connection> {
        let mut discarded = 0;
        while let Some(connection) = self.inner.available.pop() {
            if connection.state().try_claim() {
                self.inner.available_count.fetch_sub(1, Ordering::AcqRel);
                if connection.is_active() {
                    return Some(connection);
                }
                // Transport ended but the close has not been processed yet
                connection.close();
            }
            discarded += 1;
            info!(
                "Got an inactive connection from available pool for {}. Throwing it away. Retry count: {}",
                self.inner.address, discarded
            );
        }
        None
    }

    async fn connect(&self, permit: OwnedSemaphorePermit) -> Result<Connection> {
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);

        match Connection::open(id, self.inner.address.clone(), self.inner.connect_timeout).await {
            Ok(connection) => {
                debug!("New connection {} established to {}", id, self.inner.address);
                self.watch_close(Arc::clone(connection.state()), permit);
                Ok(connection)
            }
            Err(e) => {
                // Dropping the permit hands the capacity token back
                error!("Failed to connect to {}: {}", self.inner.address, e);
                Err(e)
            }
        }
    }

    fn watch_close(&self, state: Arc<ConnectionState>, permit: OwnedSemaphorePermit) {
        let pool: Weak<PoolInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            state.closed().await;
            let was_idle = state.retire();
            if let Some(pool) = pool.upgrade() {
                if was_idle {
                    pool.available_count.fetch_sub(1, Ordering::AcqRel);
                }
            }
            drop(permit);
            debug!("Connection {} disconnected from {}", state.id(), state.address());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{closed_port, spawn_backend, wait_until, MockReply};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn pool_config(core: usize, max: usize) -> PoolConfig {
        PoolConfig {
            core_connections: core,
            max_connections: max,
            ..PoolConfig::default()
        }
    }

    #[test]
    fn test_core_above_max_is_rejected() {
        let result = ConnectionPool::new(BackendAddress::new("localhost", 1), &pool_config(3, 2));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_warm_fills_core() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let pool = ConnectionPool::new(backend.address.clone(), &pool_config(3, 5)).unwrap();

        assert_eq!(pool.warm().await, 3);
        let status = pool.status();
        assert_eq!(status.available_connections_count, 3);
        assert_eq!(status.total_connections_count, 3);
    }

    #[tokio::test]
    async fn test_warm_failures_are_not_retried() {
        let pool = ConnectionPool::new(closed_port(), &pool_config(2, 4)).unwrap();

        assert_eq!(pool.warm().await, 0);
        let status = pool.status();
        assert_eq!(status.available_connections_count, 0);
        assert_eq!(status.total_connections_count, 0);
    }

    #[tokio::test]
    async fn test_acquire_reuses_idle_connection() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let pool = ConnectionPool::new(backend.address.clone(), &pool_config(1, 2)).unwrap();
        pool.warm().await;

        let first = pool.acquire().await.unwrap();
        let id = first.id();
        assert_eq!(pool.status().available_connections_count, 0);
        pool.release(first);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(pool.status().total_connections_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_when_at_capacity() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let pool = ConnectionPool::new(backend.address.clone(), &pool_config(0, 1)).unwrap();

        let _held = pool.acquire().await.unwrap();
        match pool.acquire().await {
            Err(Error::PoolExhausted { address, max_size }) => {
                assert_eq!(address, backend.address);
                assert_eq!(max_size, 1);
            }
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_failure_releases_token() {
        let pool = ConnectionPool::new(closed_port(), &pool_config(0, 1)).unwrap();

        assert!(matches!(pool.acquire().await, Err(Error::ConnectFailure { .. })));
        assert_eq!(pool.status().total_connections_count, 0);
        // Still a connect failure, not exhaustion: the token came back
        assert!(matches!(pool.acquire().await, Err(Error::ConnectFailure { .. })));
    }

    #[tokio::test]
    async fn test_inactive_connection_is_never_reused() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let pool = ConnectionPool::new(backend.address.clone(), &pool_config(0, 2)).unwrap();

        let dead = pool.acquire().await.unwrap();
        let dead_id = dead.id();
        dead.close();
        pool.release(dead);
        assert_eq!(pool.status().available_connections_count, 0);

        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id(), dead_id);
    }

    #[tokio::test]
    async fn test_transport_close_removes_idle_and_releases_token() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let pool = ConnectionPool::new(backend.address.clone(), &pool_config(0, 1)).unwrap();

        let connection = pool.acquire().await.unwrap();
        let state = Arc::clone(connection.state());
        pool.release(connection);
        assert_eq!(pool.status().available_connections_count, 1);

        state.mark_transport_closed();
        assert!(wait_until(|| pool.status().total_connections_count == 0).await);
        assert_eq!(pool.status().available_connections_count, 0);

        // Capacity is back, so a new connection can be made
        let replacement = pool.acquire().await.unwrap();
        assert_ne!(replacement.id(), state.id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_borrowers_respect_cap_and_exclusivity() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let pool = ConnectionPool::new(backend.address.clone(), &pool_config(2, 4)).unwrap();
        pool.warm().await;

        let borrowed = Arc::new(Mutex::new(HashSet::new()));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let pool = pool.clone();
            let borrowed = Arc::clone(&borrowed);
            tasks.push(tokio::spawn(async move {
                for round in 0..25 {
                    match pool.acquire().await {
                        Ok(connection) => {
                            assert!(borrowed.lock().unwrap().insert(connection.id()));
                            assert!(pool.status().total_connections_count <= 4);
                            tokio::task::yield_now().await;
                            if round % 10 == 9 {
                                connection.close();
                            }
                            borrowed.lock().unwrap().remove(&connection.id());
                            pool.release(connection);
                        }
                        Err(Error::PoolExhausted { .. }) => tokio::task::yield_now().await,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(pool.status().total_connections_count <= 4);
    }
}
