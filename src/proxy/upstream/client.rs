//! Backend call dispatcher
//!
//! Each call runs as its own task gated by a bounded worker budget, so a slow
//! backend can only ever tie up `worker_pool_size` exchanges at once. The
//! caller gets a [`BackendCall`] future that it awaits on its own task.

use hyper::header::HOST;
use hyper::{Body, Request};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::models::{BackendReply, PoolStatus};
use crate::proxy::upstream::connection_pool::ConnectionPool;
use crate::proxy::upstream::host_selector::HostSelector;
use crate::utils::{backend_url, elapsed_ms, log_backend_event, ms_to_timeout, request_target};

/// Dispatches backend calls across one pool per configured host
#[derive(Clone)]
pub struct BackendClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    pools: Vec<ConnectionPool>,
    selector: HostSelector,
    workers: Arc<Semaphore>,
    base_path: String,
    socket_timeout: Option<Duration>,
    connection_request_timeout: Option<Duration>,
}

/// Pending result of one backend call
pub struct BackendCall {
    rx: oneshot::Receiver<Result<BackendReply>>,
}

impl Future for BackendCall {
    type Output = Result<BackendReply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::WorkerPoolClosed)))
    }
}

impl BackendClient {
    /// Build one pool per backend host from configuration
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let pools = config
            .backend
            .addresses()
            .into_iter()
            .map(|address| ConnectionPool::new(address, &config.pool))
            .collect::<Result<Vec<_>>>()?;

        if pools.is_empty() {
            return Err(Error::Config("no backend hosts configured".to_string()));
        }

        info!("🚀 Backend client for {} host(s), worker pool size {}",
              pools.len(), config.dispatcher.worker_pool_size);

        Ok(Self {
            inner: Arc::new(ClientInner {
                pools,
                selector: HostSelector::new(config.backend.host_selection),
                workers: Arc::new(Semaphore::new(config.dispatcher.worker_pool_size)),
                base_path: config.backend.base_path.clone(),
                socket_timeout: ms_to_timeout(config.pool.socket_timeout_ms),
                connection_request_timeout: ms_to_timeout(config.pool.connection_request_timeout_ms),
            }),
        })
    }

    /// Warm the core connections of every pool
    pub async fn warm(&self) -> usize {
        let mut established = 0;
        for pool in &self.inner.pools {
            established += pool.warm().await;
        }
        established
    }

    /// Issue a GET for `path` against a selected backend host.
    ///
    /// Never blocks: the exchange is queued behind the worker budget and
    /// the returned future resolves with its outcome.
    pub fn dispatch(&self, request_id: &str, path: &str) -> BackendCall {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let request_id = request_id.to_string();
        let path = path.to_string();

        log_backend_event(&request_id, "backend-request-submit", &path);

        tokio::spawn(async move {
            let permit = match Arc::clone(&inner.workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = tx.send(Err(Error::WorkerPoolClosed));
                    return;
                }
            };

            let pool = inner.select_pool();
            let result = inner.execute(pool, &request_id, &path).await;
            drop(permit);

            if tx.send(result).is_err() {
                debug!(request_id = %request_id, "Backend response for {} arrived with no listener", path);
                pool.on_unhandled_request();
            }
        });

        BackendCall { rx }
    }

    pub fn pool_status(&self) -> Vec<PoolStatus> {
        self.inner.pools.iter().map(ConnectionPool::status).collect()
    }

    pub fn pools(&self) -> &[ConnectionPool] {
        &self.inner.pools
    }

    /// Stop accepting new calls and close idle connections
    pub fn shutdown(&self) {
        self.inner.workers.close();
        for pool in &self.inner.pools {
            pool.shutdown();
        }
    }
}

impl ClientInner {
    fn select_pool(&self) -> &ConnectionPool {
        &self.pools[self.selector.next_index(self.pools.len())]
    }

    async fn execute(&self, pool: &ConnectionPool, request_id: &str, path: &str) -> Result<BackendReply> {
        let url = backend_url(pool.address(), &self.base_path, path)
            .map_err(|e| Error::Internal(format!("invalid backend url for {}: {}", path, e)))?;
        let start = Instant::now();
        log_backend_event(request_id, "backend-request-start", url.as_str());

        let acquire = pool.acquire();
        let mut connection = match self.connection_request_timeout {
            Some(limit) => tokio::time::timeout(limit, acquire).await??,
            None => acquire.await?,
        };

        let request = Request::get(request_target(&url))
            .header(HOST, pool.address().to_string())
            .body(Body::empty())
            .map_err(|e| Error::Internal(e.to_string()))?;

        let exchange = connection.exchange(request);
        let outcome = match self.socket_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(Error::from)
                .and_then(|result| result),
            None => exchange.await,
        };

        match &outcome {
            Ok(_) => pool.release(connection),
            Err(e) => {
                warn!(request_id = %request_id, "Backend exchange with {} failed: {}", pool.address(), e);
                connection.close();
            }
        }

        log_backend_event(request_id, "backend-request-end", url.as_str());
        debug!(request_id = %request_id, "backend-request {} took {}ms", url, elapsed_ms(start));
        outcome
    }
}
