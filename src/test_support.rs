//! In-process mock backend and helpers shared by the unit tests

use hyper::header::{CONNECTION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::config::ServerConfig;
use crate::models::BackendAddress;

/// Canned response from the mock backend
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: String,
    pub delay_ms: u64,
    pub close: bool,
}

impl MockReply {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: body.into(),
            delay_ms: 0,
            close: false,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: String::new(),
            delay_ms: 0,
            close: false,
        }
    }

    pub fn delayed(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Ask the server to drop the connection after this response
    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

pub struct MockBackend {
    pub address: BackendAddress,
    hits: Arc<AtomicUsize>,
    _shutdown: oneshot::Sender<()>,
}

impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start a mock backend on an ephemeral port. It stops when the handle drops.
pub async fn spawn_backend<F>(handler: F) -> MockBackend
where
    F: Fn(&Request<Body>) -> MockReply + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let hits = Arc::new(AtomicUsize::new(0));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let service_hits = Arc::clone(&hits);
    let make_svc = make_service_fn(move |_| {
        let handler = Arc::clone(&handler);
        let hits = Arc::clone(&service_hits);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                hits.fetch_add(1, Ordering::SeqCst);
                let reply = handler(&req);
                async move {
                    if reply.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(reply.delay_ms)).await;
                    }
                    let mut builder = Response::builder()
                        .status(reply.status)
                        .header(CONTENT_TYPE, "application/json");
                    if reply.close {
                        builder = builder.header(CONNECTION, "close");
                    }
                    Ok::<_, Infallible>(builder.body(Body::from(reply.body)).unwrap())
                }
            }))
        }
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let port = server.local_addr().port();

    tokio::spawn(async move {
        let _ = server
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    MockBackend {
        address: BackendAddress::new("127.0.0.1", port),
        hits,
        _shutdown: shutdown_tx,
    }
}

/// An address nothing is listening on
pub fn closed_port() -> BackendAddress {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    BackendAddress::new("127.0.0.1", port)
}

/// Poll `condition` for up to a second
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Server configuration pointing at the given backends
pub fn test_config(addresses: &[&BackendAddress], core: usize, max: usize) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.backend.hosts = addresses
        .iter()
        .map(|address| address.to_string())
        .collect::<Vec<_>>()
        .join(",");
    config.pool.core_connections = core;
    config.pool.max_connections = max;
    config.dispatcher.worker_pool_size = 16;
    config
}
