//! A single dedicated HTTP/1.1 link to one backend address

use bytes::Bytes;
use futures::future::poll_fn;
use hyper::client::conn::{Builder, SendRequest};
use hyper::{Body, Request};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{BackendAddress, BackendReply};

const IDLE: u8 = 0;
const BORROWED: u8 = 1;
const CLOSED: u8 = 2;

/// Shared bookkeeping for one connection.
///
/// The pool and the transport driver task both hold a reference; the
/// ownership slot moves `BORROWED -> IDLE -> BORROWED ...` and finally to
/// `CLOSED`, always through atomic transitions so that exactly one party
/// observes each hand-off.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    id: u64,
    address: BackendAddress,
    slot: AtomicU8,
    transport_closed: watch::Sender<bool>,
}

impl ConnectionState {
    fn new(id: u64, address: BackendAddress) -> Self {
        let (transport_closed, _) = watch::channel(false);
        Self {
            id,
            address,
            slot: AtomicU8::new(BORROWED),
            transport_closed,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn address(&self) -> &BackendAddress {
        &self.address
    }

    pub(crate) fn is_open(&self) -> bool {
        !*self.transport_closed.borrow() && self.slot.load(Ordering::Acquire) != CLOSED
    }

    pub(crate) fn mark_transport_closed(&self) {
        self.transport_closed.send_replace(true);
    }

    /// Resolves once the transport has gone away, cleanly or not
    pub(crate) async fn closed(&self) {
        let mut rx = self.transport_closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// IDLE -> BORROWED; fails if another borrower or the close path won
    pub(crate) fn try_claim(&self) -> bool {
        self.slot
            .compare_exchange(IDLE, BORROWED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// BORROWED -> IDLE; fails if the connection was retired meanwhile
    pub(crate) fn try_park(&self) -> bool {
        self.slot
            .compare_exchange(BORROWED, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves to CLOSED. Returns true if the connection was sitting idle.
    pub(crate) fn retire(&self) -> bool {
        self.slot.swap(CLOSED, Ordering::AcqRel) == IDLE
    }
}

/// One logical link to a backend.
///
/// A `Connection` value is owned by exactly one party at a time: either the
/// pool's available set or a single borrower. It is not `Clone`.
pub struct Connection {
    state: Arc<ConnectionState>,
    sender: SendRequest<Body>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.state.id)
            .field("address", &self.state.address)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Connection {
    /// Connect to `address` and spawn the task that drives the HTTP/1.1 transport.
    ///
    /// The driver task marks the connection closed when the socket ends or
    /// when [`Connection::close`] is called, whichever comes first.
    pub(crate) async fn open(id: u64, address: BackendAddress, connect_timeout: Option<Duration>) -> Result<Self> {
        let connect = TcpStream::connect((address.host.as_str(), address.port));
        let stream = match connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(stream) => stream,
                Err(_) => {
                    return Err(Error::ConnectFailure {
                        address: address.clone(),
                        reason: format!("connect timed out after {}ms", limit.as_millis()),
                    })
                }
            },
            None => connect.await,
        }
        .map_err(|e| Error::ConnectFailure {
            address: address.clone(),
            reason: e.to_string(),
        })?;

        stream.set_nodelay(true)?;

        let (sender, transport) = Builder::new()
            .handshake::<_, Body>(stream)
            .await
            .map_err(|e| Error::ConnectFailure {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        let state = Arc::new(ConnectionState::new(id, address));
        let driver_state = Arc::clone(&state);

        tokio::spawn(async move {
            tokio::select! {
                result = transport => {
                    if let Err(e) = result {
                        debug!("Connection {} to {} ended with error: {}", driver_state.id, driver_state.address, e);
                    }
                }
                _ = driver_state.closed() => {
                    debug!("Connection {} to {} closed locally", driver_state.id, driver_state.address);
                }
            }
            driver_state.mark_transport_closed();
        });

        Ok(Self { state, sender })
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn address(&self) -> &BackendAddress {
        &self.state.address
    }

    /// False once the transport has closed or the pool has retired it
    pub fn is_active(&self) -> bool {
        self.state.is_open()
    }

    /// Tear the transport down. The owning pool releases its capacity token
    /// once the close is observed.
    pub fn close(&self) {
        self.state.mark_transport_closed();
    }

    pub(crate) fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    /// Send one request and read the full response body
    pub async fn exchange(&mut self, request: Request<Body>) -> Result<BackendReply> {
        poll_fn(|cx| self.sender.poll_ready(cx)).await?;

        let response = self.sender.send_request(request).await?;
        let status = response.status();
        let body: Bytes = hyper::body::to_bytes(response.into_body()).await?;

        Ok(BackendReply { status, body })
    }
}
