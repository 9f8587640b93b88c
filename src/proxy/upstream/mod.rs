//! Upstream side: pooled connections to the backend services and the
//! dispatcher that issues calls over them

pub mod client;
pub mod connection;
pub mod connection_pool;
pub mod host_selector;

pub use client::{BackendCall, BackendClient};
pub use connection::Connection;
pub use connection_pool::ConnectionPool;
pub use host_selector::HostSelector;
