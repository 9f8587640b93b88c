use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::parse_query;

/// Host/port pair identifying one backend service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendAddress {
    pub host: String,
    pub port: u16,
}

impl BackendAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// Decoded request handed over by the inbound server
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, Vec<String>>,
    pub keep_alive: bool,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, query: Option<&str>, keep_alive: bool) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: query.map(parse_query).unwrap_or_default(),
            keep_alive,
        }
    }

    /// First value of a query parameter, ignoring empty values
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

// Raw result of one backend exchange, before any parsing
#[derive(Debug, Clone)]
pub struct BackendReply {
    pub status: hyper::StatusCode,
    pub body: bytes::Bytes,
}

/// JSON object returned by the mock backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendPayload(pub Map<String, Value>);

impl BackendPayload {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        if body.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let payload = serde_json::from_slice(body)?;
        Ok(payload)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

// Status of one backend connection pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolStatus {
    pub address: String,
    pub available_connections_count: usize,
    pub total_connections_count: usize,
    pub unhandled_requests_since_startup: u64,
}

// Status of one registered test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseStatus {
    pub name: String,
    pub inflight_tests: u64,
    pub request_recv_count: u64,
    pub tests_with_errors: u64,
    pub conn_pools: Vec<PoolStatus>,
}

// Full snapshot served on the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub timestamp: DateTime<Utc>,
    pub uptime_ms: u64,
    pub test_cases: Vec<TestCaseStatus>,
}
