//! Logging utility functions for request and backend events

use crate::error::RequestFailure;
use crate::log_debug;
use crate::logging::process_info;
use hyper::StatusCode;
use std::net::SocketAddr;
use tracing::{debug, info};

/// Log incoming request information
pub fn log_incoming_request(method: &str, uri: &str, remote_addr: &SocketAddr) {
    info!("{} 📥 {} {} from {}", process_info(), method, uri, remote_addr.ip());
    log_debug!("{} 🔍 REQUEST DETAILS:\n  Method: {}\n  URI: {}\n  Remote: {}",
               process_info(), method, uri, remote_addr);
}

/// Log a correlated backend event (`backend-request-submit`, `-start`, `-end`)
pub fn log_backend_event(request_id: &str, event: &str, target: &str) {
    debug!(request_id = %request_id, "{} {}", event, target);
}

/// Log a test case that completed successfully
pub fn log_test_success(test_case: &str, request_id: &str, status: StatusCode, total_time: u64) {
    info!("✅ {} id={} → {} ({}ms)", test_case, request_id, status, total_time);
}

/// Log a test case that failed
pub fn log_test_failure(test_case: &str, request_id: &str, total_time: u64, failure: &RequestFailure) {
    info!("❌ {} id={} → {} ({}ms): {}", test_case, request_id,
          failure.status, total_time, failure.cause);
    log_debug!("❌ TEST CASE FAILURE:\n  Test case: {}\n  Id: {}\n  Status: {}\n  Time: {}ms\n  Cause: {}",
               test_case, request_id, failure.status, total_time, failure.cause);
}
