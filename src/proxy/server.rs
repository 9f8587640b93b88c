//! Inbound HTTP server
//!
//! Thin adapter between hyper and the test case handlers: it decodes the
//! request, creates the completion signal, and turns the outcome into a
//! response.

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::InboundConfig;
use crate::error::RequestFailure;
use crate::models::InboundRequest;
use crate::proxy::completion::RequestCompletion;
use crate::proxy::test_cases::TestRegistry;
use crate::utils::{build_error_response, build_json_response, is_keep_alive, log_incoming_request, ms_to_timeout};
use crate::{log_debug, log_info};

/// Request routing state shared by every inbound connection
pub struct ServerState {
    context_path: String,
    request_timeout: Option<Duration>,
    trace_requests: bool,
    registry: Arc<TestRegistry>,
}

impl ServerState {
    pub fn new(config: &InboundConfig, registry: Arc<TestRegistry>) -> Self {
        Self {
            context_path: config.context_path.trim_end_matches('/').to_string(),
            request_timeout: ms_to_timeout(config.request_timeout_ms),
            trace_requests: config.trace_requests,
            registry,
        }
    }

    /// Test case name addressed by `path`, if it is under the context path
    fn test_case_name<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.context_path.as_str())?
            .strip_prefix('/')
            .map(|name| name.trim_end_matches('/'))
            .filter(|name| !name.is_empty())
    }
}

pub struct FanoutServer {
    listen_addr: SocketAddr,
    state: Arc<ServerState>,
}

impl FanoutServer {
    pub fn new(config: &InboundConfig, registry: Arc<TestRegistry>) -> Self {
        Self {
            listen_addr: config.listen_addr,
            state: Arc::new(ServerState::new(config, registry)),
        }
    }

    /// Serve until Ctrl-C
    pub async fn start(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("🛑 Shutdown signal received");
        })
        .await
    }

    /// Serve until `shutdown` resolves, then drain in-flight connections
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let state = Arc::clone(&self.state);
        let make_svc = make_service_fn(move |conn: &hyper::server::conn::AddrStream| {
            let remote_addr = conn.remote_addr();
            let state = Arc::clone(&state);
            log_debug!("New connection from: {}", remote_addr);

            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, remote_addr, state).await }
                }))
            }
        });

        let server = Server::try_bind(&self.listen_addr)
            .with_context(|| format!("Failed to bind {}", self.listen_addr))?
            .serve(make_svc);

        info!("🌐 Fan-out server listening on {}", server.local_addr());
        log_info!("Test cases served under {}/{{test_case}}?id=...", self.state.context_path);

        server
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        info!("✅ Server stopped");
        Ok(())
    }
}

/// Handle incoming HTTP request
pub async fn handle_request(
    req: Request<Body>,
    remote_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<Response<Body>, Infallible> {
    log_incoming_request(req.method().as_str(), &req.uri().to_string(), &remote_addr);
    Ok(route(&state, req).await)
}

async fn route(state: &ServerState, req: Request<Body>) -> Response<Body> {
    let keep_alive = is_keep_alive(req.version(), req.headers());
    let path = req.uri().path();

    match path {
        "/health" => build_json_response(StatusCode::OK, json!({ "status": "ok" }).to_string(), keep_alive),
        "/status" => match serde_json::to_vec(&state.registry.status()) {
            Ok(body) => build_json_response(StatusCode::OK, body, keep_alive),
            Err(e) => build_error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), keep_alive),
        },
        _ => match state.test_case_name(path).and_then(|name| state.registry.get(name)) {
            Some(handler) => {
                let request = InboundRequest::new(req.method().as_str(), path, req.uri().query(), keep_alive);
                let completion = RequestCompletion::new(state.trace_requests);
                handler.process_request(&request, completion.clone());
                respond(state, &completion, keep_alive).await
            }
            None => build_error_response(StatusCode::NOT_FOUND, &format!("No test case at {}", path), keep_alive),
        },
    }
}

async fn respond(state: &ServerState, completion: &RequestCompletion, keep_alive: bool) -> Response<Body> {
    let outcome = match state.request_timeout {
        Some(limit) => match tokio::time::timeout(limit, completion.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                completion.try_fail(RequestFailure::new(
                    StatusCode::GATEWAY_TIMEOUT,
                    format!("request not completed within {}ms", limit.as_millis()),
                ));
                completion.wait().await
            }
        },
        None => completion.wait().await,
    };

    if state.trace_requests {
        for checkpoint in completion.checkpoints() {
            debug!("checkpoint {} at {}ms", checkpoint.label, checkpoint.elapsed_ms);
        }
    }

    match outcome {
        Ok(body) => build_json_response(StatusCode::OK, body, keep_alive),
        Err(failure) => build_error_response(failure.status, &failure.cause, keep_alive),
    }
}
