//! Response aggregation for test cases
//!
//! A [`TestCaseHandler`] admits an inbound request, keeps the per-test-case
//! counters, and hands the request to its [`TestCase`]. The test case issues
//! backend calls and wires each one into a [`ResponseCollector`] slot; the
//! collector drives the request's [`RequestCompletion`].

use hyper::StatusCode;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{Error, RequestFailure, Result};
use crate::models::{BackendPayload, BackendReply, InboundRequest, TestCaseStatus};
use crate::proxy::completion::RequestCompletion;
use crate::proxy::upstream::{BackendCall, BackendClient};
use crate::utils::{log_test_failure, log_test_success};

/// Everything a test case needs to serve one inbound request
#[derive(Clone)]
pub struct TestCaseContext {
    pub id: String,
    pub keep_alive: bool,
    pub client: BackendClient,
    pub completion: RequestCompletion,
}

/// One benchmark scenario.
///
/// `execute_test_case` must not block: it issues backend calls and returns,
/// leaving the completion to the collector listeners. An `Err` means the
/// scenario could not even be started.
pub trait TestCase: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn execute_test_case(&self, ctx: TestCaseContext) -> Result<()>;
}

/// Fixed set of result slots for one inbound request
pub struct ResponseCollector {
    id: String,
    slots: Vec<OnceLock<BackendPayload>>,
    completion: RequestCompletion,
}

impl ResponseCollector {
    pub fn new(ctx: &TestCaseContext, slot_count: usize) -> Arc<Self> {
        Arc::new(Self {
            id: ctx.id.clone(),
            slots: (0..slot_count).map(|_| OnceLock::new()).collect(),
            completion: ctx.completion.clone(),
        })
    }

    /// Wire a pending backend call to slot `index`.
    ///
    /// `on_response_received` runs after the slot has been filled with a
    /// parsed payload; it decides whether the request is complete.
    pub fn listen<F>(self: &Arc<Self>, index: usize, call: BackendCall, on_response_received: F)
    where
        F: FnOnce(&Arc<ResponseCollector>) + Send + 'static,
    {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let result = call.await;
            if collector.completion.is_done() {
                debug!(request_id = %collector.id, "Slot {} completed after the request was already resolved", index);
            }
            match collector.accept(index, result) {
                Ok(()) => on_response_received(&collector),
                Err(failure) => {
                    collector.completion.try_fail(failure);
                }
            }
        });
    }

    fn accept(&self, index: usize, result: Result<BackendReply>) -> std::result::Result<(), RequestFailure> {
        self.completion.checkpoint(&format!("slot-{}", index));
        let reply = result.map_err(|e| match e {
            Error::PoolExhausted { .. } => RequestFailure::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            other => RequestFailure::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;

        if reply.status != StatusCode::OK {
            return Err(RequestFailure::from(Error::BackendStatus(reply.status)));
        }

        let payload = BackendPayload::from_json(&reply.body)
            .map_err(|e| RequestFailure::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| RequestFailure::new(StatusCode::INTERNAL_SERVER_ERROR, format!("no slot {}", index)))?;
        if slot.set(payload).is_err() {
            return Err(RequestFailure::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("slot {} filled twice", index),
            ));
        }
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slot(&self, index: usize) -> Option<&BackendPayload> {
        self.slots.get(index).and_then(OnceLock::get)
    }

    pub fn all_filled(&self) -> bool {
        self.slots.iter().all(|slot| slot.get().is_some())
    }

    /// Compose the filled slots into the final payload and resolve the request
    pub fn try_succeed_composed(&self) -> bool {
        let responses: Vec<_> = self.slots.iter().filter_map(OnceLock::get).collect();
        match serde_json::to_vec(&json!({ "id": self.id, "responses": responses })) {
            Ok(body) => self.completion.try_succeed(body.into()),
            Err(e) => self.completion.try_fail(Error::from(e)),
        }
    }
}

#[derive(Default)]
struct TestCaseStats {
    request_recv_count: AtomicU64,
    inflight: AtomicU64,
    errors: AtomicU64,
}

/// Admission, counters and status around one [`TestCase`]
#[derive(Clone)]
pub struct TestCaseHandler {
    test_case: Arc<dyn TestCase>,
    client: BackendClient,
    stats: Arc<TestCaseStats>,
}

impl TestCaseHandler {
    pub fn new(test_case: Arc<dyn TestCase>, client: BackendClient) -> Self {
        Self {
            test_case,
            client,
            stats: Arc::new(TestCaseStats::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.test_case.name()
    }

    /// Start serving `request`. The outcome arrives through `completion`.
    pub fn process_request(&self, request: &InboundRequest, completion: RequestCompletion) {
        self.stats.request_recv_count.fetch_add(1, Ordering::Relaxed);
        completion.checkpoint("received");

        let Some(id) = request.param("id") else {
            completion.try_fail(Error::BadRequest("missing required query parameter 'id'".to_string()));
            return;
        };

        self.stats.inflight.fetch_add(1, Ordering::AcqRel);
        let stats = Arc::clone(&self.stats);
        let observer = completion.clone();
        let name = self.name();
        let request_id = id.to_string();
        tokio::spawn(async move {
            let outcome = observer.wait().await;
            stats.inflight.fetch_sub(1, Ordering::AcqRel);
            match outcome {
                Ok(_) => log_test_success(name, &request_id, StatusCode::OK, observer.elapsed_ms()),
                Err(failure) => log_test_failure(name, &request_id, observer.elapsed_ms(), &failure),
            }
        });

        let ctx = TestCaseContext {
            id: id.to_string(),
            keep_alive: request.keep_alive,
            client: self.client.clone(),
            completion: completion.clone(),
        };

        if let Err(e) = self.test_case.execute_test_case(ctx) {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            completion.try_fail(RequestFailure::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    }

    pub fn status(&self) -> TestCaseStatus {
        TestCaseStatus {
            name: self.name().to_string(),
            inflight_tests: self.stats.inflight.load(Ordering::Acquire),
            request_recv_count: self.stats.request_recv_count.load(Ordering::Relaxed),
            tests_with_errors: self.stats.errors.load(Ordering::Relaxed),
            conn_pools: self.client.pool_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{spawn_backend, test_config, wait_until, MockBackend, MockReply};
    use serde_json::Value;
    use std::time::Duration;

    /// Issues one call per listed path and succeeds once every slot is filled
    struct Paths(Vec<&'static str>);

    impl TestCase for Paths {
        fn name(&self) -> &'static str {
            "paths"
        }

        fn execute_test_case(&self, ctx: TestCaseContext) -> Result<()> {
            let collector = ResponseCollector::new(&ctx, self.0.len());
            for (index, path) in self.0.iter().enumerate() {
                let call = ctx.client.dispatch(&ctx.id, path);
                collector.listen(index, call, |collector| {
                    if collector.all_filled() {
                        collector.try_succeed_composed();
                    }
                });
            }
            Ok(())
        }
    }

    struct Broken;

    impl TestCase for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn execute_test_case(&self, _ctx: TestCaseContext) -> Result<()> {
            Err(Error::Internal("cannot start".to_string()))
        }
    }

    fn handler_for(backend: &MockBackend, max: usize, test_case: impl TestCase) -> TestCaseHandler {
        let client = BackendClient::from_config(&test_config(&[&backend.address], 0, max)).unwrap();
        TestCaseHandler::new(Arc::new(test_case), client)
    }

    async fn run(handler: &TestCaseHandler, query: Option<&str>) -> std::result::Result<bytes::Bytes, RequestFailure> {
        let request = InboundRequest::new("GET", "/ws-java-netty/paths", query, true);
        let completion = RequestCompletion::new(false);
        handler.process_request(&request, completion.clone());
        tokio::time::timeout(Duration::from_secs(2), completion.wait())
            .await
            .expect("request never completed")
    }

    #[tokio::test]
    async fn test_missing_id_is_bad_request_without_backend_calls() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let handler = handler_for(&backend, 2, Paths(vec!["/mock.json"]));

        let failure = run(&handler, Some("other=1")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::BAD_REQUEST);
        assert_eq!(backend.hits(), 0);
        assert_eq!(handler.status().inflight_tests, 0);
        assert_eq!(handler.status().request_recv_count, 1);
    }

    #[tokio::test]
    async fn test_single_success_is_composed() {
        let backend = spawn_backend(|_| MockReply::json(r#"{"a":1}"#)).await;
        let handler = handler_for(&backend, 2, Paths(vec!["/mock.json"]));

        let body = run(&handler, Some("id=42")).await.unwrap();
        let composed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(composed["id"], "42");
        assert_eq!(composed["responses"][0]["a"], 1);
        assert!(wait_until(|| handler.status().inflight_tests == 0).await);
    }

    #[tokio::test]
    async fn test_backend_status_is_carried_through() {
        let backend = spawn_backend(|_| MockReply::status(StatusCode::SERVICE_UNAVAILABLE)).await;
        let handler = handler_for(&backend, 2, Paths(vec!["/mock.json"]));

        let failure = run(&handler, Some("id=1")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_malformed_and_empty_payloads_are_internal_errors() {
        let backend = spawn_backend(|req| match req.uri().path() {
            "/ws-backend-mock/broken" => MockReply::json("{\"a\":"),
            _ => MockReply::json(""),
        })
        .await;

        let handler = handler_for(&backend, 2, Paths(vec!["/broken"]));
        let failure = run(&handler, Some("id=1")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::INTERNAL_SERVER_ERROR);

        let handler = handler_for(&backend, 2, Paths(vec!["/empty"]));
        let failure = run(&handler, Some("id=2")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_is_service_unavailable() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let handler = handler_for(&backend, 1, Paths(vec!["/mock.json"]));

        let _held = handler.client.pools()[0].acquire().await.unwrap();
        let failure = run(&handler, Some("id=1")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::SERVICE_UNAVAILABLE);
        // Pool failures are not setup errors
        assert_eq!(handler.status().tests_with_errors, 0);
    }

    #[tokio::test]
    async fn test_failure_wins_over_partial_success_in_either_order() {
        let backend = spawn_backend(|req| match req.uri().path() {
            "/ws-backend-mock/fast-ok" => MockReply::json(r#"{"ok":true}"#),
            "/ws-backend-mock/slow-ok" => MockReply::json(r#"{"ok":true}"#).delayed(100),
            "/ws-backend-mock/fast-fail" => MockReply::status(StatusCode::BAD_GATEWAY),
            _ => MockReply::status(StatusCode::BAD_GATEWAY).delayed(100),
        })
        .await;

        let handler = handler_for(&backend, 4, Paths(vec!["/fast-ok", "/slow-fail"]));
        let failure = run(&handler, Some("id=1")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::BAD_GATEWAY);

        let handler = handler_for(&backend, 4, Paths(vec!["/slow-ok", "/fast-fail"]));
        let failure = run(&handler, Some("id=2")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_setup_error_counts_once() {
        let backend = spawn_backend(|_| MockReply::json("{}")).await;
        let handler = handler_for(&backend, 1, Broken);

        let failure = run(&handler, Some("id=1")).await.unwrap_err();
        assert_eq!(failure.status, StatusCode::INTERNAL_SERVER_ERROR);
        let status = handler.status();
        assert_eq!(status.tests_with_errors, 1);
        assert!(wait_until(|| handler.status().inflight_tests == 0).await);
    }
}
