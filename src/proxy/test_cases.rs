//! Concrete benchmark scenarios and the registry that serves them by name

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::models::ServerStatus;
use crate::proxy::handler::{ResponseCollector, TestCase, TestCaseContext, TestCaseHandler};
use crate::proxy::upstream::BackendClient;
use crate::utils::{elapsed_ms, now};

const SLOT_TYPES: [&str; 5] = ["A", "B", "C", "D", "E"];

/// Mock backend path for one call
pub fn mock_path(kind: &str, num_items: u32, item_size: u32, delay_ms: u32, id: &str) -> String {
    format!(
        "/mock.json?type={}&numItems={}&itemSize={}&delay={}&id={}",
        kind, num_items, item_size, delay_ms, id
    )
}

/// One backend call; the response is wrapped as is
pub struct SingleCall;

impl TestCase for SingleCall {
    fn name(&self) -> &'static str {
        "single"
    }

    fn execute_test_case(&self, ctx: TestCaseContext) -> Result<()> {
        let collector = ResponseCollector::new(&ctx, 1);
        let call = ctx.client.dispatch(&ctx.id, &mock_path("A", 2, 50, 50, &ctx.id));
        collector.listen(0, call, |collector| {
            collector.try_succeed_composed();
        });
        Ok(())
    }
}

/// Up to five concurrent calls, complete once every slot is filled
pub struct FanOut {
    calls: usize,
}

impl FanOut {
    pub fn new(calls: usize) -> Result<Self> {
        if calls == 0 || calls > SLOT_TYPES.len() {
            return Err(Error::Config(format!(
                "fan-out call count must be between 1 and {}, got {}",
                SLOT_TYPES.len(),
                calls
            )));
        }
        Ok(Self { calls })
    }
}

impl TestCase for FanOut {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn execute_test_case(&self, ctx: TestCaseContext) -> Result<()> {
        let collector = ResponseCollector::new(&ctx, self.calls);
        for (index, kind) in SLOT_TYPES.iter().take(self.calls).enumerate() {
            let call = ctx.client.dispatch(&ctx.id, &mock_path(kind, 2, 50, 50, &ctx.id));
            collector.listen(index, call, |collector| {
                if collector.all_filled() {
                    collector.try_succeed_composed();
                }
            });
        }
        Ok(())
    }
}

/// Call A, then B and C concurrently once A has answered
pub struct Chained;

impl TestCase for Chained {
    fn name(&self) -> &'static str {
        "chained"
    }

    fn execute_test_case(&self, ctx: TestCaseContext) -> Result<()> {
        let collector = ResponseCollector::new(&ctx, 3);
        let first = ctx.client.dispatch(&ctx.id, &mock_path("A", 2, 50, 50, &ctx.id));

        let client = ctx.client.clone();
        let id = ctx.id.clone();
        collector.listen(0, first, move |collector| {
            for (index, kind) in [(1, "B"), (2, "C")] {
                let call = client.dispatch(&id, &mock_path(kind, 25, 30, 90, &id));
                collector.listen(index, call, |collector| {
                    if collector.all_filled() {
                        collector.try_succeed_composed();
                    }
                });
            }
        });
        Ok(())
    }
}

/// Test case handlers keyed by the name used in the inbound path
pub struct TestRegistry {
    handlers: HashMap<&'static str, TestCaseHandler>,
    started: Instant,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            started: Instant::now(),
        }
    }

    /// Registry with every built-in scenario sharing one backend client
    pub fn with_defaults(client: BackendClient) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(SingleCall), client.clone());
        registry.register(Arc::new(FanOut::new(SLOT_TYPES.len())?), client.clone());
        registry.register(Arc::new(Chained), client);
        Ok(registry)
    }

    pub fn register(&mut self, test_case: Arc<dyn TestCase>, client: BackendClient) {
        let handler = TestCaseHandler::new(test_case, client);
        self.handlers.insert(handler.name(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&TestCaseHandler> {
        self.handlers.get(name)
    }

    pub fn status(&self) -> ServerStatus {
        let mut test_cases: Vec<_> = self.handlers.values().map(TestCaseHandler::status).collect();
        test_cases.sort_by(|a, b| a.name.cmp(&b.name));
        ServerStatus {
            timestamp: now(),
            uptime_ms: elapsed_ms(self.started),
            test_cases,
        }
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestFailure;
    use crate::models::InboundRequest;
    use crate::proxy::completion::RequestCompletion;
    use crate::test_support::{spawn_backend, test_config, MockReply};
    use form_urlencoded::parse;
    use hyper::StatusCode;
    use serde_json::Value;
    use std::time::Duration;

    /// Echo the `type` query parameter back so slot order is visible
    fn echo_type(req: &hyper::Request<hyper::Body>) -> MockReply {
        let kind = req
            .uri()
            .query()
            .and_then(|q| parse(q.as_bytes()).find(|(k, _)| k == "type").map(|(_, v)| v.into_owned()))
            .unwrap_or_default();
        MockReply::json(format!(r#"{{"type":"{}"}}"#, kind))
    }

    async fn run(registry: &TestRegistry, name: &str, id: &str) -> std::result::Result<Value, RequestFailure> {
        let query = format!("id={}", id);
        let request = InboundRequest::new("GET", format!("/ws-java-netty/{}", name), Some(&query), true);
        let completion = RequestCompletion::new(false);
        registry.get(name).unwrap().process_request(&request, completion.clone());
        let body = tokio::time::timeout(Duration::from_secs(2), completion.wait())
            .await
            .unwrap()?;
        Ok(serde_json::from_slice(&body).unwrap())
    }

    fn types(composed: &Value) -> Vec<String> {
        composed["responses"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_mock_path_shape() {
        assert_eq!(
            mock_path("B", 25, 30, 90, "7"),
            "/mock.json?type=B&numItems=25&itemSize=30&delay=90&id=7"
        );
    }

    #[test]
    fn test_fanout_bounds() {
        assert!(FanOut::new(0).is_err());
        assert!(FanOut::new(6).is_err());
        assert!(FanOut::new(5).is_ok());
    }

    #[tokio::test]
    async fn test_builtin_scenarios_compose_in_slot_order() {
        let backend = spawn_backend(echo_type).await;
        let client = BackendClient::from_config(&test_config(&[&backend.address], 0, 8)).unwrap();
        let registry = TestRegistry::with_defaults(client).unwrap();

        let single = run(&registry, "single", "1").await.unwrap();
        assert_eq!(single["id"], "1");
        assert_eq!(types(&single), vec!["A"]);

        let fanout = run(&registry, "fanout", "2").await.unwrap();
        assert_eq!(types(&fanout), vec!["A", "B", "C", "D", "E"]);

        let chained = run(&registry, "chained", "3").await.unwrap();
        assert_eq!(types(&chained), vec!["A", "B", "C"]);
        assert_eq!(backend.hits(), 9);
    }

    #[tokio::test]
    async fn test_chained_stops_when_first_call_fails() {
        let backend = spawn_backend(|_| MockReply::status(StatusCode::NOT_FOUND)).await;
        let client = BackendClient::from_config(&test_config(&[&backend.address], 0, 2)).unwrap();
        let registry = TestRegistry::with_defaults(client).unwrap();

        let failure = run(&registry, "chained", "1").await.unwrap_err();
        assert_eq!(failure.status, StatusCode::NOT_FOUND);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.hits(), 1);
    }

    #[tokio::test]
    async fn test_status_lists_every_scenario() {
        let backend = spawn_backend(echo_type).await;
        let client = BackendClient::from_config(&test_config(&[&backend.address], 0, 2)).unwrap();
        let registry = TestRegistry::with_defaults(client).unwrap();
        run(&registry, "single", "1").await.unwrap();

        let status = registry.status();
        let names: Vec<_> = status.test_cases.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["chained", "fanout", "single"]);
        let single = status.test_cases.iter().find(|t| t.name == "single").unwrap();
        assert_eq!(single.request_recv_count, 1);
        assert_eq!(single.conn_pools.len(), 1);
    }
}
