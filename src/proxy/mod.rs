//! Fan-out server: inbound surface, response aggregation and the upstream pools

pub mod completion;
pub mod handler;
pub mod server;
pub mod test_cases;
pub mod upstream;

// Re-exports
pub use completion::{Checkpoint, RequestCompletion};
pub use handler::{ResponseCollector, TestCase, TestCaseContext, TestCaseHandler};
pub use server::FanoutServer;
pub use test_cases::{Chained, FanOut, SingleCall, TestRegistry};
pub use upstream::{BackendCall, BackendClient, Connection, ConnectionPool, HostSelector};
