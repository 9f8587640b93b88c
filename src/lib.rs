//! Rust Fan-out Proxy - a request-forwarding benchmark server
//!
//! Inbound test-case requests fan out into one or more backend calls over
//! dedicated per-host connection pools; the backend responses are collected
//! into fixed slots and composed into a single reply.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use config::settings::ServerConfig;
pub use error::{Error, RequestFailure, Result};
pub use logging::{init_logger, init_logger_with_config, init_logger_with_env, log_debug, log_error, log_info, log_trace, log_warning};
pub use models::{BackendAddress, PoolStatus, ServerStatus};
pub use proxy::{BackendClient, ConnectionPool, FanoutServer, TestRegistry};

/// Runtime utilities for creating single-threaded vs multi-threaded Tokio runtimes
pub mod runtime {
    use crate::config::settings::RuntimeConfig;
    use anyhow::{Context, Result};
    use tokio::runtime::{Builder, Runtime};

    /// Create a Tokio runtime based on the configuration
    pub fn create_runtime(config: &RuntimeConfig) -> Result<Runtime> {
        match config.mode.as_str() {
            "single_threaded" => {
                tracing::info!("🧵 Initializing single-threaded runtime");
                Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create single-threaded runtime")
            }
            "multi_threaded" => {
                let mut builder = Builder::new_multi_thread();
                builder.enable_all();

                match config.worker_threads {
                    Some(threads) if threads > 0 => {
                        tracing::info!("🧵 Initializing multi-threaded runtime with {} event loops", threads);
                        builder.worker_threads(threads);
                    }
                    _ => tracing::info!("🧵 Initializing multi-threaded runtime with auto-detected CPU cores"),
                }

                builder.build().context("Failed to create multi-threaded runtime")
            }
            _ => {
                tracing::warn!("⚠️  Unknown runtime mode '{}', defaulting to multi-threaded", config.mode);
                Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create default multi-threaded runtime")
            }
        }
    }

    /// Execute an async function with the configured runtime
    pub fn run_with_runtime<F, T>(config: &RuntimeConfig, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let runtime = create_runtime(config)?;
        runtime.block_on(future)
    }

}
