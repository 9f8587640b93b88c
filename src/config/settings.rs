//! Fan-out server configuration settings

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use anyhow::{Context, Result};

use crate::models::BackendAddress;

/// Main configuration for the fan-out server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Log level configuration
    pub log_level: String,

    /// Inbound server configuration
    pub server: InboundConfig,

    /// Backend (mock service) configuration
    pub backend: BackendConfig,

    /// Dedicated connection pool configuration
    pub pool: PoolConfig,

    /// Backend call dispatcher configuration
    pub dispatcher: DispatcherConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Inbound server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundConfig {
    /// Server listening address
    pub listen_addr: SocketAddr,

    /// Path prefix under which test cases are served
    pub context_path: String,

    /// Watchdog that force-fails an inbound request, in milliseconds (0 = disabled)
    pub request_timeout_ms: u64,

    /// Record tracing checkpoints on each inbound request
    pub trace_requests: bool,
}

/// How a backend host is picked for each call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostSelection {
    Random,
    RoundRobin,
}

/// Backend service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Comma-separated backend host list; an entry may carry its own `:port`
    pub hosts: String,

    /// Backend port for hosts listed without one
    pub port: u16,

    /// Path prefix prepended to every backend call
    pub base_path: String,

    /// Host selection policy
    pub host_selection: HostSelection,
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections established eagerly at startup
    pub core_connections: usize,

    /// Hard cap on live connections per backend address
    pub max_connections: usize,

    /// TCP connect timeout in milliseconds (0 = disabled)
    pub connect_timeout_ms: u64,

    /// Timeout for one request/response exchange in milliseconds (0 = disabled)
    pub socket_timeout_ms: u64,

    /// Timeout for obtaining a connection from the pool in milliseconds (0 = disabled)
    pub connection_request_timeout_ms: u64,
}

/// Backend call dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum concurrently executing backend exchanges
    pub worker_pool_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to a daily-rolling file
    pub enable_file_logging: bool,

    /// Directory for log files
    pub log_dir: String,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime mode: "single_threaded" or "multi_threaded"
    pub mode: String,

    /// Number of event-loop threads for multi-threaded mode (None = auto-detect CPU cores)
    pub worker_threads: Option<usize>,
}

impl Default for InboundConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            context_path: "/ws-java-netty".to_string(),
            request_timeout_ms: 0,
            trace_requests: false,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            hosts: "localhost".to_string(),
            port: 8989,
            base_path: "/ws-backend-mock".to_string(),
            host_selection: HostSelection::Random,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_connections: 10,
            max_connections: 100,
            connect_timeout_ms: 1000,
            socket_timeout_ms: 10000,
            connection_request_timeout_ms: 1000,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 200,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_file_logging: false,
            log_dir: "logs".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "multi_threaded".to_string(),
            worker_threads: None,
        }
    }
}

impl BackendConfig {
    /// One address per configured host, in configuration order
    pub fn addresses(&self) -> Vec<BackendAddress> {
        self.hosts
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|entry| match entry.rsplit_once(':') {
                Some((host, port)) => match port.parse() {
                    Ok(port) => BackendAddress::new(host, port),
                    Err(_) => BackendAddress::new(entry, self.port),
                },
                None => BackendAddress::new(entry, self.port),
            })
            .collect()
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: ServerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load configuration from a YAML file (if present) with environment variable overrides
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let default_path = Path::new("config.yml");

        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None if default_path.exists() => Self::from_yaml_file(default_path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Override settings from environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.log_level = log_level;
        }

        if let Ok(addr) = std::env::var("WS_SERVER_LISTEN_ADDR") {
            if let Ok(addr) = addr.parse() {
                self.server.listen_addr = addr;
            }
        }

        if let Ok(path) = std::env::var("WS_SERVER_CONTEXT_PATH") {
            self.server.context_path = path;
        }

        if let Ok(timeout) = std::env::var("WS_SERVER_REQUEST_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.server.request_timeout_ms = timeout;
            }
        }

        if let Ok(trace) = std::env::var("WS_SERVER_TRACE_REQUESTS") {
            self.server.trace_requests = trace.to_lowercase() == "true";
        }

        // Backend settings
        if let Ok(hosts) = std::env::var("WS_BACKEND_HOST") {
            self.backend.hosts = hosts;
        }

        if let Ok(port) = std::env::var("WS_BACKEND_PORT") {
            if let Ok(port) = port.parse() {
                self.backend.port = port;
            }
        }

        if let Ok(path) = std::env::var("WS_BACKEND_CONTEXT_PATH") {
            self.backend.base_path = path;
        }

        if let Ok(selection) = std::env::var("WS_BACKEND_HOST_SELECTION") {
            match selection.to_lowercase().as_str() {
                "random" => self.backend.host_selection = HostSelection::Random,
                "round_robin" => self.backend.host_selection = HostSelection::RoundRobin,
                _ => {}
            }
        }

        // Pool settings
        if let Ok(core) = std::env::var("WS_CLIENT_CORE_CONNECTIONS") {
            if let Ok(core) = core.parse() {
                self.pool.core_connections = core;
            }
        }

        if let Ok(max) = std::env::var("WS_CLIENT_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                self.pool.max_connections = max;
            }
        }

        if let Ok(timeout) = std::env::var("WS_CLIENT_CONNECT_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.pool.connect_timeout_ms = timeout;
            }
        }

        if let Ok(timeout) = std::env::var("WS_CLIENT_SOCKET_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.pool.socket_timeout_ms = timeout;
            }
        }

        if let Ok(timeout) = std::env::var("WS_CLIENT_CONNECTION_REQUEST_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.pool.connection_request_timeout_ms = timeout;
            }
        }

        if let Ok(size) = std::env::var("WS_BACKEND_REQUEST_THREAD_POOL_SIZE") {
            if let Ok(size) = size.parse() {
                self.dispatcher.worker_pool_size = size;
            }
        }

        // Runtime and logging settings
        if let Ok(mode) = std::env::var("WS_RUNTIME_MODE") {
            self.runtime.mode = mode;
        }

        if let Ok(threads) = std::env::var("WS_SERVER_EVENT_LOOP_COUNT") {
            if let Ok(threads) = threads.parse() {
                self.runtime.worker_threads = Some(threads);
            }
        }

        if let Ok(enable) = std::env::var("WS_ENABLE_FILE_LOGGING") {
            self.logging.enable_file_logging = enable.to_lowercase() == "true";
        }
    }

    /// Reject settings the pool and dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            anyhow::bail!("pool.max_connections must be greater than zero");
        }
        if self.pool.core_connections > self.pool.max_connections {
            anyhow::bail!(
                "Core connection count ({}) can not be more than max connections ({})",
                self.pool.core_connections,
                self.pool.max_connections
            );
        }
        if self.backend.addresses().is_empty() {
            anyhow::bail!("backend.hosts must name at least one host");
        }
        if self.dispatcher.worker_pool_size == 0 {
            anyhow::bail!("dispatcher.worker_pool_size must be greater than zero");
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: InboundConfig::default(),
            backend: BackendConfig::default(),
            pool: PoolConfig::default(),
            dispatcher: DispatcherConfig::default(),
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
