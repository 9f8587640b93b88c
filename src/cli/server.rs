//! Server management CLI commands

use crate::config::settings::ServerConfig;
use crate::proxy::{BackendClient, FanoutServer, TestRegistry};
use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default, Args)]
pub struct ServerArgs {
    /// Listening address, overrides the configuration file
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Comma-separated backend hosts, overrides the configuration file
    #[arg(long)]
    pub backend_hosts: Option<String>,

    /// Backend port, overrides the configuration file
    #[arg(long)]
    pub backend_port: Option<u16>,

    /// Skip eager connection warming at startup
    #[arg(long, default_value = "false")]
    pub no_warm: bool,
}

impl ServerArgs {
    /// Apply CLI overrides on top of the loaded configuration
    pub fn to_config(&self, mut config: ServerConfig) -> Result<ServerConfig> {
        debug!("Applying CLI overrides to ServerConfig");

        if let Some(addr) = &self.listen_addr {
            config.server.listen_addr = addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid listen address '{}'", addr))?;
        }
        if let Some(hosts) = &self.backend_hosts {
            config.backend.hosts = hosts.clone();
        }
        if let Some(port) = self.backend_port {
            config.backend.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Start the fan-out server with CLI configuration
    pub async fn start_server(&self, config: ServerConfig) -> Result<()> {
        let config = self.to_config(config)?;

        info!("📋 Server Configuration:");
        info!("   Listen: {}", config.server.listen_addr);
        info!("   Context path: {}", config.server.context_path);
        info!("   Backend hosts: {} (port {}, {:?} selection)",
              config.backend.hosts, config.backend.port, config.backend.host_selection);
        info!("   Backend base path: {}", config.backend.base_path);
        info!("   Pool: core {} / max {} connections per host",
              config.pool.core_connections, config.pool.max_connections);
        info!("   Worker pool size: {}", config.dispatcher.worker_pool_size);
        info!("   Log level: {}", config.log_level);

        let client = BackendClient::from_config(&config)?;
        if self.no_warm {
            info!("⏭️  Skipping eager connection warming");
        } else {
            let established = client.warm().await;
            info!("🔌 {} core connection(s) established", established);
        }

        let registry = Arc::new(TestRegistry::with_defaults(client.clone())?);
        let server = FanoutServer::new(&config.server, registry);
        let result = server.start().await;

        client.shutdown();
        result
    }
}
