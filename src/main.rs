//! Main entry point for the Rust Fan-out Proxy

use clap::{Parser, Subcommand};
use rust_fanout_proxy::{
    cli::{ConfigArgs, ServerArgs},
    init_logger_with_config,
    log_error, log_info,
    runtime::run_with_runtime,
    ServerConfig,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rust-fanout-proxy")]
#[command(about = "Request-forwarding benchmark server with dedicated backend connection pools")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to ./config.yml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error), overrides the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the fan-out server
    #[command(name = "server")]
    Server(ServerArgs),

    /// Print the effective configuration as YAML
    #[command(name = "config")]
    Config(ConfigArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServerConfig::load_config(cli.config.as_deref())?;
    if cli.verbose {
        config.log_level = "debug".to_string();
    } else if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }

    match cli.command {
        Some(Commands::Config(args)) => args.execute(&config),
        Some(Commands::Server(args)) => serve(args, config),
        None => serve(ServerArgs::default(), config),
    }
}

fn serve(args: ServerArgs, config: ServerConfig) -> anyhow::Result<()> {
    init_logger_with_config(&config.log_level, config.logging.enable_file_logging, &config.logging.log_dir);

    log_info!("🚀 Starting Rust Fan-out Proxy");
    log_info!("📋 Version: {}", env!("CARGO_PKG_VERSION"));

    let runtime_config = config.runtime.clone();
    run_with_runtime(&runtime_config, async move {
        if let Err(e) = args.start_server(config).await {
            log_error!("Server error: {:#}", e);
            return Err(e);
        }
        Ok(())
    })
}
