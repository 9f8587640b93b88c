//! Configuration inspection CLI command

use crate::config::settings::ServerConfig;
use anyhow::{Context, Result};
use clap::Args;

#[derive(Debug, Default, Args)]
pub struct ConfigArgs {
    /// Print the backend addresses resolved from the host list as well
    #[arg(long, default_value = "false")]
    pub resolve_hosts: bool,
}

impl ConfigArgs {
    /// Render the effective configuration (file + environment) as YAML
    pub fn render(&self, config: &ServerConfig) -> Result<String> {
        let mut rendered = serde_yaml::to_string(config).context("Failed to serialize configuration")?;

        if self.resolve_hosts {
            rendered.push_str("# resolved backend addresses\n");
            for address in config.backend.addresses() {
                rendered.push_str(&format!("#   {}\n", address));
            }
        }
        Ok(rendered)
    }

    pub fn execute(&self, config: &ServerConfig) -> Result<()> {
        print!("{}", self.render(config)?);
        Ok(())
    }
}
