//! Notification server command.

use anyhow::{Context, Result};
use batchwire_web::config::ServerConfig;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args)]
pub struct ServeArgs {
    /// TOML config file
    #[arg(short, long, env = "BATCHWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, env = "BATCHWIRE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "BATCHWIRE_HOST")]
    pub host: Option<String>,

    /// Shared secret expected on /internal endpoints
    #[arg(long, env = "BATCHWIRE_INTERNAL_TOKEN", hide_env_values = true)]
    pub internal_token: Option<String>,

    /// Analysis worker endpoint receiving uploaded documents
    #[arg(long, env = "BATCHWIRE_WORKER_URL")]
    pub worker_url: Option<String>,
}

impl ServeArgs {
    /// Load the config file, then apply flag and environment overrides.
    fn resolve(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(token) = self.internal_token {
            config.internal_token = token;
        }
        if self.worker_url.is_some() {
            config.worker_url = self.worker_url;
        }
        Ok(config)
    }
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = args.resolve()?;
    let addr = config.addr();

    println!();
    println!(
        "  {} {}",
        "Batchwire".cyan().bold(),
        "Notification Server".bold()
    );
    println!();
    println!("  {}     http://{}/api", "API".green(), addr);
    println!("  {}  ws://{}/ws", "WebSocket".green(), addr);
    println!(
        "  {}     {}",
        "Worker".green(),
        config.worker_url.as_deref().unwrap_or("none (jobs are dropped)")
    );
    println!("  {}   {}", "Sessions".green(), config.sessions.len());
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    batchwire_web::run_server(config).await?;

    Ok(())
}
