//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod report;
pub mod serve;
pub mod upload;

/// Batchwire - batch document uploads with live outcome notifications
#[derive(Parser)]
#[command(name = "batchwire")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the notification server
    Serve(serve::ServeArgs),

    /// Upload documents and track them until analysed
    Upload(upload::UploadArgs),

    /// Report a finished analysis job (worker side)
    Report(report::ReportArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve(args) => serve::execute(args).await,
            Commands::Upload(args) => upload::execute(args).await,
            Commands::Report(args) => report::execute(args).await,
        }
    }
}
