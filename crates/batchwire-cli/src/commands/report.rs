//! Worker-side job report command.

use anyhow::{bail, Context, Result};
use batchwire_core::{ErrorKind, JobReporter};
use clap::{Args, ValueEnum};
use colored::Colorize;

#[derive(Clone, Copy, ValueEnum)]
pub enum FailureKind {
    Validation,
    Server,
    Network,
}

impl From<FailureKind> for ErrorKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Validation => ErrorKind::Validation,
            FailureKind::Server => ErrorKind::Server,
            FailureKind::Network => ErrorKind::Network,
        }
    }
}

#[derive(Args)]
pub struct ReportArgs {
    /// User who owns the task
    #[arg(long)]
    pub owner: String,

    /// Task id the job was dispatched with
    #[arg(long)]
    pub task: String,

    /// Result payload as JSON, for a successful job
    #[arg(long, conflicts_with = "failure")]
    pub result: Option<String>,

    /// Error message, for a failed job
    #[arg(long)]
    pub failure: Option<String>,

    /// Error category of a failed job
    #[arg(long, value_enum, default_value = "server")]
    pub kind: FailureKind,

    /// Notification server URL
    #[arg(long, env = "BATCHWIRE_SERVER_URL", default_value = "http://127.0.0.1:3030")]
    pub server: String,

    /// Shared secret for /internal endpoints
    #[arg(long, env = "BATCHWIRE_INTERNAL_TOKEN", default_value = "", hide_env_values = true)]
    pub internal_token: String,
}

pub async fn execute(args: ReportArgs) -> Result<()> {
    let reporter = JobReporter::with_url(&args.server, &args.internal_token);

    match (args.result, args.failure) {
        (Some(raw), None) => {
            let result: serde_json::Value =
                serde_json::from_str(&raw).context("--result is not valid JSON")?;
            reporter.report_success(&args.owner, &args.task, result).await?;
            println!("{} Reported success for {}", "✓".green(), args.task.bold());
        }
        (None, Some(message)) => {
            let kind = ErrorKind::from(args.kind);
            reporter
                .report_failure(&args.owner, &args.task, &message, kind)
                .await?;
            println!(
                "{} Reported {} failure for {}",
                "✓".green(),
                kind.as_str(),
                args.task.bold()
            );
        }
        _ => bail!("pass exactly one of --result or --failure"),
    }

    Ok(())
}
