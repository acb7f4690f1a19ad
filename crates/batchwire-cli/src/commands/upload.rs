//! Batch upload command.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use batchwire_core::transport::DEFAULT_CHUNK_SIZE;
use batchwire_core::validation::DEFAULT_MAX_BYTES;
use batchwire_core::{
    Artifact, CoordinatorMessage, HttpTransport, LiveClient, LiveStatus, TaskEvent, TaskRegistry,
    TaskStatus, UploadCoordinator, UploadPolicy,
};
use batchwire_web::routes::session::SessionInfo;
use clap::Args;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::output;

#[derive(Args)]
pub struct UploadArgs {
    /// Documents to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Notification server URL
    #[arg(long, env = "BATCHWIRE_SERVER_URL", default_value = "http://127.0.0.1:3030")]
    pub server: String,

    /// Session token
    #[arg(long, env = "BATCHWIRE_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Upload chunk size in bytes (at most 1 MiB)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Largest document accepted locally, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    pub max_bytes: u64,

    /// Wait for analysis outcomes after uploading
    #[arg(long)]
    pub wait: bool,

    /// Seconds to wait for outcomes with --wait
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,

    /// Print the final task list as JSON
    #[arg(long)]
    pub json: bool,
}

/// Subset of the job lookup response used for reconciliation.
#[derive(Deserialize)]
struct JobStatus {
    event: TaskEvent,
}

/// Live connection feeding the coordinator, and its status reports.
struct LiveFeed {
    status: mpsc::UnboundedReceiver<LiveStatus>,
    handle: JoinHandle<()>,
}

pub async fn execute(args: UploadArgs) -> Result<()> {
    let mut artifacts = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let artifact = Artifact::from_path(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        artifacts.push(artifact);
    }

    let transport =
        Arc::new(HttpTransport::new(&args.server, &args.token).with_chunk_size(args.chunk_size));
    let policy = UploadPolicy {
        max_bytes: args.max_bytes,
        ..UploadPolicy::default()
    };
    let mut coordinator = UploadCoordinator::new(transport, policy);
    let client = reqwest::Client::new();

    // Bound before the first upload, so no outcome is published unseen.
    let mut live = if args.wait {
        Some(start_live(&client, &args, coordinator.inbox()).await?)
    } else {
        None
    };

    let ids = coordinator.enqueue_all(artifacts);
    let bars = TaskBars::new(&ids, coordinator.registry())?;

    loop {
        bars.render(coordinator.registry());
        let summary = coordinator.registry().summary();
        if summary.pending + summary.uploading == 0 {
            break;
        }
        coordinator.step().await;
    }

    if let Some(feed) = live.as_mut() {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout);
        let inbox = coordinator.inbox();

        while !coordinator.is_settled() {
            tokio::select! {
                _ = coordinator.step() => {}
                status = feed.status.recv() => match status {
                    Some(LiveStatus::Bound) => {
                        info!("Live connection restored, looking up missed outcomes");
                        for event in poll_outcomes(&client, &args, coordinator.registry()).await {
                            let _ = inbox.send(CoordinatorMessage::Delivered(event));
                        }
                    }
                    Some(LiveStatus::Disconnected { reason }) => {
                        warn!(reason = %reason, "Live connection lost, outcomes may be late");
                    }
                    Some(LiveStatus::Rejected { reason }) => {
                        bail!("server refused live events: {}", reason);
                    }
                    None => {
                        warn!("Live connection stopped");
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(timeout_secs = args.timeout, "Gave up waiting for analysis outcomes");
                    break;
                }
            }
            coordinator.pump();
            bars.render(coordinator.registry());
        }
    }
    if let Some(feed) = live {
        feed.handle.abort();
    }
    bars.finish(coordinator.registry());

    let tasks = coordinator.registry().tasks();
    if args.json {
        println!("{}", serde_json::to_string_pretty(tasks)?);
    } else {
        println!();
        output::print_tasks_table(tasks);
        println!();
        output::print_summary(&coordinator.registry().summary());
    }

    let failed = coordinator.registry().summary().failed;
    if failed > 0 {
        bail!("{} of {} documents failed", failed, tasks.len());
    }
    Ok(())
}

/// Open the live connection for the session's user and wait for its first report.
///
/// A refused bind is fatal. An unreachable server is not: uploads go ahead
/// and missed outcomes are looked up once the connection is bound.
async fn start_live(
    client: &reqwest::Client,
    args: &UploadArgs,
    inbox: mpsc::UnboundedSender<CoordinatorMessage>,
) -> Result<LiveFeed> {
    let session = fetch_session(client, args).await?;
    let live = LiveClient::new(&args.server, &args.token, &session.user_id)?;
    debug!(url = %live.ws_url(), user_id = %session.user_id, "Opening live connection");

    let (status_tx, mut status) = mpsc::unbounded_channel();
    let handle = live.spawn(inbox, status_tx);

    match status.recv().await {
        Some(LiveStatus::Bound) => {}
        Some(LiveStatus::Disconnected { reason }) => {
            warn!(reason = %reason, "No live connection yet, uploading anyway");
        }
        Some(LiveStatus::Rejected { reason }) => bail!("server refused live events: {}", reason),
        None => bail!("live connection stopped before binding"),
    }

    Ok(LiveFeed { status, handle })
}

/// The user behind the session token.
async fn fetch_session(client: &reqwest::Client, args: &UploadArgs) -> Result<SessionInfo> {
    let url = format!("{}/api/session", args.server.trim_end_matches('/'));
    let response = client
        .get(&url)
        .bearer_auth(&args.token)
        .send()
        .await
        .with_context(|| format!("cannot reach {}", args.server))?;
    if !response.status().is_success() {
        bail!("session rejected by server ({})", response.status());
    }
    Ok(response.json::<SessionInfo>().await?)
}

/// Ask the server for the outcome of every task still processing.
async fn poll_outcomes(
    client: &reqwest::Client,
    args: &UploadArgs,
    registry: &TaskRegistry,
) -> Vec<TaskEvent> {
    let base = args.server.trim_end_matches('/');
    let mut events = Vec::new();

    for task in registry.tasks().iter().filter(|t| t.status == TaskStatus::Processing) {
        let url = format!("{}/api/jobs/{}", base, task.id);
        let response = match client.get(&url).bearer_auth(&args.token).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Outcome lookup failed");
                continue;
            }
        };

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(task_id = %task.id, "Still processing");
            continue;
        }
        if !response.status().is_success() {
            warn!(task_id = %task.id, status_code = %response.status(), "Outcome lookup rejected");
            continue;
        }

        match response.json::<JobStatus>().await {
            Ok(status) => events.push(status.event),
            Err(e) => warn!(task_id = %task.id, error = %e, "Unreadable outcome"),
        }
    }

    events
}

/// One progress bar per task.
struct TaskBars {
    _multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl TaskBars {
    fn new(ids: &[String], registry: &TaskRegistry) -> Result<Self> {
        let multi = MultiProgress::new();
        let template = "  {prefix:<28} [{bar:30.cyan/blue}] {pos:>3}% {msg}";
        let style = ProgressStyle::with_template(template)?.progress_chars("=> ");

        let mut bars = HashMap::new();
        for id in ids {
            let bar = multi.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            if let Some(task) = registry.get(id) {
                bar.set_prefix(output::truncate(&task.label, 28));
            }
            bars.insert(id.clone(), bar);
        }

        Ok(Self {
            _multi: multi,
            bars,
        })
    }

    fn render(&self, registry: &TaskRegistry) {
        for (id, bar) in &self.bars {
            if let Some(task) = registry.get(id) {
                bar.set_position(u64::from(task.progress));
                bar.set_message(output::status_colored(task.status).to_string());
            }
        }
    }

    fn finish(&self, registry: &TaskRegistry) {
        self.render(registry);
        for bar in self.bars.values() {
            bar.finish();
        }
    }
}
