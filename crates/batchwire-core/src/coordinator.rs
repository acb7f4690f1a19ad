//! Upload coordinator.
//!
//! Drives each enqueued artifact through `pending -> uploading -> processing`
//! and records transport failures. Every upload runs as its own spawned future
//! that only sends [`CoordinatorMessage`]s; the coordinator owns the
//! [`TaskRegistry`] and merges those messages, plus any events delivered by
//! the server, in arrival order.
//!
//! The move from `processing` to a terminal status only ever comes from a
//! delivered [`TaskEvent`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::TaskEvent;
use crate::task::model::{ErrorKind, StatusUpdate};
use crate::task::TaskRegistry;
use crate::transport::{Artifact, Transport};
use crate::validation::{UploadPolicy, Validator};

/// Inputs merged into the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorMessage {
    /// The transport acknowledged more of an upload.
    Progress { task_id: String, percent: u8 },
    /// The server accepted the whole artifact and handed it to the worker.
    Uploaded { task_id: String },
    /// The upload failed before reaching the worker.
    TransportFailed {
        task_id: String,
        message: String,
        kind: ErrorKind,
    },
    /// The server delivered a terminal event for a task.
    Delivered(TaskEvent),
}

/// Progress reporter handed to a [`Transport`] for one upload.
///
/// Only increases are forwarded, so a task's progress messages are
/// non-decreasing by construction.
pub struct ProgressSink {
    task_id: String,
    tx: mpsc::UnboundedSender<CoordinatorMessage>,
    last: u8,
}

impl ProgressSink {
    pub fn new(task_id: impl Into<String>, tx: mpsc::UnboundedSender<CoordinatorMessage>) -> Self {
        Self {
            task_id: task_id.into(),
            tx,
            last: 0,
        }
    }

    /// Report `acked` of `total` bytes acknowledged.
    pub fn report(&mut self, acked: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            (acked.min(total) * 100 / total) as u8
        };
        self.percent(percent);
    }

    /// Report a percentage directly.
    pub fn percent(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.last {
            self.last = percent;
            let _ = self.tx.send(CoordinatorMessage::Progress {
                task_id: self.task_id.clone(),
                percent,
            });
        }
    }

    pub fn last(&self) -> u8 {
        self.last
    }
}

/// Owns the task registry and drives uploads through a [`Transport`].
pub struct UploadCoordinator<T: Transport> {
    registry: TaskRegistry,
    transport: Arc<T>,
    validator: Validator,
    tx: mpsc::UnboundedSender<CoordinatorMessage>,
    rx: mpsc::UnboundedReceiver<CoordinatorMessage>,
}

impl<T: Transport> UploadCoordinator<T> {
    pub fn new(transport: Arc<T>, policy: UploadPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            registry: TaskRegistry::new(),
            transport,
            validator: Validator::new(policy),
            tx,
            rx,
        }
    }

    /// Sender for feeding delivered events into the same merge path.
    pub fn inbox(&self) -> mpsc::UnboundedSender<CoordinatorMessage> {
        self.tx.clone()
    }

    /// Create a task for `artifact` and start uploading it. Returns the task id.
    ///
    /// Artifacts that fail local validation are marked `error/validation`
    /// without any transport call. Must run inside a Tokio runtime.
    pub fn enqueue(&mut self, artifact: Artifact) -> String {
        let task_id = self.registry.create_task(&artifact.label);

        if let Err(e) = self.validator.validate(&artifact) {
            info!(task_id = %task_id, error = %e, "Upload rejected locally");
            self.registry
                .set_status(&task_id, StatusUpdate::failed(e.to_string(), ErrorKind::Validation));
            return task_id;
        }

        self.registry.set_status(&task_id, StatusUpdate::Uploading);

        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let mut sink = ProgressSink::new(id.clone(), tx.clone());
            let msg = match transport.upload(&id, &artifact, &mut sink).await {
                Ok(()) => {
                    debug!(task_id = %id, label = %artifact.label, "Upload complete");
                    CoordinatorMessage::Uploaded { task_id: id }
                }
                Err(e) => {
                    warn!(task_id = %id, label = %artifact.label, error = %e, "Upload failed");
                    CoordinatorMessage::TransportFailed {
                        task_id: id,
                        message: e.to_string(),
                        kind: e.error_kind(),
                    }
                }
            };
            let _ = tx.send(msg);
        });

        task_id
    }

    /// Enqueue a batch. Returns task ids in input order.
    pub fn enqueue_all(&mut self, artifacts: impl IntoIterator<Item = Artifact>) -> Vec<String> {
        artifacts.into_iter().map(|a| self.enqueue(a)).collect()
    }

    /// Merge one message into the registry.
    pub fn merge(&mut self, msg: CoordinatorMessage) {
        match msg {
            CoordinatorMessage::Progress { task_id, percent } => {
                self.registry.set_progress(&task_id, i64::from(percent));
            }
            CoordinatorMessage::Uploaded { task_id } => {
                self.registry.set_status(&task_id, StatusUpdate::Processing);
            }
            CoordinatorMessage::TransportFailed {
                task_id,
                message,
                kind,
            } => {
                self.registry
                    .set_status(&task_id, StatusUpdate::failed(message, kind));
            }
            CoordinatorMessage::Delivered(event) => event.apply(&mut self.registry),
        }
    }

    /// Merge every message already waiting, without blocking. Returns how many.
    pub fn pump(&mut self) -> usize {
        let mut merged = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.merge(msg);
            merged += 1;
        }
        merged
    }

    /// Wait for the next message and merge it.
    pub async fn step(&mut self) {
        if let Some(msg) = self.rx.recv().await {
            self.merge(msg);
        }
    }

    /// Merge messages until `done` holds for the registry.
    pub async fn run_until(&mut self, done: impl Fn(&TaskRegistry) -> bool) {
        self.pump();
        while !done(&self.registry) {
            self.step().await;
        }
    }

    /// Merge messages until no task is pending or uploading.
    pub async fn wait_uploads(&mut self) {
        self.run_until(|r| {
            let s = r.summary();
            s.pending + s.uploading == 0
        })
        .await
    }

    /// Merge messages until every task is terminal.
    ///
    /// Tasks whose worker never reports keep this waiting; callers bound it
    /// with a timeout.
    pub async fn wait_settled(&mut self) {
        self.run_until(|r| r.summary().in_flight() == 0).await
    }

    pub fn is_settled(&self) -> bool {
        self.registry.summary().in_flight() == 0
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Stop tracking a task. Its upload or job keeps running.
    pub fn remove_task(&mut self, id: &str) {
        self.registry.remove_task(id);
    }

    /// Drop every finished task, typically after the user acknowledged the batch.
    pub fn sweep_terminal(&mut self) -> usize {
        self.registry.sweep_terminal()
    }
}
