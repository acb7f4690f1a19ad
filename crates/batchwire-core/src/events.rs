//! Events exchanged between the analysis worker, the notification server
//! and connected clients.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::task::model::{ErrorKind, StatusUpdate, TaskStatus};
use crate::task::TaskRegistry;

/// Terminal outcome of an analysis job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutcome {
    Success { result: serde_json::Value },
    Failure { message: String, kind: ErrorKind },
}

/// "Job finished" fact reported by the analysis worker, exactly once per task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobFinished {
    pub owner_id: String,
    pub task_id: String,
    pub outcome: JobOutcome,
}

/// Update delivered to every connection of a task's owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub status: TaskStatus,
    /// Opaque worker payload. A present `null` is still a result.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

impl From<&JobFinished> for TaskEvent {
    fn from(fact: &JobFinished) -> Self {
        match &fact.outcome {
            JobOutcome::Success { result } => Self {
                task_id: fact.task_id.clone(),
                status: TaskStatus::Success,
                result: Some(result.clone()),
                error: None,
                error_kind: None,
            },
            JobOutcome::Failure { message, kind } => Self {
                task_id: fact.task_id.clone(),
                status: TaskStatus::Error,
                result: None,
                error: Some(message.clone()),
                error_kind: Some(*kind),
            },
        }
    }
}

impl TaskEvent {
    /// Merge this event into the registry.
    ///
    /// Malformed events are logged and dropped; unknown task ids are no-ops.
    pub fn apply(self, registry: &mut TaskRegistry) {
        let task_id = self.task_id;
        match StatusUpdate::from_parts(self.status, self.error, self.error_kind, self.result) {
            Ok(update) => registry.set_status(&task_id, update),
            Err(e) => warn!(task_id = %task_id, error = %e, "Dropping malformed task event"),
        }
    }
}

/// Frames sent from the server to a connected client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// A task owned by the bound user reached a terminal status.
    Task(TaskEvent),
    /// The bind request was accepted.
    Bound { owner_id: String },
    /// The bind request was refused; the connection stays unbound.
    BindRejected { reason: String },
}

/// Frames sent from a client to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Ask to receive events addressed to `owner_id`.
    Bind { owner_id: String },
}
