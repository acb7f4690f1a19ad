//! Task domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BatchwireError, BatchwireResult};

/// A tracked upload: one per document the user submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub label: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task.
    pub fn new(id: String, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
            error_kind: None,
            result: None,
            created_at: Utc::now(),
        }
    }

    /// Apply a status update, keeping the outcome fields consistent with the status.
    pub(crate) fn apply(&mut self, update: StatusUpdate) {
        if update.status() == TaskStatus::Uploading && self.status != TaskStatus::Uploading {
            self.progress = 0;
        }
        self.status = update.status();
        self.error = None;
        self.error_kind = None;
        self.result = None;

        match update {
            StatusUpdate::Success { result } => {
                self.progress = 100;
                self.result = Some(result);
            }
            StatusUpdate::Error { message, kind } => {
                self.error = Some(message);
                self.error_kind = Some(kind);
            }
            StatusUpdate::Pending => self.progress = 0,
            StatusUpdate::Uploading | StatusUpdate::Processing => {}
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Uploading,
    Processing,
    Success,
    Error,
}

impl TaskStatus {
    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// `success` and `error` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Check if a task in this status accepts a move to `to`.
    ///
    /// A finished task stays finished. A failed task may only be requeued.
    pub fn can_transition_to(&self, to: &Self) -> bool {
        match (self, to) {
            (Self::Success, _) => false,
            (Self::Error, Self::Pending) => true,
            (Self::Error, Self::Uploading) => true,
            (Self::Error, _) => false,
            _ => true,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification, used to decide whether a retry makes sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input was refused. Retrying without changing it is pointless.
    Validation,
    /// The worker failed while processing.
    Server,
    /// The upload never reached the worker.
    Network,
}

impl ErrorKind {
    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Server => "server",
            Self::Network => "network",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target status of a `set_status` call, with the outcome it carries.
///
/// Only `Error` carries an error message and kind, only `Success` carries a
/// result. Non-terminal updates clear whatever outcome was recorded before.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Pending,
    Uploading,
    Processing,
    Success { result: serde_json::Value },
    Error { message: String, kind: ErrorKind },
}

impl StatusUpdate {
    /// Build an error update.
    pub fn failed(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self::Error {
            message: message.into(),
            kind,
        }
    }

    /// Build an update from loosely typed parts, as they arrive off the wire.
    ///
    /// `error` and `error_kind` must come together and only with `error`;
    /// `result` only with `success`.
    pub fn from_parts(
        status: TaskStatus,
        error: Option<String>,
        error_kind: Option<ErrorKind>,
        result: Option<serde_json::Value>,
    ) -> BatchwireResult<Self> {
        match (status, error, error_kind, result) {
            (TaskStatus::Error, Some(message), Some(kind), None) => {
                Ok(Self::Error { message, kind })
            }
            (TaskStatus::Error, _, _, _) => Err(BatchwireError::invalid_update(
                "error status requires both error and error_kind, and no result",
            )),
            (TaskStatus::Success, None, None, Some(result)) => Ok(Self::Success { result }),
            (TaskStatus::Success, _, _, _) => Err(BatchwireError::invalid_update(
                "success status requires a result and no error fields",
            )),
            (status, None, None, None) => Ok(match status {
                TaskStatus::Pending => Self::Pending,
                TaskStatus::Uploading => Self::Uploading,
                _ => Self::Processing,
            }),
            (status, _, _, _) => Err(BatchwireError::invalid_update(format!(
                "'{}' status does not accept outcome fields",
                status
            ))),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Pending => TaskStatus::Pending,
            Self::Uploading => TaskStatus::Uploading,
            Self::Processing => TaskStatus::Processing,
            Self::Success { .. } => TaskStatus::Success,
            Self::Error { .. } => TaskStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_parts_accepts_consistent_updates() {
        let update = StatusUpdate::from_parts(
            TaskStatus::Error,
            Some("boom".into()),
            Some(ErrorKind::Server),
            None,
        )
        .unwrap();
        assert_eq!(update, StatusUpdate::failed("boom", ErrorKind::Server));

        let update =
            StatusUpdate::from_parts(TaskStatus::Success, None, None, Some(json!({"score": 7})))
                .unwrap();
        assert_eq!(update.status(), TaskStatus::Success);

        let update = StatusUpdate::from_parts(TaskStatus::Processing, None, None, None).unwrap();
        assert_eq!(update, StatusUpdate::Processing);
    }

    #[test]
    fn test_from_parts_rejects_partial_error() {
        let network = Some(ErrorKind::Network);
        let message = Some("boom".to_string());
        assert!(StatusUpdate::from_parts(TaskStatus::Error, message, None, None).is_err());
        assert!(StatusUpdate::from_parts(TaskStatus::Error, None, network, None).is_err());
    }

    #[test]
    fn test_from_parts_rejects_misplaced_outcome() {
        assert!(StatusUpdate::from_parts(TaskStatus::Success, None, None, None).is_err());
        let result = Some(json!(1));
        assert!(StatusUpdate::from_parts(TaskStatus::Uploading, None, None, result).is_err());
        assert!(StatusUpdate::from_parts(
            TaskStatus::Processing,
            Some("x".into()),
            Some(ErrorKind::Server),
            None
        )
        .is_err());
    }

    #[test]
    fn test_terminal_transitions() {
        assert!(!TaskStatus::Success.can_transition_to(&TaskStatus::Processing));
        assert!(!TaskStatus::Error.can_transition_to(&TaskStatus::Success));
        assert!(TaskStatus::Error.can_transition_to(&TaskStatus::Uploading));
        assert!(TaskStatus::Processing.can_transition_to(&TaskStatus::Error));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TaskStatus::Processing).unwrap(), "\"processing\"");
        assert_eq!(serde_json::to_string(&ErrorKind::Network).unwrap(), "\"network\"");
    }
}
