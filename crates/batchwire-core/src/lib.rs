//! Batchwire Core Library
//!
//! Client-side task tracking for batch document uploads: the task registry,
//! the upload coordinator that drives each task, the wire events exchanged
//! with the notification server, the live event connection, and the HTTP
//! clients for both ends.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod live;
pub mod notifier;
pub mod task;
pub mod transport;
pub mod validation;

pub use coordinator::{CoordinatorMessage, ProgressSink, UploadCoordinator};
pub use error::{BatchwireError, BatchwireResult, LiveError, TransportError, ValidationError};
pub use events::{ClientMessage, JobFinished, JobOutcome, ServerMessage, TaskEvent};
pub use live::{LiveClient, LiveStatus};
pub use notifier::JobReporter;
pub use task::model::{ErrorKind, StatusUpdate, Task, TaskStatus};
pub use task::TaskRegistry;
pub use transport::{Artifact, HttpTransport, Transport};
pub use validation::{UploadPolicy, Validator};
