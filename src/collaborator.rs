//! Collaborator interfaces.
//!
//! A collaborator is an external agent attached to a buffer: a file
//! loader, a spell-checker, a language service, a remote peer. Three
//! shapes exist:
//! - an asynchronous producer/consumer pair ([`AsyncCollaborator`]),
//! - a synchronous edit function ([`SyncCollaborator`]),
//! - a push-only command stream ([`CommandCollaborator`]).
//!
//! The buffer owns its collaborators: once attached they live until the
//! buffer is destroyed, after every driver thread has been joined.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algebra::Document;
use crate::buffer::{BufferIdentity, EditNotification, EditResponse};

/// Default push delay measured from the last moment of user activity.
pub const DEFAULT_PUSH_DELAY_FROM_IDLE: Duration = Duration::from_millis(250);

/// Default push delay measured from when a notification became pending.
pub const DEFAULT_PUSH_DELAY_FROM_START: Duration = Duration::from_millis(50);

/// How long to hold a pending notification back from a collaborator.
///
/// A push happens only once the user has been idle for `from_idle` AND the
/// notification has aged `from_start`. Shutdown overrides both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushDelays {
    pub from_idle: Duration,
    pub from_start: Duration,
}

impl PushDelays {
    pub const ZERO: PushDelays = PushDelays {
        from_idle: Duration::ZERO,
        from_start: Duration::ZERO,
    };

    pub fn new(from_idle: Duration, from_start: Duration) -> Self {
        Self {
            from_idle,
            from_start,
        }
    }
}

impl Default for PushDelays {
    fn default() -> Self {
        Self {
            from_idle: DEFAULT_PUSH_DELAY_FROM_IDLE,
            from_start: DEFAULT_PUSH_DELAY_FROM_START,
        }
    }
}

/// Error raised by collaborator code, caught at the driver boundary.
///
/// A failing collaborator never stalls the document: its error is logged
/// under its name and only its own drivers exit.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Free-form failure description.
    #[error("{0}")]
    Failed(String),

    /// Any other error a collaborator implementation surfaces.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl CollaboratorError {
    pub fn failed(message: impl Into<String>) -> Self {
        CollaboratorError::Failed(message.into())
    }
}

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Asynchronous producer/consumer collaborator.
///
/// `push` and `pull` run on separate driver threads and may both block; a
/// slow collaborator stalls only its own drivers.
pub trait AsyncCollaborator<D: Document>: Send + Sync {
    fn name(&self) -> &str;

    /// Receive a buffer snapshot. Called from the push driver once the
    /// debounce delays have elapsed.
    fn push(&self, notification: EditNotification<D>) -> CollaboratorResult<()>;

    /// Block until this collaborator has a response to hand back.
    fn pull(&self) -> CollaboratorResult<EditResponse<D>>;

    fn push_delay_from_idle(&self) -> Duration {
        DEFAULT_PUSH_DELAY_FROM_IDLE
    }

    fn push_delay_from_start(&self) -> Duration {
        DEFAULT_PUSH_DELAY_FROM_START
    }
}

/// Synchronous collaborator: one `edit` call per observed notification.
pub trait SyncCollaborator<D: Document>: Send + Sync {
    fn name(&self) -> &str;

    /// Observe a snapshot and reply in one step.
    fn edit(&self, notification: EditNotification<D>) -> CollaboratorResult<EditResponse<D>>;

    fn push_delay_from_idle(&self) -> Duration {
        DEFAULT_PUSH_DELAY_FROM_IDLE
    }

    fn push_delay_from_start(&self) -> Duration {
        DEFAULT_PUSH_DELAY_FROM_START
    }
}

/// Command-stream collaborator: a producer that also mirrors every batch
/// committed to the buffer.
pub trait CommandCollaborator<D: Document>: Send + Sync {
    fn name(&self) -> &str;

    /// Block until the collaborator has a command batch to contribute.
    fn pull(&self) -> CollaboratorResult<D::Commands>;

    /// Receive a batch committed to the buffer, including batches this
    /// collaborator contributed itself. Invoked under the buffer lock;
    /// must not call back into the buffer.
    fn push(&self, updates: D::Commands);
}

/// A collaborator in whichever of the three shapes it takes.
#[derive(Clone)]
pub enum Collaborator<D: Document> {
    /// Producer/consumer pair driven by two threads.
    Pair(Arc<dyn AsyncCollaborator<D>>),
    /// Synchronous edit function driven by one thread.
    Edit(Arc<dyn SyncCollaborator<D>>),
    /// Command stream driven by one thread plus an internal listener.
    Commands(Arc<dyn CommandCollaborator<D>>),
}

impl<D: Document> Collaborator<D> {
    pub fn name(&self) -> &str {
        match self {
            Collaborator::Pair(c) => c.name(),
            Collaborator::Edit(c) => c.name(),
            Collaborator::Commands(c) => c.name(),
        }
    }

    /// The delays configured for this collaborator. Command streams are
    /// producer-only and carry no push delays.
    pub(crate) fn push_delays(&self) -> PushDelays {
        match self {
            Collaborator::Pair(c) => {
                PushDelays::new(c.push_delay_from_idle(), c.push_delay_from_start())
            }
            Collaborator::Edit(c) => {
                PushDelays::new(c.push_delay_from_idle(), c.push_delay_from_start())
            }
            Collaborator::Commands(_) => PushDelays::ZERO,
        }
    }
}

impl<D: Document> fmt::Debug for Collaborator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Collaborator::Pair(_) => "pair",
            Collaborator::Edit(_) => "edit",
            Collaborator::Commands(_) => "commands",
        };
        write!(f, "Collaborator({} {:?})", shape, self.name())
    }
}

/// Builds a collaborator for a specific buffer.
///
/// Factories replace a process-wide constructor registry: each buffer is
/// handed an explicit list and runs every factory once at construction.
pub trait CollaboratorFactory<D: Document>: Send {
    fn build(&self, identity: &BufferIdentity) -> Collaborator<D>;
}
