#![forbid(unsafe_code)]

pub mod algebra;
pub mod buffer;
pub mod collaborator;
pub mod error;
pub mod test_harness;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the working set at crate root for convenience
pub use crate::algebra::{CommandSet, Document};
pub use crate::buffer::{
    Buffer, BufferIdentity, BufferOptions, CollaboratorStats, EditNotification, EditResponse,
    ListenerHandle, PROFILE_WINDOW, ProfileRecord, SiteId,
};
pub use crate::collaborator::{
    AsyncCollaborator, Collaborator, CollaboratorError, CollaboratorFactory, CollaboratorResult,
    CommandCollaborator, DEFAULT_PUSH_DELAY_FROM_IDLE, DEFAULT_PUSH_DELAY_FROM_START, PushDelays,
    SyncCollaborator,
};
