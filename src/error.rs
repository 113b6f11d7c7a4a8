use thiserror::Error;

use crate::collaborator::CollaboratorError;

/// Crate-level convenience error.
///
/// Buffer operations themselves never fail: mutation, listening, and
/// shutdown are infallible by design. The only errors in the system come
/// from collaborator code, and those are caught at the driver boundary.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}
