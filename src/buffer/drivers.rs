//! Per-collaborator driver loops.
//!
//! Each collaborator shape gets one or two dedicated threads translating
//! between the buffer's notification protocol and the collaborator's
//! interface. A collaborator failure is logged under its name and ends its
//! own drivers only; the buffer keeps serving everyone else.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::algebra::{CommandSet, Document};
use crate::collaborator::{AsyncCollaborator, CommandCollaborator, SyncCollaborator};

use super::core::{BufferCore, CollaboratorId};
use super::listener::ListenerHandle;

/// Records the driver's exit no matter how the loop ends, a panic in
/// collaborator code included. Shutdown must never wait on a collaborator
/// that can no longer produce edits.
struct ExitGuard<D: Document> {
    core: Arc<BufferCore<D>>,
    id: CollaboratorId,
    label: &'static str,
    name: String,
}

impl<D: Document> Drop for ExitGuard<D> {
    fn drop(&mut self) {
        self.core.driver_exited(self.id);
        debug!("{} driver for {} exited", self.label, self.name);
    }
}

/// Feed debounced notifications to an async collaborator until quiescence.
pub(crate) fn run_push<D: Document>(
    core: Arc<BufferCore<D>>,
    id: CollaboratorId,
    collaborator: Arc<dyn AsyncCollaborator<D>>,
) {
    let _guard = ExitGuard {
        core: core.clone(),
        id,
        label: "push",
        name: collaborator.name().to_string(),
    };
    let mut last_processed = 0u64;
    loop {
        let Some(notification) = core.next_notification(id, &mut last_processed) else {
            break;
        };
        if let Err(err) = collaborator.push(notification) {
            warn!(
                "collaborator {} failed during push: {err}",
                collaborator.name()
            );
            break;
        }
    }
}

/// Sink responses from an async collaborator until it declares done.
pub(crate) fn run_pull<D: Document>(
    core: Arc<BufferCore<D>>,
    id: CollaboratorId,
    collaborator: Arc<dyn AsyncCollaborator<D>>,
) {
    let _guard = ExitGuard {
        core: core.clone(),
        id,
        label: "pull",
        name: collaborator.name().to_string(),
    };
    loop {
        match collaborator.pull() {
            Ok(response) => {
                if !core.sink_response(id, response) {
                    break;
                }
            }
            Err(err) => {
                warn!(
                    "collaborator {} failed during pull: {err}",
                    collaborator.name()
                );
                break;
            }
        }
    }
}

/// One edit call per observed notification.
pub(crate) fn run_sync<D: Document>(
    core: Arc<BufferCore<D>>,
    id: CollaboratorId,
    collaborator: Arc<dyn SyncCollaborator<D>>,
) {
    let _guard = ExitGuard {
        core: core.clone(),
        id,
        label: "sync",
        name: collaborator.name().to_string(),
    };
    let mut last_processed = 0u64;
    loop {
        let Some(notification) = core.next_notification(id, &mut last_processed) else {
            break;
        };
        match collaborator.edit(notification) {
            Ok(response) => {
                if !core.sink_response(id, response) {
                    break;
                }
            }
            Err(err) => {
                warn!(
                    "collaborator {} failed during edit: {err}",
                    collaborator.name()
                );
                break;
            }
        }
    }
}

/// Pump a command stream into the buffer, mirroring every committed batch
/// back to the collaborator through an internal listener.
pub(crate) fn run_commands<D: Document>(
    core: Arc<BufferCore<D>>,
    id: CollaboratorId,
    collaborator: Arc<dyn CommandCollaborator<D>>,
) {
    let _guard = ExitGuard {
        core: core.clone(),
        id,
        label: "command",
        name: collaborator.name().to_string(),
    };
    let _listener = {
        let mirror = collaborator.clone();
        let listener_id = core.listen(
            |_| {},
            Box::new(move |commands: &D::Commands| mirror.push(commands.clone())),
        );
        ListenerHandle::new(Arc::downgrade(&core), listener_id)
    };

    loop {
        let commands = match collaborator.pull() {
            Ok(commands) => commands,
            Err(err) => {
                warn!(
                    "collaborator {} failed during pull: {err}",
                    collaborator.name()
                );
                break;
            }
        };
        core.update_state(Some(id), false, Some(&commands), |state| {
            if !commands.is_empty() {
                state.content = state.content.integrate(&commands);
            }
        });
        if core.is_shutdown() {
            break;
        }
    }
}
