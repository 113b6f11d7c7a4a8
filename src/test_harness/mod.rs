//! Deterministic collaborators and a toy document algebra for tests.
//!
//! Nothing here is used by the buffer itself; integration tests and the
//! colocated unit tests drive the real machinery through these pieces.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::algebra::{CommandSet, Document};
use crate::buffer::{EditNotification, EditResponse};
use crate::collaborator::{
    AsyncCollaborator, CollaboratorResult, CommandCollaborator, PushDelays, SyncCollaborator,
};

/// Install a fmt subscriber honoring `CHORUS_LOG`; safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("CHORUS_LOG"))
        .with_test_writer()
        .try_init();
}

/// Append-only document: the concatenation of every integrated fragment,
/// in integration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript(pub String);

/// Command batch for [`Transcript`]: fragments to append.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Appends(pub Vec<String>);

impl Appends {
    pub fn one(fragment: impl Into<String>) -> Self {
        Self(vec![fragment.into()])
    }
}

impl CommandSet for Appends {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Document for Transcript {
    type Commands = Appends;

    fn integrate(&self, commands: &Appends) -> Self {
        let mut next = self.0.clone();
        for fragment in &commands.0 {
            next.push_str(fragment);
        }
        Transcript(next)
    }
}

type SyncScript = Box<
    dyn FnMut(EditNotification<Transcript>) -> CollaboratorResult<EditResponse<Transcript>> + Send,
>;

/// Synchronous collaborator driven by a closure.
pub struct ScriptedSync {
    name: String,
    delays: PushDelays,
    script: Mutex<SyncScript>,
}

impl ScriptedSync {
    pub fn new(
        name: impl Into<String>,
        script: impl FnMut(EditNotification<Transcript>) -> CollaboratorResult<EditResponse<Transcript>>
        + Send
        + 'static,
    ) -> Arc<Self> {
        Self::with_delays(name, PushDelays::ZERO, script)
    }

    pub fn with_delays(
        name: impl Into<String>,
        delays: PushDelays,
        script: impl FnMut(EditNotification<Transcript>) -> CollaboratorResult<EditResponse<Transcript>>
        + Send
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            delays,
            script: Mutex::new(Box::new(script)),
        })
    }
}

impl SyncCollaborator<Transcript> for ScriptedSync {
    fn name(&self) -> &str {
        &self.name
    }

    fn edit(
        &self,
        notification: EditNotification<Transcript>,
    ) -> CollaboratorResult<EditResponse<Transcript>> {
        (self.script.lock().expect("script lock"))(notification)
    }

    fn push_delay_from_idle(&self) -> Duration {
        self.delays.from_idle
    }

    fn push_delay_from_start(&self) -> Duration {
        self.delays.from_start
    }
}

/// Async pair built on channels: the test feeds responses in and collects
/// pushed notifications out.
///
/// Once the response feed disconnects, `pull` hands back a final done
/// response: a closed feed means the test is finished with this
/// collaborator.
pub struct ChannelPair {
    name: String,
    delays: PushDelays,
    responses: Receiver<EditResponse<Transcript>>,
    pushed: Mutex<Vec<(Instant, EditNotification<Transcript>)>>,
}

impl ChannelPair {
    pub fn new(
        name: impl Into<String>,
        delays: PushDelays,
    ) -> (Arc<Self>, Sender<EditResponse<Transcript>>) {
        let (tx, rx) = unbounded();
        let pair = Arc::new(Self {
            name: name.into(),
            delays,
            responses: rx,
            pushed: Mutex::new(Vec::new()),
        });
        (pair, tx)
    }

    /// Every notification pushed so far, with its arrival time.
    pub fn pushed(&self) -> Vec<(Instant, EditNotification<Transcript>)> {
        self.pushed.lock().expect("pushed lock").clone()
    }

    pub fn push_count(&self) -> usize {
        self.pushed.lock().expect("pushed lock").len()
    }
}

impl AsyncCollaborator<Transcript> for ChannelPair {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, notification: EditNotification<Transcript>) -> CollaboratorResult<()> {
        self.pushed
            .lock()
            .expect("pushed lock")
            .push((Instant::now(), notification));
        Ok(())
    }

    fn pull(&self) -> CollaboratorResult<EditResponse<Transcript>> {
        match self.responses.recv() {
            Ok(response) => Ok(response),
            Err(_) => Ok(EditResponse::done()),
        }
    }

    fn push_delay_from_idle(&self) -> Duration {
        self.delays.from_idle
    }

    fn push_delay_from_start(&self) -> Duration {
        self.delays.from_start
    }
}

/// Command-stream collaborator fed by a channel; records every batch
/// mirrored back to it.
///
/// `pull` fails once the command feed disconnects, exercising the
/// graceful-exit path of the command driver. Disconnect the feed before
/// dropping the buffer, or the join will wait on a blocked `pull`.
pub struct CommandFeed {
    name: String,
    commands: Receiver<Appends>,
    mirrored: Mutex<Vec<Appends>>,
}

impl CommandFeed {
    pub fn new(name: impl Into<String>) -> (Arc<Self>, Sender<Appends>) {
        let (tx, rx) = unbounded();
        let feed = Arc::new(Self {
            name: name.into(),
            commands: rx,
            mirrored: Mutex::new(Vec::new()),
        });
        (feed, tx)
    }

    /// Every batch the buffer mirrored back, in commit order.
    pub fn mirrored(&self) -> Vec<Appends> {
        self.mirrored.lock().expect("mirrored lock").clone()
    }
}

impl CommandCollaborator<Transcript> for CommandFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn pull(&self) -> CollaboratorResult<Appends> {
        self.commands
            .recv()
            .map_err(|_| crate::collaborator::CollaboratorError::failed("command feed closed"))
    }

    fn push(&self, updates: Appends) {
        self.mirrored.lock().expect("mirrored lock").push(updates);
    }
}
