//! The buffer: a shared, versioned document arbitrating between
//! concurrent collaborators.
//!
//! Provides:
//! - serialized mutation with a monotonic version counter
//! - per-collaborator driver threads with idle-based push debouncing
//! - synchronous listeners observing every committed command batch
//! - orderly shutdown once every collaborator has drained

mod core;
mod drivers;
mod edit;
mod identity;
mod listener;
mod stats;

pub use edit::{EditNotification, EditResponse};
pub use identity::{BufferIdentity, SiteId};
pub use listener::ListenerHandle;
pub use stats::{CollaboratorStats, PROFILE_WINDOW, ProfileRecord};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::algebra::Document;
use crate::collaborator::{
    AsyncCollaborator, Collaborator, CollaboratorFactory, CommandCollaborator, SyncCollaborator,
};

use self::core::BufferCore;

/// Construction options: the identity of the buffer instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BufferOptions {
    /// Site identifier; a fresh random site when absent.
    pub site: Option<SiteId>,
    /// File this buffer mirrors, if any.
    pub filename: Option<PathBuf>,
}

/// The shared, versioned document.
///
/// A buffer owns its collaborators and the driver threads that serve them.
/// Mutations are serialized through a single write lease; every commit
/// bumps the version counter and refreshes the quiescence witness set.
/// Dropping the buffer commits shutdown and joins every driver thread.
pub struct Buffer<D: Document> {
    core: Arc<BufferCore<D>>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: Document> Buffer<D> {
    pub fn new(content: D) -> Self {
        Self::with_options(content, BufferOptions::default())
    }

    pub fn with_options(content: D, options: BufferOptions) -> Self {
        let identity = BufferIdentity {
            site: options.site.unwrap_or_else(SiteId::random),
            filename: options.filename,
        };
        Self {
            core: Arc::new(BufferCore::new(content, identity)),
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// Construct a buffer and attach one collaborator per factory, in
    /// order. The factory list is explicit: there is no process-wide
    /// collaborator registry.
    pub fn with_factories(
        content: D,
        options: BufferOptions,
        factories: &[Box<dyn CollaboratorFactory<D>>],
    ) -> Self {
        let buffer = Self::with_options(content, options);
        for factory in factories {
            buffer.add_collaborator(factory.build(buffer.identity()));
        }
        buffer
    }

    /// Attach a collaborator and start its driver thread(s).
    ///
    /// Ignored, with a warning, once shutdown has been committed.
    pub fn add_collaborator(&self, collaborator: Collaborator<D>) {
        match collaborator {
            Collaborator::Pair(c) => self.add_pair(c),
            Collaborator::Edit(c) => self.add_edit(c),
            Collaborator::Commands(c) => self.add_commands(c),
        }
    }

    /// Attach an asynchronous producer/consumer pair: one push driver, one
    /// pull driver.
    pub fn add_pair(&self, collaborator: Arc<dyn AsyncCollaborator<D>>) {
        let Some(id) = self.core.register(Collaborator::Pair(collaborator.clone())) else {
            return;
        };
        let push = {
            let core = self.core.clone();
            let collaborator = collaborator.clone();
            std::thread::spawn(move || drivers::run_push(core, id, collaborator))
        };
        let pull = {
            let core = self.core.clone();
            std::thread::spawn(move || drivers::run_pull(core, id, collaborator))
        };
        self.track(push);
        self.track(pull);
    }

    /// Attach a synchronous collaborator: one driver calling `edit` per
    /// observed notification.
    pub fn add_edit(&self, collaborator: Arc<dyn SyncCollaborator<D>>) {
        let Some(id) = self.core.register(Collaborator::Edit(collaborator.clone())) else {
            return;
        };
        let core = self.core.clone();
        self.track(std::thread::spawn(move || {
            drivers::run_sync(core, id, collaborator)
        }));
    }

    /// Attach a command-stream collaborator: one driver pumping its
    /// batches in, plus an internal listener mirroring every committed
    /// batch back out.
    pub fn add_commands(&self, collaborator: Arc<dyn CommandCollaborator<D>>) {
        let Some(id) = self
            .core
            .register(Collaborator::Commands(collaborator.clone()))
        else {
            return;
        };
        let core = self.core.clone();
        self.track(std::thread::spawn(move || {
            drivers::run_commands(core, id, collaborator)
        }));
    }

    /// Inject a command batch from outside any collaborator: publish it to
    /// listeners, then commit its integration.
    pub fn push_changes(&self, commands: D::Commands) {
        self.core.push_changes(commands);
    }

    /// Register a listener. `initial` observes the current content and
    /// `update` every subsequently committed batch, with no gap between
    /// the two. `update` runs under the buffer lock and must not call back
    /// into the buffer. Dropping the handle unregisters.
    pub fn listen(
        &self,
        initial: impl FnOnce(&D),
        update: impl FnMut(&D::Commands) + Send + 'static,
    ) -> ListenerHandle<D> {
        let id = self.core.listen(initial, Box::new(update));
        ListenerHandle::new(Arc::downgrade(&self.core), id)
    }

    pub fn content_snapshot(&self) -> D {
        self.core.content_snapshot()
    }

    pub fn version(&self) -> u64 {
        self.core.version()
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.core.is_fully_loaded()
    }

    /// Activity records for collaborators active within [`PROFILE_WINDOW`].
    pub fn profile_data(&self) -> Vec<ProfileRecord> {
        self.core.profile_data()
    }

    pub fn site(&self) -> SiteId {
        self.core.identity.site
    }

    pub fn filename(&self) -> Option<&Path> {
        self.core.identity.filename.as_deref()
    }

    pub fn identity(&self) -> &BufferIdentity {
        &self.core.identity
    }

    /// Commit shutdown and join every driver thread. Idempotent; also runs
    /// on drop.
    ///
    /// Completes once every collaborator has drained: collaborators still
    /// holding edits get woken with the shutdown state and their final
    /// responses are committed before the drivers conclude.
    pub fn close(&mut self) {
        if !self.core.is_shutdown() {
            self.core.commit_shutdown();
        }
        let handles: Vec<_> = {
            let mut drivers = self
                .drivers
                .lock()
                .unwrap_or_else(|err| err.into_inner());
            drivers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.drivers
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(handle);
    }
}

impl<D: Document + Default> Default for Buffer<D> {
    fn default() -> Self {
        Self::new(D::default())
    }
}

impl<D: Document> Drop for Buffer<D> {
    fn drop(&mut self) {
        self.close();
    }
}
