//! The buffer state machine: one mutex, one condvar, three wait predicates.
//!
//! Every shared field lives under a single mutex. Waiters (the write
//! lease, the notification wait, the debounce wait) re-check their
//! predicate after every wake, and every state-affecting transition
//! broadcasts: a commit, the shutdown flip, a done/declared insertion, a
//! `last_used` bump.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::algebra::{CommandSet, Document};
use crate::collaborator::{Collaborator, PushDelays};

use super::edit::{EditNotification, EditResponse};
use super::identity::BufferIdentity;
use super::listener::{ListenerId, ListenerSlot, UpdateFn};
use super::stats::{CollaboratorStats, PROFILE_WINDOW, ProfileRecord};

pub(crate) type CollaboratorId = u64;

pub(crate) struct CollaboratorEntry<D: Document> {
    pub stats: CollaboratorStats,
    /// Keeps the collaborator alive for the buffer's lifetime.
    pub collaborator: Collaborator<D>,
}

struct BufferState<D: Document> {
    state: EditNotification<D>,
    version: u64,
    /// A writer holds the logical write lease.
    updating: bool,
    /// Last moment of observable user activity.
    last_used: Instant,
    collaborators: BTreeMap<CollaboratorId, CollaboratorEntry<D>>,
    /// Collaborators that signalled `done` or whose driver has exited.
    done: BTreeSet<CollaboratorId>,
    /// Quiescence witness: `done` as of the latest commit, plus direct
    /// insertions from empty responses and exited drivers.
    declared_no_edit: BTreeSet<CollaboratorId>,
    listeners: Vec<ListenerSlot<D>>,
    next_collaborator_id: CollaboratorId,
    next_listener_id: ListenerId,
}

impl<D: Document> BufferState<D> {
    /// Nothing more will ever be committed: shutdown has been observed and
    /// every collaborator was already done as of the latest commit.
    fn all_edits_complete(&self) -> bool {
        self.state.shutdown && self.declared_no_edit.len() == self.collaborators.len()
    }

    fn deliver(&mut self, commands: &D::Commands) {
        for slot in &mut self.listeners {
            (slot.update)(commands);
        }
    }
}

pub(crate) struct BufferCore<D: Document> {
    pub identity: BufferIdentity,
    mu: Mutex<BufferState<D>>,
    cv: Condvar,
}

/// Releases the write lease on unwind. A panic in a mutator or a listener
/// must not leave `updating` stuck at `true`, or every later writer (the
/// shutdown commit included) would block forever. The commit path disarms
/// the guard and clears the lease itself.
struct LeaseGuard<'a, D: Document> {
    core: &'a BufferCore<D>,
    armed: bool,
}

impl<D: Document> Drop for LeaseGuard<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            let mut s = self.core.lock();
            s.updating = false;
            self.core.cv.notify_all();
        }
    }
}

impl<D: Document> BufferCore<D> {
    pub fn new(content: D, identity: BufferIdentity) -> Self {
        Self {
            identity,
            mu: Mutex::new(BufferState {
                state: EditNotification::initial(content),
                version: 0,
                updating: false,
                last_used: Instant::now(),
                collaborators: BTreeMap::new(),
                done: BTreeSet::new(),
                declared_no_edit: BTreeSet::new(),
                listeners: Vec::new(),
                next_collaborator_id: 1,
                next_listener_id: 1,
            }),
            cv: Condvar::new(),
        }
    }

    /// Mutators run outside the lock, so a panicking thread never leaves
    /// state mid-mutation; poisoning is recoverable.
    fn lock(&self) -> MutexGuard<'_, BufferState<D>> {
        self.mu.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, BufferState<D>>) -> MutexGuard<'a, BufferState<D>> {
        self.cv.wait(guard).unwrap_or_else(|err| err.into_inner())
    }

    /// Register a collaborator; `None` once shutdown has been committed.
    pub fn register(&self, collaborator: Collaborator<D>) -> Option<CollaboratorId> {
        let mut s = self.lock();
        if s.state.shutdown {
            warn!(
                "ignoring collaborator {} attached after shutdown",
                collaborator.name()
            );
            return None;
        }
        let id = s.next_collaborator_id;
        s.next_collaborator_id += 1;
        let stats = CollaboratorStats::new(collaborator.push_delays());
        s.collaborators.insert(
            id,
            CollaboratorEntry {
                stats,
                collaborator,
            },
        );
        Some(id)
    }

    /// The single write path.
    ///
    /// Acquires the write lease, optionally publishes a command batch to
    /// listeners inside the lease's critical section (so the order
    /// listeners observe equals commit order), runs the mutator on a copy
    /// of the state outside the lock, then commits: version bump, witness
    /// snapshot, state install, activity stamp.
    pub fn update_state<F>(
        &self,
        who: Option<CollaboratorId>,
        become_used: bool,
        publish: Option<&D::Commands>,
        mutate: F,
    ) where
        F: FnOnce(&mut EditNotification<D>),
    {
        // Declared before the guard below so an unwind drops the lock
        // first, letting the lease release re-acquire it.
        let mut lease = LeaseGuard {
            core: self,
            armed: false,
        };

        let mut s = self.lock();
        while s.updating {
            s = self.wait(s);
        }
        s.updating = true;
        lease.armed = true;
        if let Some(commands) = publish
            && !commands.is_empty()
        {
            s.deliver(commands);
        }
        let mut staged = s.state.clone();
        drop(s);

        mutate(&mut staged);

        let mut s = self.lock();
        lease.armed = false;
        s.updating = false;
        s.version += 1;
        s.declared_no_edit = s.done.clone();
        s.state = staged;
        if become_used {
            s.last_used = Instant::now();
        }
        if let Some(id) = who
            && let Some(entry) = s.collaborators.get_mut(&id)
        {
            entry.stats.mark_change();
        }
        trace!(version = s.version, "commit");
        self.cv.notify_all();
    }

    /// External injection point: publish `commands`, then commit their
    /// integration. Does not count as user activity.
    pub fn push_changes(&self, commands: D::Commands) {
        self.update_state(None, false, Some(&commands), |state| {
            if !commands.is_empty() {
                state.content = state.content.integrate(&commands);
            }
        });
    }

    /// The single read-wait path used by push and sync drivers.
    ///
    /// Blocks until a version newer than `last_processed` exists, debounces
    /// it against user activity, and returns a copy of the state. Returns
    /// `None` when no further edit will ever arrive; the caller's driver
    /// must exit.
    pub fn next_notification(
        &self,
        id: CollaboratorId,
        last_processed: &mut u64,
    ) -> Option<EditNotification<D>> {
        let mut s = self.lock();

        while s.version == *last_processed && !s.all_edits_complete() {
            s = self.wait(s);
        }

        if s.version == *last_processed {
            // Nothing left to drain and every collaborator was done as of
            // the latest commit: terminal.
            s.done.insert(id);
            debug!("collaborator {id} observed quiescence");
            self.cv.notify_all();
            return None;
        }

        // Debounce against user activity. The first observation (nothing
        // processed yet) is delivered immediately.
        if *last_processed != 0 {
            let delays = s
                .collaborators
                .get(&id)
                .map(|entry| entry.stats.delays)
                .unwrap_or(PushDelays::ZERO);
            let first_saw_change = Instant::now();
            loop {
                if s.state.shutdown {
                    // Deliver immediately so the driver can drain.
                    break;
                }
                let last_used_at_start = s.last_used;
                let now = Instant::now();
                let idle_left = delays
                    .from_idle
                    .saturating_sub(now.saturating_duration_since(last_used_at_start));
                let start_left = delays
                    .from_start
                    .saturating_sub(now.saturating_duration_since(first_saw_change));
                let wait_for = idle_left.max(start_left);
                if wait_for.is_zero() {
                    break;
                }
                let (guard, _) = self
                    .cv
                    .wait_timeout(s, wait_for)
                    .unwrap_or_else(|err| err.into_inner());
                s = guard;
                // Re-check from scratch: shutdown may have flipped,
                // `last_used` may have advanced, the wake may be spurious.
            }
        }

        *last_processed = s.version;
        if let Some(entry) = s.collaborators.get_mut(&id) {
            entry.stats.mark_request();
        }
        Some(s.state.clone())
    }

    /// The single post-response path used by pull and sync drivers.
    ///
    /// Returns `false` when the collaborator declared itself done and the
    /// driver must exit.
    pub fn sink_response(&self, id: CollaboratorId, response: EditResponse<D>) -> bool {
        {
            let mut s = self.lock();
            if let Some(entry) = s.collaborators.get_mut(&id) {
                entry.stats.mark_response();
            }
        }

        let EditResponse {
            content_updates,
            become_used,
            become_loaded,
            referenced_file_changed,
            done,
        } = response;
        let has_update = become_loaded || referenced_file_changed || !content_updates.is_empty();

        if has_update {
            self.update_state(Some(id), become_used, Some(&content_updates), |state| {
                if !content_updates.is_empty() {
                    state.content = state.content.integrate(&content_updates);
                }
                if become_loaded {
                    state.fully_loaded = true;
                }
                if referenced_file_changed {
                    state.referenced_file_version += 1;
                }
            });
        } else {
            let mut s = self.lock();
            if become_used {
                s.last_used = Instant::now();
            }
            // An empty response is itself evidence of quiescence: record it
            // directly, not only through the commit-time snapshot.
            s.declared_no_edit.insert(id);
            self.cv.notify_all();
        }

        if done {
            let mut s = self.lock();
            s.done.insert(id);
            debug!("collaborator {id} signalled done");
            self.cv.notify_all();
            return false;
        }
        true
    }

    /// Record a driver's exit. An exited driver produces no further edits,
    /// so it counts toward quiescence immediately: waiters blocked after
    /// the final commit must still be able to observe completion.
    pub fn driver_exited(&self, id: CollaboratorId) {
        let mut s = self.lock();
        s.done.insert(id);
        s.declared_no_edit.insert(id);
        self.cv.notify_all();
    }

    pub fn commit_shutdown(&self) {
        debug!("committing shutdown");
        self.update_state(None, false, None, |state| {
            state.shutdown = true;
        });
    }

    /// Register a listener and observe the current content in one critical
    /// section, so no commit can fall between the two.
    pub fn listen(&self, initial: impl FnOnce(&D), update: UpdateFn<D>) -> ListenerId {
        let mut s = self.lock();
        // A held write lease may have published a batch that is not yet in
        // `state`; wait it out so `initial` plus updates misses nothing.
        while s.updating {
            s = self.wait(s);
        }
        let id = s.next_listener_id;
        s.next_listener_id += 1;
        s.listeners.push(ListenerSlot { id, update });
        initial(&s.state.content);
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut s = self.lock();
        s.listeners.retain(|slot| slot.id != id);
    }

    pub fn content_snapshot(&self) -> D {
        self.lock().state.content.clone()
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.lock().state.fully_loaded
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock().state.shutdown
    }

    /// Activity records for collaborators active within [`PROFILE_WINDOW`].
    pub fn profile_data(&self) -> Vec<ProfileRecord> {
        let s = self.lock();
        s.collaborators
            .values()
            .filter(|entry| entry.stats.active_within(PROFILE_WINDOW))
            .map(|entry| ProfileRecord {
                name: entry.collaborator.name().to_string(),
                since_request: entry.stats.last_request_at.map(|at| at.elapsed()),
                since_response: entry.stats.last_response_at.map(|at| at.elapsed()),
                since_change: entry.stats.last_change_at.map(|at| at.elapsed()),
            })
            .collect()
    }

    #[cfg(test)]
    pub fn sets_for_tests(&self) -> (BTreeSet<CollaboratorId>, BTreeSet<CollaboratorId>) {
        let s = self.lock();
        (s.done.clone(), s.declared_no_edit.clone())
    }
}
