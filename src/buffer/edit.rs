//! Notification and response records exchanged with collaborators.

use crate::algebra::{CommandSet, Document};

/// Read-only snapshot of buffer state, delivered to push and sync drivers.
#[derive(Clone, Debug)]
pub struct EditNotification<D: Document> {
    /// Current document snapshot.
    pub content: D,
    /// Initial loading has finished.
    pub fully_loaded: bool,
    /// Bumped whenever an externally referenced file changed.
    pub referenced_file_version: u64,
    /// Terminal flag; once true it never reverts.
    pub shutdown: bool,
}

impl<D: Document> EditNotification<D> {
    pub(crate) fn initial(content: D) -> Self {
        Self {
            content,
            fully_loaded: false,
            referenced_file_version: 0,
            shutdown: false,
        }
    }
}

/// A collaborator's reply: commands to integrate plus lifecycle flags.
#[derive(Clone, Debug)]
pub struct EditResponse<D: Document> {
    /// Command batch to integrate into the document.
    pub content_updates: D::Commands,
    /// Treat this response as fresh user activity.
    pub become_used: bool,
    /// Initial loading has finished.
    pub become_loaded: bool,
    /// An externally referenced file changed.
    pub referenced_file_changed: bool,
    /// This collaborator will produce no further responses.
    pub done: bool,
}

impl<D: Document> Default for EditResponse<D> {
    fn default() -> Self {
        Self::none()
    }
}

impl<D: Document> EditResponse<D> {
    /// Empty response: no edits, no flags.
    pub fn none() -> Self {
        Self {
            content_updates: D::Commands::default(),
            become_used: false,
            become_loaded: false,
            referenced_file_changed: false,
            done: false,
        }
    }

    /// Empty response that also declares this collaborator finished.
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::none()
        }
    }

    /// Response carrying a command batch.
    pub fn updates(commands: D::Commands) -> Self {
        Self {
            content_updates: commands,
            ..Self::none()
        }
    }

    pub fn become_used(mut self) -> Self {
        self.become_used = true;
        self
    }

    pub fn become_loaded(mut self) -> Self {
        self.become_loaded = true;
        self
    }

    pub fn referenced_file_changed(mut self) -> Self {
        self.referenced_file_changed = true;
        self
    }

    pub fn and_done(mut self) -> Self {
        self.done = true;
        self
    }

    /// True iff committing this response would change buffer state.
    ///
    /// `become_used` alone is deliberately not an update: it bumps the
    /// activity clock without spending a version.
    pub fn has_update(&self) -> bool {
        self.become_loaded || self.referenced_file_changed || !self.content_updates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{Appends, Transcript};

    #[test]
    fn become_used_alone_is_not_an_update() {
        let response = EditResponse::<Transcript>::none().become_used();
        assert!(!response.has_update());
        assert!(response.become_used);
    }

    #[test]
    fn flags_and_commands_are_updates() {
        assert!(EditResponse::<Transcript>::none().become_loaded().has_update());
        assert!(
            EditResponse::<Transcript>::none()
                .referenced_file_changed()
                .has_update()
        );
        assert!(EditResponse::<Transcript>::updates(Appends::one("x")).has_update());
        assert!(!EditResponse::<Transcript>::done().has_update());
    }
}
