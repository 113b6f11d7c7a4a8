//! The document algebra the buffer arbitrates over.
//!
//! The core never inspects document contents. It needs exactly two
//! operations from the outside world: folding a command batch into a
//! snapshot, and asking whether a batch carries any edits. The CRDT (or
//! any other mergeable document type) lives behind these two traits.

/// A mergeable batch of edit commands.
///
/// `Default` must produce the empty batch.
pub trait CommandSet: Clone + Default + Send + Sync + 'static {
    /// True iff this batch carries no edits.
    fn is_empty(&self) -> bool;
}

/// An immutable document snapshot.
///
/// Snapshots are value types and cheap to clone (implementations typically
/// share structure). `integrate` must be pure, and associative over
/// concatenation of command batches.
pub trait Document: Clone + Send + Sync + 'static {
    type Commands: CommandSet;

    /// Fold `commands` into this snapshot, producing the next snapshot.
    fn integrate(&self, commands: &Self::Commands) -> Self;
}
