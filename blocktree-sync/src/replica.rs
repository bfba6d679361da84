use blocktree_crdt::{Update, VectorClock};
use blocktree_types::DocId;

/// The engine's view of a local document.
///
/// Implemented by the store's `Doc`. Every method is synchronous and must
/// not call back into the engine.
pub trait DocReplica: Send + Sync {
    fn doc_id(&self) -> DocId;

    /// State vector of the local copy.
    fn state_vector(&self) -> VectorClock;

    /// Every update the local copy has that `state` does not cover, in
    /// causal order.
    fn updates_since(&self, state: &VectorClock) -> Vec<Update>;

    /// Integrates an update received from a source. Must be idempotent.
    fn apply_remote(&self, update: Update);
}
