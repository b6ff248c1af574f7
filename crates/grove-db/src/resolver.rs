//! Per-kind conflict resolution.
//!
//! A persistent kind may opt into merging concurrent writes instead of
//! failing them. The resolver receives three states:
//!
//! - `old`: the shared state the loser's overlay was based on
//! - `saved`: the loser's overlay (its uncommitted writes)
//! - `new`: the state the winner committed
//!
//! and returns the merged state that replaces the loser's overlay. A
//! resolver that errors counts as no resolution: the conflict stands.

use std::collections::HashMap;
use std::sync::Arc;

use grove_object::StateMap;
use parking_lot::RwLock;
use thiserror::Error;

/// A resolver declined to merge.
#[derive(Debug, Error)]
#[error("conflict resolution failed: {reason}")]
pub struct ResolveError {
    /// Why the merge was refused.
    pub reason: String,
}

impl ResolveError {
    /// Creates a resolution failure.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Merges concurrent writes to objects of one kind.
pub trait ConflictResolver: Send + Sync {
    /// Produces the merged state, or fails the conflict.
    fn resolve(
        &self,
        old: &StateMap,
        saved: &StateMap,
        new: &StateMap,
    ) -> Result<StateMap, ResolveError>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&StateMap, &StateMap, &StateMap) -> Result<StateMap, ResolveError> + Send + Sync,
{
    fn resolve(
        &self,
        old: &StateMap,
        saved: &StateMap,
        new: &StateMap,
    ) -> Result<StateMap, ResolveError> {
        self(old, saved, new)
    }
}

/// Kind → resolver dispatch table.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: RwLock<HashMap<String, Arc<dyn ConflictResolver>>>,
}

impl ResolverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver for a kind, replacing any previous one.
    pub fn register(&self, kind: &str, resolver: impl ConflictResolver + 'static) {
        self.resolvers
            .write()
            .insert(kind.to_string(), Arc::new(resolver));
    }

    /// Looks up the resolver for a kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn ConflictResolver>> {
        self.resolvers.read().get(kind).cloned()
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("kinds", &self.resolvers.read().len())
            .finish()
    }
}
