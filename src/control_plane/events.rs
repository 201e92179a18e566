//! Change notifications feeding the broadcaster.
//!
//! Two channels exist because the sources differ: invalidations come from the
//! rest of the cluster, entity mutations from this node. Both mean "the
//! exported snapshot may have changed".

use tokio::sync::broadcast;

/// Capacity of each notification channel. Lagging receivers lose individual
/// events, which is harmless since any event requests the same push.
const FEED_CAPACITY: usize = 64;

/// Cluster-wide "configuration changed elsewhere" notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInvalidation {
    pub origin: String,
}

/// A local create/update/delete of a configuration entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMutation {
    pub entity: String,
    pub operation: MutationOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

/// Publisher side of both notification channels.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    invalidations: broadcast::Sender<ClusterInvalidation>,
    mutations: broadcast::Sender<EntityMutation>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(FEED_CAPACITY);
        let (mutations, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            invalidations,
            mutations,
        }
    }

    pub fn invalidate(&self, origin: impl Into<String>) {
        let _ = self.invalidations.send(ClusterInvalidation {
            origin: origin.into(),
        });
    }

    pub fn mutated(&self, entity: impl Into<String>, operation: MutationOp) {
        let _ = self.mutations.send(EntityMutation {
            entity: entity.into(),
            operation,
        });
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<ClusterInvalidation> {
        self.invalidations.subscribe()
    }

    pub fn subscribe_mutations(&self) -> broadcast::Receiver<EntityMutation> {
        self.mutations.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
