//! Local cache of actor location records.

use crate::actor::{ActorId, ActorMeta};
use crate::registry::Revision;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Versioned cache of [`ActorMeta`] records.
///
/// Fed by the node's own writes and by the store watch. An update is only
/// applied if it is at least as new as the cached record, so a late watch
/// event never rolls back a fresher local write.
#[derive(Debug, Default)]
pub struct MetaCache {
    entries: RwLock<HashMap<ActorId, ActorMeta>>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &ActorId) -> Option<ActorMeta> {
        self.entries.read().await.get(id).cloned()
    }

    /// Apply a record, newest version wins. Returns the cached record.
    pub async fn apply(&self, meta: ActorMeta) -> ActorMeta {
        let mut entries = self.entries.write().await;
        match entries.get(&meta.id) {
            Some(cached) if cached.version > meta.version => cached.clone(),
            _ => {
                entries.insert(meta.id.clone(), meta.clone());
                meta
            }
        }
    }

    /// Drop a record deleted at `version`, unless a newer one is cached.
    pub async fn remove(&self, id: &ActorId, version: Revision) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(cached) if cached.version <= version => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Dispatch, NodeId};

    fn meta(version: Revision, owner: &str) -> ActorMeta {
        let mut meta = ActorMeta::new("player", ActorId::new("p1"), Dispatch::default(), "");
        meta.version = version;
        meta.owner = Some(NodeId::new(owner));
        meta
    }

    #[tokio::test]
    async fn test_newer_version_wins() {
        let cache = MetaCache::new();
        cache.apply(meta(5, "a")).await;

        let kept = cache.apply(meta(3, "b")).await;
        assert_eq!(kept.version, 5);
        assert_eq!(kept.owner, Some(NodeId::new("a")));

        let replaced = cache.apply(meta(7, "c")).await;
        assert_eq!(replaced.owner, Some(NodeId::new("c")));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_stale_delete_is_ignored() {
        let cache = MetaCache::new();
        cache.apply(meta(9, "a")).await;

        assert!(!cache.remove(&ActorId::new("p1"), 4).await);
        assert!(cache.get(&ActorId::new("p1")).await.is_some());

        assert!(cache.remove(&ActorId::new("p1"), 10).await);
        assert!(cache.get(&ActorId::new("p1")).await.is_none());
    }
}
