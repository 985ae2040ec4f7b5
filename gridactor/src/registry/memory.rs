//! In-memory coordination store for tests and single-process clusters.

use crate::error::StoreError;
use crate::registry::store::{CasOutcome, CoordinationStore, KeyValue, LeaseId, Revision, WatchEvent};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    version: Revision,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: HashSet<String>,
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Debug, Default)]
struct State {
    revision: Revision,
    next_lease: i64,
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    watchers: Vec<Watcher>,
    offline: bool,
}

impl State {
    fn next_revision(&mut self) -> Revision {
        self.revision += 1;
        self.revision
    }

    fn notify(&mut self, event: WatchEvent) {
        self.watchers.retain(|w| {
            if !event.key().starts_with(&w.prefix) {
                return !w.tx.is_closed();
            }
            w.tx.send(event.clone()).is_ok()
        });
    }

    fn write(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Revision {
        let version = self.next_revision();
        if let Some(previous) = self.entries.get(key).and_then(|e| e.lease) {
            if Some(previous) != lease {
                if let Some(l) = self.leases.get_mut(&previous) {
                    l.keys.remove(key);
                }
            }
        }
        if let Some(id) = lease {
            if let Some(l) = self.leases.get_mut(&id) {
                l.keys.insert(key.to_string());
            }
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                version,
                lease,
            },
        );
        self.notify(WatchEvent::Put(KeyValue {
            key: key.to_string(),
            value,
            version,
        }));
        version
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                if let Some(l) = entry.lease.and_then(|id| self.leases.get_mut(&id)) {
                    l.keys.remove(key);
                }
                let version = self.next_revision();
                self.notify(WatchEvent::Delete {
                    key: key.to_string(),
                    version,
                });
                true
            }
            None => false,
        }
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        match self.leases.remove(&id) {
            Some(lease) => {
                for key in lease.keys {
                    let attached = self.entries.get(&key).map(|e| e.lease == Some(id));
                    if attached == Some(true) {
                        self.remove(&key);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Expire leases whose deadline passed.
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            tracing::debug!(lease = id.0, "lease expired");
            self.drop_lease(id);
        }
    }

    fn kv(&self, key: &str) -> Option<KeyValue> {
        self.entries.get(key).map(|e| KeyValue {
            key: key.to_string(),
            value: e.value.clone(),
            version: e.version,
        })
    }
}

/// Coordination store held in process memory.
///
/// Shared by every runtime of a test cluster through an `Arc`. Lease
/// expiry is evaluated lazily on each operation against tokio's clock, so
/// paused-time tests control it with `tokio::time::advance`.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("store state poisoned".to_string()))?;
        if state.offline {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        state.purge_expired();
        Ok(state)
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError> {
        Ok(self.lock()?.kv(key))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                version: e.version,
            })
            .collect())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<CasOutcome, StoreError> {
        let mut state = self.lock()?;
        let current = state.entries.get(key).map(|e| e.version).unwrap_or(0);
        if current != expected {
            return Ok(CasOutcome::Conflict {
                current: state.kv(key),
            });
        }
        let lease = state.entries.get(key).and_then(|e| e.lease);
        let version = state.write(key, value, lease);
        Ok(CasOutcome::Written { version })
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError> {
        let mut state = self.lock()?;
        if let Some(id) = lease {
            if !state.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id.0));
            }
        }
        Ok(state.write(key, value, lease))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(key))
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()?.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut state = self.lock()?;
        state.next_lease += 1;
        let id = LeaseId(state.next_lease);
        state.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
                keys: HashSet::new(),
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let l = state
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease.0))?;
        l.deadline = Instant::now() + l.ttl;
        Ok(())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        if self.lock()?.drop_lease(lease) {
            Ok(())
        } else {
            Err(StoreError::LeaseNotFound(lease.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_put_absent_then_conflict() {
        let store = InMemoryStore::new();

        let first = store.compare_and_put("actor/a", b"1".to_vec(), 0).await.unwrap();
        let CasOutcome::Written { version } = first else {
            panic!("expected write, got {:?}", first);
        };

        let second = store.compare_and_put("actor/a", b"2".to_vec(), 0).await.unwrap();
        match second {
            CasOutcome::Conflict { current: Some(kv) } => {
                assert_eq!(kv.version, version);
                assert_eq!(kv.value, b"1".to_vec());
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        let third = store
            .compare_and_put("actor/a", b"3".to_vec(), version)
            .await
            .unwrap();
        assert!(matches!(third, CasOutcome::Written { version: v } if v > version));
    }

    #[tokio::test]
    async fn test_list_prefix_is_scoped_and_ordered() {
        let store = InMemoryStore::new();
        store.put("actor/b", vec![], None).await.unwrap();
        store.put("actor/a", vec![], None).await.unwrap();
        store.put("node/x", vec![], None).await.unwrap();

        let keys: Vec<String> = store
            .list_prefix("actor/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["actor/a".to_string(), "actor/b".to_string()]);
    }

    #[tokio::test]
    async fn test_watch_sees_puts_and_deletes() {
        let store = InMemoryStore::new();
        let mut events = store.watch_prefix("node/").await.unwrap();

        store.put("node/n1", b"x".to_vec(), None).await.unwrap();
        store.put("actor/ignored", vec![], None).await.unwrap();
        store.delete("node/n1").await.unwrap();

        assert!(matches!(events.recv().await, Some(WatchEvent::Put(kv)) if kv.key == "node/n1"));
        assert!(matches!(
            events.recv().await,
            Some(WatchEvent::Delete { key, .. }) if key == "node/n1"
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_deletes_keys() {
        let store = InMemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(2)).await.unwrap();
        store.put("node/n1", b"x".to_vec(), Some(lease)).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        store.keep_alive(lease).await.unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(store.get("node/n1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("node/n1").await.unwrap().is_none());
        assert!(matches!(
            store.keep_alive(lease).await,
            Err(StoreError::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revoke_deletes_keys() {
        let store = InMemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        store.put("node/n1", vec![], Some(lease)).await.unwrap();
        store.revoke_lease(lease).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_is_unavailable() {
        let store = InMemoryStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.get("actor/a").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert!(store.get("actor/a").await.unwrap().is_none());
    }
}
