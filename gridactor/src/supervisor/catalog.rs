//! Tables of the actors hosted on this node.
//!
//! Owned by the supervisor task and mutated only from it, so it needs no
//! locking. An actor is tracked from spawn until its task reports the
//! exit, through three overlapping sets:
//!
//! ```text
//! running ──hibernate──▶ sleeping ──(max sleep / shutdown)──▶ stopping
//!    ▲                      │
//!    └────────wake──────────┘
//! ```
//!
//! `stopping` marks sleepers whose termination was submitted; they stay in
//! `sleeping` until the exit arrives so they keep counting as load.

use crate::actor::{ActorHandle, ActorId};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct SleepingActor {
    handle: ActorHandle,
    since: Instant,
}

/// Outcome of a hibernation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hibernation {
    /// Moved to the sleeping table.
    Slept,
    /// Its task had already exited; it is no longer tracked.
    Forgotten,
    /// Not in the running table.
    NotRunning,
}

/// Which table an actor is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Running,
    Sleeping,
    /// Sleeping with its termination submitted.
    Stopping,
}

/// Local actor tables.
#[derive(Debug, Default)]
pub struct ActorCatalog {
    running: HashMap<ActorId, ActorHandle>,
    sleeping: HashMap<ActorId, SleepingActor>,
    stopping: HashSet<ActorId>,
    by_category: HashMap<String, HashSet<ActorId>>,
}

impl ActorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_running(&self, id: &ActorId) -> Option<&ActorHandle> {
        self.running.get(id)
    }

    pub fn is_stopping(&self, id: &ActorId) -> bool {
        self.stopping.contains(id)
    }

    pub fn is_sleeping(&self, id: &ActorId) -> bool {
        self.sleeping.contains_key(id)
    }

    pub fn residency(&self, id: &ActorId) -> Option<Residency> {
        if self.stopping.contains(id) {
            Some(Residency::Stopping)
        } else if self.running.contains_key(id) {
            Some(Residency::Running)
        } else if self.sleeping.contains_key(id) {
            Some(Residency::Sleeping)
        } else {
            None
        }
    }

    /// Track a freshly spawned actor.
    pub fn insert(&mut self, handle: ActorHandle) {
        self.by_category
            .entry(handle.category().to_string())
            .or_default()
            .insert(handle.id().clone());
        self.running.insert(handle.id().clone(), handle);
    }

    /// Move a sleeping actor back to running.
    ///
    /// Returns `None` if it is not sleeping, is being stopped, or its task
    /// already exited (in which case it is forgotten).
    pub fn wake(&mut self, id: &ActorId) -> Option<ActorHandle> {
        if self.stopping.contains(id) {
            return None;
        }
        let sleeping = self.sleeping.remove(id)?;
        if sleeping.handle.is_closed() {
            self.untrack(id, sleeping.handle.category());
            return None;
        }
        self.running.insert(id.clone(), sleeping.handle.clone());
        Some(sleeping.handle)
    }

    /// Move a running actor to the sleeping table.
    pub fn hibernate(&mut self, id: &ActorId) -> Hibernation {
        let Some(handle) = self.running.remove(id) else {
            return Hibernation::NotRunning;
        };
        if handle.is_closed() {
            self.untrack(id, handle.category());
            return Hibernation::Forgotten;
        }
        self.sleeping.insert(
            id.clone(),
            SleepingActor {
                handle,
                since: Instant::now(),
            },
        );
        Hibernation::Slept
    }

    /// Sleepers older than `max_sleep`, marked as stopping.
    pub fn take_expired_sleepers(&mut self, max_sleep: Duration) -> Vec<ActorHandle> {
        self.mark_stopping(|s| s.since.elapsed() > max_sleep)
    }

    /// Every sleeper not yet being stopped, marked as stopping.
    pub fn take_sleepers(&mut self) -> Vec<ActorHandle> {
        self.mark_stopping(|_| true)
    }

    fn mark_stopping(&mut self, select: impl Fn(&SleepingActor) -> bool) -> Vec<ActorHandle> {
        let picked: Vec<ActorHandle> = self
            .sleeping
            .iter()
            .filter(|(id, s)| !self.stopping.contains(*id) && select(s))
            .map(|(_, s)| s.handle.clone())
            .collect();
        for handle in &picked {
            self.stopping.insert(handle.id().clone());
        }
        picked
    }

    pub fn running_ids(&self) -> Vec<ActorId> {
        self.running.keys().cloned().collect()
    }

    /// Forget an exited actor if `incarnation` is the tracked one.
    pub fn remove(&mut self, id: &ActorId, incarnation: u64) -> bool {
        let category = if let Some(h) = self.running.get(id).filter(|h| h.incarnation() == incarnation) {
            let category = h.category().to_string();
            self.running.remove(id);
            category
        } else if let Some(s) = self
            .sleeping
            .get(id)
            .filter(|s| s.handle.incarnation() == incarnation)
        {
            let category = s.handle.category().to_string();
            self.sleeping.remove(id);
            category
        } else {
            return false;
        };
        self.untrack(id, &category);
        true
    }

    fn untrack(&mut self, id: &ActorId, category: &str) {
        self.stopping.remove(id);
        if let Some(ids) = self.by_category.get_mut(category) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_category.remove(category);
            }
        }
    }

    /// Actors tracked in any table.
    pub fn remaining(&self) -> usize {
        self.by_category.values().map(HashSet::len).sum()
    }

    pub fn counts_by_category(&self) -> HashMap<String, usize> {
        self.by_category
            .iter()
            .map(|(category, ids)| (category.clone(), ids.len()))
            .collect()
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn sleeping_len(&self) -> usize {
        self.sleeping.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::mailbox::detached_handle;

    #[tokio::test]
    async fn test_hibernate_and_wake() {
        let mut catalog = ActorCatalog::new();
        let (handle, _inbox) = detached_handle("p1", "player", 1);
        let id = handle.id().clone();
        catalog.insert(handle);

        assert_eq!(catalog.hibernate(&id), Hibernation::Slept);
        assert!(catalog.get_running(&id).is_none());
        assert!(catalog.is_sleeping(&id));
        assert_eq!(catalog.remaining(), 1);

        assert_eq!(catalog.residency(&id), Some(Residency::Sleeping));
        let woken = catalog.wake(&id).unwrap();
        assert_eq!(woken.incarnation(), 1);
        assert_eq!(catalog.residency(&id), Some(Residency::Running));
        assert!(catalog.get_running(&id).is_some());
        assert_eq!(catalog.hibernate(&ActorId::new("other")), Hibernation::NotRunning);
    }

    #[tokio::test]
    async fn test_closed_actor_is_forgotten_on_hibernate() {
        let mut catalog = ActorCatalog::new();
        let (handle, inbox) = detached_handle("p1", "player", 1);
        let id = handle.id().clone();
        catalog.insert(handle);
        drop(inbox);

        assert_eq!(catalog.hibernate(&id), Hibernation::Forgotten);
        assert_eq!(catalog.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_sleepers_are_marked_once() {
        let mut catalog = ActorCatalog::new();
        let (old, _old_inbox) = detached_handle("old", "player", 1);
        let (young, _young_inbox) = detached_handle("young", "player", 2);
        catalog.insert(old);
        catalog.insert(young);

        catalog.hibernate(&ActorId::new("old"));
        tokio::time::advance(Duration::from_secs(20)).await;
        catalog.hibernate(&ActorId::new("young"));
        tokio::time::advance(Duration::from_secs(15)).await;

        let expired = catalog.take_expired_sleepers(Duration::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), &ActorId::new("old"));
        assert!(catalog.is_stopping(&ActorId::new("old")));
        assert_eq!(catalog.residency(&ActorId::new("old")), Some(Residency::Stopping));
        assert!(catalog.wake(&ActorId::new("old")).is_none());

        assert!(catalog.take_expired_sleepers(Duration::from_secs(30)).is_empty());
        assert_eq!(catalog.take_sleepers().len(), 1);
        assert_eq!(catalog.remaining(), 2);
    }

    #[tokio::test]
    async fn test_stale_exit_does_not_remove_new_incarnation() {
        let mut catalog = ActorCatalog::new();
        let (handle, _inbox) = detached_handle("p1", "player", 2);
        catalog.insert(handle);

        assert!(!catalog.remove(&ActorId::new("p1"), 1));
        assert_eq!(catalog.remaining(), 1);

        assert!(catalog.remove(&ActorId::new("p1"), 2));
        assert_eq!(catalog.remaining(), 0);
        assert!(catalog.counts_by_category().is_empty());
    }

    #[tokio::test]
    async fn test_counts_by_category() {
        let mut catalog = ActorCatalog::new();
        let (a, _a) = detached_handle("a", "player", 1);
        let (b, _b) = detached_handle("b", "player", 2);
        let (c, _c) = detached_handle("c", "room", 3);
        catalog.insert(a);
        catalog.insert(b);
        catalog.insert(c);
        catalog.hibernate(&ActorId::new("c"));

        let counts = catalog.counts_by_category();
        assert_eq!(counts.get("player"), Some(&2));
        assert_eq!(counts.get("room"), Some(&1));
        assert_eq!(catalog.running_len(), 2);
        assert_eq!(catalog.sleeping_len(), 1);
    }
}
