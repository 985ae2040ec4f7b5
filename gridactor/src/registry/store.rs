//! Coordination store abstraction.
//!
//! The registry and membership need a strongly consistent key-value store
//! with per-key versions, compare-and-set, prefix watches and TTL leases.
//! Anything offering those (etcd, a consensus log, the in-memory store)
//! can back a cluster.

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Store-wide monotonically increasing revision.
///
/// Every key carries the revision of its last write. `0` means "absent"
/// in a compare-and-set expectation.
pub type Revision = i64;

/// A stored key with the revision of its last write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub version: Revision,
}

/// Change notification delivered to prefix watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put(KeyValue),
    Delete { key: String, version: Revision },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(kv) => &kv.key,
            WatchEvent::Delete { key, .. } => key,
        }
    }
}

/// Result of a compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed at this revision.
    Written { version: Revision },
    /// The expectation did not hold; `current` is what the store holds.
    Conflict { current: Option<KeyValue> },
}

/// Identifier of a TTL lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseId(pub i64);

/// Strongly consistent key-value store used for coordination.
///
/// # Guarantees expected from implementations
///
/// - Revisions are global and strictly increasing
/// - `compare_and_put` is atomic with respect to every other write
/// - A watcher observes every change under its prefix after subscription,
///   in revision order
/// - Keys attached to a lease disappear, with a delete event, once the
///   lease is revoked or not kept alive within its TTL
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Read one key.
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, StoreError>;

    /// Read every key under a prefix, ordered by key.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Write `value` only if the key's current revision is `expected`
    /// (`0` = key must be absent).
    async fn compare_and_put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Revision,
    ) -> Result<CasOutcome, StoreError>;

    /// Unconditional write, optionally attached to a lease.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<Revision, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Subscribe to changes under a prefix.
    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, StoreError>;

    /// Grant a lease that expires after `ttl` without keep-alive.
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Extend a lease by its TTL.
    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// Revoke a lease, deleting its keys.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError>;
}
