//! Actor location records and dispatch policies.

use crate::actor::{ActorId, NodeId};
use crate::codec::{JsonCodec, MessageCodec};
use crate::error::CodecError;
use crate::registry::{KeyValue, Revision};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Rule used to choose a node when an actor has no current owner.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Least-loaded node among default-role nodes.
    #[default]
    Default,

    /// Least-loaded node with the given role, falling back to `Default`.
    Role(String),

    /// Same node as the referenced peer actor.
    ///
    /// The peer's record is looked up and logged, but placement currently
    /// falls through to `Default`.
    CoLocated(ActorId),
}

impl fmt::Display for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPolicy::Default => f.write_str("default"),
            DispatchPolicy::Role(role) => write!(f, "role({})", role),
            DispatchPolicy::CoLocated(peer) => write!(f, "co-located({})", peer),
        }
    }
}

/// Dispatch policy plus the daemon marker.
///
/// Daemon actors stay pinned to their node: their location is never
/// expired on termination and they are recorded under the daemon prefix
/// so they can be restarted after a node restart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dispatch {
    pub policy: DispatchPolicy,
    #[serde(default)]
    pub daemon: bool,
}

impl Dispatch {
    /// Default (least-loaded) placement.
    pub fn default_policy() -> Self {
        Self::default()
    }

    /// Role-scoped placement.
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            policy: DispatchPolicy::Role(role.into()),
            daemon: false,
        }
    }

    /// Placement next to a peer actor.
    pub fn co_located(peer: ActorId) -> Self {
        Self {
            policy: DispatchPolicy::CoLocated(peer),
            daemon: false,
        }
    }

    /// Mark the actor as a daemon.
    pub fn daemon(mut self) -> Self {
        self.daemon = true;
        self
    }
}

/// Identity and location record of an actor.
///
/// Stored JSON-encoded in the coordination store. `version` is the store
/// revision the record was read at; it is not part of the encoded body.
///
/// # Invariants
///
/// - `id` is globally unique
/// - A write succeeds only if `version` still matches the store
/// - `owner` is `None` while unassigned or after expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorMeta {
    pub id: ActorId,
    pub category: String,
    pub dispatch: Dispatch,
    #[serde(default)]
    pub owner: Option<NodeId>,
    #[serde(default)]
    pub server_group_id: String,
    pub active_at: i64,
    pub created_at: i64,
    #[serde(skip)]
    pub version: Revision,
}

impl ActorMeta {
    /// Create an unassigned, not-yet-stored record.
    pub fn new(
        category: impl Into<String>,
        id: ActorId,
        dispatch: Dispatch,
        server_group_id: impl Into<String>,
    ) -> Self {
        let now = unix_now();
        Self {
            id,
            category: category.into(),
            dispatch,
            owner: None,
            server_group_id: server_group_id.into(),
            active_at: now,
            created_at: now,
            version: 0,
        }
    }

    /// Whether the actor is pinned to its node.
    pub fn is_daemon(&self) -> bool {
        self.dispatch.daemon
    }

    /// Whether the record names `node` as owner.
    pub fn is_owned_by(&self, node: &NodeId) -> bool {
        self.owner.as_ref() == Some(node)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, CodecError> {
        JsonCodec.encode(self)
    }

    pub(crate) fn decode(kv: &KeyValue) -> Result<Self, CodecError> {
        let mut meta: ActorMeta = JsonCodec.decode(&kv.value)?;
        meta.version = kv.version;
        Ok(meta)
    }
}

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
