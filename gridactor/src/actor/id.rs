//! Core identifier types for actors, nodes and RPC requests.

use crate::error::IdError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, location-independent identifier of an actor.
///
/// # Validation Rules
///
/// - Must be non-empty
/// - Must not contain `/`, which separates segments of store keys
///
/// Ids are opaque: the runtime never derives meaning from their content.
/// Use [`ActorId::parse`] for untrusted input and [`ActorId::new`] for
/// literals known to be valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Create an ActorId from a literal.
    ///
    /// # Panics
    ///
    /// Panics if the id is empty or contains `/`.
    pub fn new(id: impl Into<String>) -> Self {
        match Self::parse(id) {
            Ok(id) => id,
            Err(e) => panic!("invalid ActorId: {}", e),
        }
    }

    /// Parse an ActorId, validating its content.
    pub fn parse(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        validate("ActorId", &id)?;
        Ok(Self(id))
    }

    /// Get the raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a cluster node.
///
/// Generated once per process with [`NodeId::generate`]; the node's network
/// address is carried separately in [`crate::cluster::Node`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a NodeId from a literal.
    ///
    /// # Panics
    ///
    /// Panics if the id is empty or contains `/`.
    pub fn new(id: impl Into<String>) -> Self {
        match Self::parse(id) {
            Ok(id) => id,
            Err(e) => panic!("invalid NodeId: {}", e),
        }
    }

    /// Parse a NodeId, validating its content.
    pub fn parse(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        validate("NodeId", &id)?;
        Ok(Self(id))
    }

    /// Generate a random node id of the form `node-<16 hex digits>`.
    pub fn generate() -> Self {
        Self(format!("node-{:016x}", rand::random::<u64>()))
    }

    /// Get the raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate(kind: &'static str, id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty(kind));
    }
    if id.contains('/') {
        return Err(IdError::ReservedCharacter { kind, ch: '/' });
    }
    Ok(())
}

/// Identifier matching a cross-node response to its pending request.
///
/// # Invariants
///
/// - Always in `1..i32::MAX` (31-bit wrapping counter, zero skipped)
/// - Unique among the requests pending in one process at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u32);

impl RequestId {
    /// Get the raw id value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_parse() {
        let id = ActorId::parse("player-42").unwrap();
        assert_eq!(id.as_str(), "player-42");
        assert_eq!(id.to_string(), "player-42");
    }

    #[test]
    fn test_actor_id_invalid() {
        assert_eq!(ActorId::parse(""), Err(IdError::Empty("ActorId")));
        assert_eq!(
            ActorId::parse("a/b"),
            Err(IdError::ReservedCharacter {
                kind: "ActorId",
                ch: '/'
            })
        );
    }

    #[test]
    #[should_panic(expected = "invalid ActorId")]
    fn test_actor_id_new_panics_on_empty() {
        let _ = ActorId::new("");
    }

    #[test]
    fn test_node_id_generate_is_unique() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert!(a.as_str().starts_with("node-"));
        assert_eq!(a.as_str().len(), "node-".len() + 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = ActorId::new("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        let node: NodeId = serde_json::from_str("\"node-1\"").unwrap();
        assert_eq!(node, NodeId::new("node-1"));
        assert_eq!(serde_json::to_string(&RequestId(7)).unwrap(), "7");
    }
}
