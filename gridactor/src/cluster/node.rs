//! Cluster node records.

use crate::actor::{unix_now, NodeId};
use crate::codec::{JsonCodec, MessageCodec};
use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role every node falls back to when no node serves the requested role.
pub const ROLE_DEFAULT: &str = "default";

/// A cluster member as published in the store under `node/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: String,
    pub host: String,
    pub port: u16,
    /// Number of actors tracked by the node's supervisor.
    pub load: u64,
    /// Unix seconds of the last refresh.
    pub active_at: i64,
}

impl Node {
    pub fn new(id: NodeId, role: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            role: role.into(),
            host: host.into(),
            port,
            load: 0,
            active_at: unix_now(),
        }
    }

    /// `host:port` of the node's RPC listener.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, CodecError> {
        JsonCodec.encode(self)
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        JsonCodec.decode(bytes)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}@{}, load={})", self.id, self.role, self.address(), self.load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_address_and_codec() {
        let mut node = Node::new(NodeId::new("n1"), ROLE_DEFAULT, "127.0.0.1", 7100);
        node.load = 3;
        assert_eq!(node.address(), "127.0.0.1:7100");

        let decoded = Node::decode(&node.encode().unwrap()).unwrap();
        assert_eq!(decoded, node);
    }
}
