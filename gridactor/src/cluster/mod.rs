//! Cluster membership: node records, liveness and the local node agent.

pub mod agent;
pub mod membership;
pub mod node;

pub use agent::{LoadReporter, NodeAgent};
pub use membership::Membership;
pub use node::{Node, ROLE_DEFAULT};

use crate::actor::NodeId;

pub(crate) const NODE_PREFIX: &str = "node/";

pub(crate) fn node_key(id: &NodeId) -> String {
    format!("{}{}", NODE_PREFIX, id)
}
