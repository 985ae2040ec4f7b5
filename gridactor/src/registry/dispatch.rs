//! Node selection for unowned actors.

use crate::cluster::Node;

/// Pick the least-loaded node for `role`.
///
/// Nodes serving `role` are preferred; with none, the least-loaded node of
/// the whole cluster is picked regardless of its role. Ties on load are
/// broken arbitrarily.
pub fn select_node<'a>(nodes: &'a [Node], role: &str) -> Option<&'a Node> {
    least_loaded(nodes.iter().filter(|n| n.role == role)).or_else(|| least_loaded(nodes.iter()))
}

fn least_loaded<'a>(candidates: impl Iterator<Item = &'a Node>) -> Option<&'a Node> {
    candidates.min_by_key(|n| n.load)
}
