//! Graph wrapper keyed by domain values.
//!
//! [`IndexedGraph`] maps domain keys (class ids, names) to [`NodeId`]s so callers can build
//! and query a [`DirectedGraph`] without tracking the index mapping themselves. Algorithms
//! still run on [`IndexedGraph::inner`] and their results are mapped back with
//! [`IndexedGraph::key`].

use std::collections::HashMap;
use std::hash::Hash;

use crate::{
    utils::graph::{DirectedGraph, NodeId},
    Result,
};

/// A directed graph whose nodes are identified by keys of type `K`.
#[derive(Debug, Clone)]
pub struct IndexedGraph<K>
where
    K: Hash + Eq + Clone,
{
    graph: DirectedGraph<K, ()>,
    key_to_node: HashMap<K, NodeId>,
}

impl<K> Default for IndexedGraph<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> IndexedGraph<K>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DirectedGraph::new(),
            key_to_node: HashMap::new(),
        }
    }

    /// Adds `key` if it is not present and returns its node.
    pub fn add_node(&mut self, key: K) -> NodeId {
        if let Some(&node) = self.key_to_node.get(&key) {
            return node;
        }

        let node = self.graph.add_node(key.clone());
        self.key_to_node.insert(key, node);
        node
    }

    /// Adds an edge between two keys, creating missing nodes. Returns `false` if the edge
    /// already existed.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::Error::GraphError`] from the underlying graph.
    pub fn add_edge(&mut self, from: K, to: K) -> Result<bool> {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if self.graph.has_edge(from, to) {
            return Ok(false);
        }

        self.graph.add_edge(from, to, ())?;
        Ok(true)
    }

    /// Returns the node for `key`.
    #[must_use]
    pub fn node(&self, key: &K) -> Option<NodeId> {
        self.key_to_node.get(key).copied()
    }

    /// Returns the key of `node`.
    #[must_use]
    pub fn key(&self, node: NodeId) -> Option<&K> {
        self.graph.node(node)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// The underlying graph, for running algorithms.
    #[must_use]
    pub fn inner(&self) -> &DirectedGraph<K, ()> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::Successors;

    #[test]
    fn test_indexed_graph_dedupes() {
        let mut graph: IndexedGraph<&str> = IndexedGraph::new();
        assert!(graph.add_edge("b", "a").unwrap());
        assert!(!graph.add_edge("b", "a").unwrap());
        assert!(graph.add_edge("c", "a").unwrap());
        assert_eq!(graph.node_count(), 3);

        let b = graph.node(&"b").unwrap();
        let a = graph.node(&"a").unwrap();
        assert_eq!(graph.inner().successors(b).collect::<Vec<_>>(), vec![a]);
        assert_eq!(graph.key(a), Some(&"a"));
    }
}
