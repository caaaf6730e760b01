//! Capability traits for graph algorithms.
//!
//! Algorithms are written against these traits instead of a concrete graph type, so the
//! same traversal code runs over [`crate::utils::graph::DirectedGraph`] and over views such
//! as [`Reversed`], which walks edges backwards.

use crate::utils::graph::NodeId;

/// Basic node enumeration.
pub trait GraphBase {
    /// Number of nodes; valid ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Iterates over every node id.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Forward edge access.
pub trait Successors: GraphBase {
    /// Targets of the edges leaving `node`.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Backward edge access.
pub trait Predecessors: GraphBase {
    /// Sources of the edges entering `node`.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A view that swaps edge direction.
///
/// In the class hierarchy graph edges point from subclass to superclass, so traversing a
/// `Reversed` view from a class visits all of its subclasses.
pub struct Reversed<'g, G>(pub &'g G);

impl<G: GraphBase> GraphBase for Reversed<'_, G> {
    fn node_count(&self) -> usize {
        self.0.node_count()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.0.node_ids()
    }
}

impl<G: Predecessors> Successors for Reversed<'_, G> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.0.predecessors(node)
    }
}

impl<G: Successors> Predecessors for Reversed<'_, G> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.0.successors(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestGraph {
        node_count: usize,
        edges: Vec<(NodeId, NodeId)>,
    }

    impl GraphBase for TestGraph {
        fn node_count(&self) -> usize {
            self.node_count
        }

        fn node_ids(&self) -> impl Iterator<Item = NodeId> {
            (0..self.node_count).map(NodeId::new)
        }
    }

    impl Successors for TestGraph {
        fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.edges
                .iter()
                .filter(move |(src, _)| *src == node)
                .map(|(_, dst)| *dst)
        }
    }

    impl Predecessors for TestGraph {
        fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
            self.edges
                .iter()
                .filter(move |(_, dst)| *dst == node)
                .map(|(src, _)| *src)
        }
    }

    #[test]
    fn test_reversed_swaps_direction() {
        let graph = TestGraph {
            node_count: 3,
            edges: vec![
                (NodeId::new(1), NodeId::new(0)),
                (NodeId::new(2), NodeId::new(0)),
            ],
        };
        let reversed = Reversed(&graph);

        let succ: Vec<NodeId> = reversed.successors(NodeId::new(0)).collect();
        assert_eq!(succ, vec![NodeId::new(1), NodeId::new(2)]);
        assert_eq!(reversed.predecessors(NodeId::new(1)).count(), 1);
        assert_eq!(reversed.node_count(), 3);
    }
}
