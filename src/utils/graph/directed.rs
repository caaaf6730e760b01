//! Adjacency-list directed graph.
//!
//! [`DirectedGraph`] stores node payloads in a vector and keeps per-node outgoing and
//! incoming edge lists, so both successor and predecessor queries are O(degree). Nodes and
//! edges are never removed; graphs in this crate are built once per analysis and dropped.

use crate::{
    utils::graph::{
        node::NodeId,
        traits::{GraphBase, Predecessors, Successors},
    },
    Error, Result,
};

#[derive(Debug, Clone)]
struct EdgeData<E> {
    source: NodeId,
    target: NodeId,
    data: E,
}

/// A directed graph with node payloads `N` and edge payloads `E`.
///
/// # Examples
///
/// ```rust,ignore
/// use jarscope::utils::graph::DirectedGraph;
///
/// let mut graph: DirectedGraph<&str, ()> = DirectedGraph::new();
/// let child = graph.add_node("b");
/// let parent = graph.add_node("a");
/// graph.add_edge(child, parent, ())?;
/// assert_eq!(graph.successors(child).collect::<Vec<_>>(), vec![parent]);
/// # Ok::<(), jarscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DirectedGraph<N, E> {
    nodes: Vec<N>,
    edges: Vec<EdgeData<E>>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl<N, E> Default for DirectedGraph<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> DirectedGraph<N, E> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        DirectedGraph {
            nodes: Vec::new(),
            edges: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Creates an empty graph with preallocated storage.
    #[must_use]
    pub fn with_capacity(node_capacity: usize, edge_capacity: usize) -> Self {
        DirectedGraph {
            nodes: Vec::with_capacity(node_capacity),
            edges: Vec::with_capacity(edge_capacity),
            outgoing: Vec::with_capacity(node_capacity),
            incoming: Vec::with_capacity(node_capacity),
        }
    }

    /// Adds a node and returns its id.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(data);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds an edge from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if either endpoint does not exist.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, data: E) -> Result<()> {
        for (role, node) in [("source", source), ("target", target)] {
            if node.index() >= self.nodes.len() {
                return Err(Error::GraphError(format!(
                    "{} node {} does not exist in graph with {} nodes",
                    role,
                    node,
                    self.nodes.len()
                )));
            }
        }

        let index = self.edges.len();
        self.edges.push(EdgeData {
            source,
            target,
            data,
        });
        self.outgoing[source.index()].push(index);
        self.incoming[target.index()].push(index);
        Ok(())
    }

    /// Returns the payload of `node`.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&N> {
        self.nodes.get(node.index())
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over `(id, payload)` pairs.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, data)| (NodeId::new(i), data))
    }

    /// Iterates over `(source, target, payload)` triples in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, &E)> + '_ {
        self.edges.iter().map(|e| (e.source, e.target, &e.data))
    }

    /// Returns `true` if an edge `source -> target` exists.
    #[must_use]
    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.outgoing
            .get(source.index())
            .is_some_and(|out| out.iter().any(|&e| self.edges[e].target == target))
    }

    /// Number of edges leaving `node`.
    #[must_use]
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.outgoing.get(node.index()).map_or(0, Vec::len)
    }

    /// Number of edges entering `node`.
    #[must_use]
    pub fn in_degree(&self, node: NodeId) -> usize {
        self.incoming.get(node.index()).map_or(0, Vec::len)
    }
}

impl<N, E> GraphBase for DirectedGraph<N, E> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }
}

impl<N, E> Successors for DirectedGraph<N, E> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.outgoing[node.index()]
            .iter()
            .map(|&edge| self.edges[edge].target)
    }
}

impl<N, E> Predecessors for DirectedGraph<N, E> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.incoming[node.index()]
            .iter()
            .map(|&edge| self.edges[edge].source)
    }
}
