//! Directed graph primitives used by the class hierarchy and control-flow analyses.
//!
//! - [`NodeId`] - strongly typed node index
//! - [`DirectedGraph`] - adjacency-list graph with node and edge payloads
//! - [`IndexedGraph`] - a graph addressed by domain keys
//! - [`GraphBase`], [`Successors`], [`Predecessors`] - capability traits the algorithms use
//! - [`Reversed`] - a view walking edges backwards
//! - [`algorithms`] - traversal orders

pub mod algorithms;
mod directed;
mod indexed;
mod node;
mod traits;

pub use directed::DirectedGraph;
pub use indexed::IndexedGraph;
pub use node::NodeId;
pub use traits::{GraphBase, Predecessors, Reversed, Successors};
